// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! The call-type-agnostic request envelope handed to an invoker, and the reply it produces.

use crate::client::config::CallOptions;
use crate::Error;
use faststr::FastStr;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

/// Attribute key under which [`Invocation::new`] records the [`CallType`].
pub const CALL_TYPE_KEY: &str = "call-type";

/// An opaque value: a raw call argument, a reply payload or a stream handle.
pub type Value = Box<dyn Any + Send + Sync>;

/// The shape of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// One request, one response.
    Unary,
    /// A stream of requests, one response.
    ClientStream,
    /// One request, a stream of responses.
    ServerStream,
    /// Streams in both directions.
    BidiStream,
}

impl CallType {
    /// The name used for this call type in configuration and attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallType::Unary => "unary",
            CallType::ClientStream => "client_stream",
            CallType::ServerStream => "server_stream",
            CallType::BidiStream => "bidi_stream",
        }
    }

    /// Number of raw parameters an invocation of this call type carries.
    /// Stream-carried values travel out of band.
    pub fn arity(&self) -> usize {
        match self {
            CallType::Unary => 2,
            CallType::ServerStream => 1,
            CallType::ClientStream | CallType::BidiStream => 0,
        }
    }

    /// Whether the reply of this call type carries a stream handle.
    pub fn is_stream(&self) -> bool {
        !matches!(self, CallType::Unary)
    }
}

impl fmt::Display for CallType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unary" => Ok(CallType::Unary),
            "client_stream" => Ok(CallType::ClientStream),
            "server_stream" => Ok(CallType::ServerStream),
            "bidi_stream" => Ok(CallType::BidiStream),
            other => Err(Error::UnsupportedCallType(FastStr::new(other))),
        }
    }
}

/// Write-once slot into which an invoker stores the decoded response of a unary call.
///
/// It is the second parameter of every unary invocation; the dispatcher keeps a handle and
/// reads the response back once the invoker returns.
#[derive(Clone, Default)]
pub struct ResponseSink {
    slot: Arc<Mutex<Option<Value>>>,
}

impl ResponseSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the response. Returns the value back if the sink was already filled.
    pub fn fill<T: Any + Send + Sync>(&self, response: T) -> Result<(), T> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(response);
        }
        *slot = Some(Box::new(response));
        Ok(())
    }

    /// Whether a response was stored.
    pub fn is_filled(&self) -> bool {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Takes the stored response out of the sink.
    pub fn take(&self) -> Option<Value> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

impl Debug for ResponseSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSink").field("filled", &self.is_filled()).finish()
    }
}

/// One call attempt.
pub struct Invocation {
    method_name: FastStr,
    interface_name: FastStr,
    call_type: CallType,
    parameters: Vec<Value>,
    attributes: HashMap<FastStr, Value>,
    attachments: HashMap<FastStr, FastStr>,
    options: CallOptions,
}

impl Invocation {
    /// Builds an invocation.
    ///
    /// Fails with [`Error::InvalidArgument`] when `method_name` is empty or the number of
    /// parameters does not match [`CallType::arity`]. Records the call type under
    /// [`CALL_TYPE_KEY`] and merges the option attachments into the call metadata.
    pub fn new(method_name: impl Into<FastStr>, parameters: Vec<Value>, call_type: CallType, options: CallOptions) -> Result<Self, Error> {
        let method_name = method_name.into();
        if method_name.is_empty() {
            return Err(Error::invalid_argument("method name must not be empty"));
        }
        if parameters.len() != call_type.arity() {
            return Err(Error::InvalidArgument(
                format!("{call_type} call `{method_name}` takes {} parameters, got {}", call_type.arity(), parameters.len()).into(),
            ));
        }
        let mut attributes: HashMap<FastStr, Value> = HashMap::with_capacity(1);
        attributes.insert(FastStr::from_static_str(CALL_TYPE_KEY), Box::new(call_type));
        Ok(Self {
            method_name,
            interface_name: FastStr::empty(),
            call_type,
            parameters,
            attributes,
            attachments: options.attachments.clone(),
            options,
        })
    }

    /// Sets the target interface.
    pub fn with_interface_name(mut self, interface_name: FastStr) -> Self {
        self.interface_name = interface_name;
        self
    }

    /// The method to call.
    #[inline]
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// The target interface.
    #[inline]
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// The shape of the call.
    #[inline]
    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    /// Raw arguments in declaration order.
    #[inline]
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// The first parameter downcast to `T`, i.e. the request of a unary or server-stream call.
    pub fn request<T: Any>(&self) -> Option<&T> {
        self.parameters.first()?.downcast_ref()
    }

    /// The response sink of a unary call.
    pub fn response_sink(&self) -> Option<&ResponseSink> {
        match self.call_type {
            CallType::Unary => self.parameters.get(1)?.downcast_ref(),
            _ => None,
        }
    }

    /// A side-channel attribute downcast to `T`.
    pub fn attribute<T: Any>(&self, key: &str) -> Option<&T> {
        self.attributes.get(key)?.downcast_ref()
    }

    /// Sets a side-channel attribute. Attributes never travel on the wire.
    pub fn set_attribute<T: Any + Send + Sync>(&mut self, key: impl Into<FastStr>, value: T) {
        self.attributes.insert(key.into(), Box::new(value));
    }

    /// Number of attributes.
    pub fn attributes_len(&self) -> usize {
        self.attributes.len()
    }

    /// Call metadata sent along with the request.
    #[inline]
    pub fn attachments(&self) -> &HashMap<FastStr, FastStr> {
        &self.attachments
    }

    /// The resolved call options.
    #[inline]
    pub fn options(&self) -> &CallOptions {
        &self.options
    }
}

impl Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method_name", &self.method_name)
            .field("interface_name", &self.interface_name)
            .field("call_type", &self.call_type)
            .field("parameters", &self.parameters.len())
            .field("attributes", &self.attributes.keys().collect::<Vec<_>>())
            .field("attachments", &self.attachments)
            .field("options", &self.options)
            .finish()
    }
}

/// The successful outcome of executing an [`Invocation`].
#[derive(Default)]
pub struct Reply {
    value: Option<Value>,
    attachments: HashMap<FastStr, FastStr>,
}

impl Reply {
    /// A reply without a value, e.g. for a unary call that filled its response sink.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A reply carrying `value`, e.g. a stream handle.
    pub fn with_value<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Some(Box::new(value)),
            attachments: HashMap::new(),
        }
    }

    /// Adds a response attachment.
    pub fn with_attachment(mut self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        self.attachments.insert(key.into(), value.into());
        self
    }

    /// The value slot.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Takes the value slot.
    pub fn take_value(&mut self) -> Option<Value> {
        self.value.take()
    }

    /// Response attachments.
    pub fn attachments(&self) -> &HashMap<FastStr, FastStr> {
        &self.attachments
    }
}

impl Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("has_value", &self.value.is_some())
            .field("attachments", &self.attachments)
            .finish()
    }
}
