// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//!
//! Provides a client that turns logical method calls into invocations and dispatches them
//! through a single [`Invoker`] contract, whatever the call type.

pub mod config;

use crate::context::Context;
use crate::invocation::{CallType, Invocation, Reply, ResponseSink, Value};
use crate::Error;
use config::{CallOption, ClientInfo, ReferenceConfig};
use faststr::FastStr;
use std::any::{type_name, Any};
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Executes an [`Invocation`] against a remote endpoint.
///
/// Implementations select the endpoint (typically from a
/// [`ServiceDirectory`](crate::registry::ServiceDirectory) snapshot), run the transport and
/// must be safe for concurrent use. They should forward the context cancellation into their
/// own transport waits.
pub trait Invoker: Send + Sync + 'static {
    /// Performs one call attempt.
    fn invoke(&self, ctx: &Context, invocation: Invocation) -> impl Future<Output = Result<Reply, Error>> + Send;
}

impl<I: Invoker> Invoker for Arc<I> {
    fn invoke(&self, ctx: &Context, invocation: Invocation) -> impl Future<Output = Result<Reply, Error>> + Send {
        (**self).invoke(ctx, invocation)
    }
}

/// Resolves a reference into the [`Invoker`] a client is bound to.
pub trait Refer: Send + Sync + 'static {
    /// The invoker produced for a reference.
    type Invoker: Invoker;
    /// Builds the invoker for the interface described by `info`.
    fn refer(&self, config: &ReferenceConfig, info: &ClientInfo) -> Result<Self::Invoker, Error>;
}

impl<F, I> Refer for F
where
    F: Fn(&ReferenceConfig, &ClientInfo) -> Result<I, Error> + Send + Sync + 'static,
    I: Invoker,
{
    type Invoker = I;

    fn refer(&self, config: &ReferenceConfig, info: &ClientInfo) -> Result<I, Error> {
        (self)(config, info)
    }
}

struct Bound<I> {
    info: ClientInfo,
    invoker: I,
}

/// The client-facing RPC surface.
///
/// A client must be [initialized](Client::init) exactly once before any call.
pub struct Client<R: Refer> {
    config: ReferenceConfig,
    refer: R,
    bound: OnceLock<Bound<R::Invoker>>,
    // Serializes `init` so the resolver runs at most once.
    binding: Mutex<()>,
}

impl<R: Refer> Client<R> {
    /// Creates an uninitialized client after verifying `config`.
    pub fn new(config: ReferenceConfig, refer: R) -> Result<Self, Error> {
        config.verify()?;
        Ok(Self {
            config,
            refer,
            bound: OnceLock::new(),
            binding: Mutex::new(()),
        })
    }

    /// Binds the client to the interface described by `info` and to the invoker resolved for it.
    ///
    /// Fails with [`Error::InvalidArgument`] when `info` is missing or names no interface, and
    /// with [`Error::AlreadyInitialized`] on any later call. Concurrent calls resolve the
    /// invoker once.
    pub fn init(&self, info: Option<ClientInfo>) -> Result<(), Error> {
        let info = info.ok_or_else(|| Error::invalid_argument("client info is nil"))?;
        if info.interface_name.is_empty() {
            return Err(Error::invalid_argument("interface name must not be empty"));
        }
        let _binding = self.binding.lock().unwrap_or_else(PoisonError::into_inner);
        if self.bound.get().is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let invoker = self.refer.refer(&self.config, &info)?;
        self.bound.set(Bound { info, invoker }).map_err(|_| Error::AlreadyInitialized)?;
        Ok(())
    }

    /// Whether [`Client::init`] succeeded.
    pub fn is_initialized(&self) -> bool {
        self.bound.get().is_some()
    }

    /// The interface this client is bound to.
    pub fn info(&self) -> Option<&ClientInfo> {
        self.bound.get().map(|b| &b.info)
    }

    /// The reference configuration.
    pub fn config(&self) -> &ReferenceConfig {
        &self.config
    }

    /// Calls a unary method and returns its response.
    ///
    /// The invoker stores the response in the [`ResponseSink`] passed as second parameter; a
    /// response carried in the reply value slot is accepted as well.
    pub async fn call_unary<Req, Resp>(&self, ctx: &Context, request: Req, interface_name: &str, method_name: &str, opts: impl IntoIterator<Item = CallOption>) -> Result<Resp, Error>
    where
        Req: Any + Send + Sync,
        Resp: Any,
    {
        let sink = ResponseSink::new();
        let mut reply = self.call(ctx, vec![Box::new(request), Box::new(sink.clone())], interface_name, method_name, CallType::Unary, opts).await?;
        let response = sink
            .take()
            .or_else(|| reply.take_value())
            .ok_or_else(|| Error::InvalidResponse(format!("unary call `{method_name}` produced no response").into()))?;
        downcast(response)
    }

    /// Opens a client stream and returns the stream handle carried by the reply.
    pub async fn call_client_stream<S: Any>(&self, ctx: &Context, interface_name: &str, method_name: &str, opts: impl IntoIterator<Item = CallOption>) -> Result<S, Error> {
        let reply = self.call(ctx, vec![], interface_name, method_name, CallType::ClientStream, opts).await?;
        stream_handle(reply, method_name)
    }

    /// Sends one request and returns the handle of the response stream carried by the reply.
    pub async fn call_server_stream<Req, S>(&self, ctx: &Context, request: Req, interface_name: &str, method_name: &str, opts: impl IntoIterator<Item = CallOption>) -> Result<S, Error>
    where
        Req: Any + Send + Sync,
        S: Any,
    {
        let reply = self.call(ctx, vec![Box::new(request)], interface_name, method_name, CallType::ServerStream, opts).await?;
        stream_handle(reply, method_name)
    }

    /// Opens a bidirectional stream and returns the stream handle carried by the reply.
    pub async fn call_bidi_stream<S: Any>(&self, ctx: &Context, interface_name: &str, method_name: &str, opts: impl IntoIterator<Item = CallOption>) -> Result<S, Error> {
        let reply = self.call(ctx, vec![], interface_name, method_name, CallType::BidiStream, opts).await?;
        stream_handle(reply, method_name)
    }

    async fn call(&self, ctx: &Context, parameters: Vec<Value>, interface_name: &str, method_name: &str, call_type: CallType, opts: impl IntoIterator<Item = CallOption>) -> Result<Reply, Error> {
        let bound = self.bound.get().ok_or(Error::NotInitialized)?;
        if !bound.info.accepts(method_name) {
            return Err(Error::InvalidArgument(
                format!("method `{method_name}` is not declared by `{}`", bound.info.interface_name).into(),
            ));
        }
        let options = self.config.default_call_options().apply(opts);
        let interface_name = if interface_name.is_empty() { bound.info.interface_name.clone() } else { FastStr::new(interface_name) };
        let invocation = Invocation::new(FastStr::new(method_name), parameters, call_type, options)?.with_interface_name(interface_name);

        if let Err(err) = ctx.check() {
            debug!("[MESHCALL] {} call `{method_name}` not dispatched: {err}", call_type);
            return Err(err);
        }
        let deadline = ctx.effective_deadline(invocation.options().timeout);
        trace!("[MESHCALL] dispatching {:?}", invocation);

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(Error::Canceled),
            _ = expire(deadline) => Err(Error::DeadlineExceeded),
            reply = bound.invoker.invoke(ctx, invocation) => reply,
        };
        if let Err(err) = &result {
            if err.is_context_error() {
                debug!("[MESHCALL] {} call `{method_name}` aborted: {err}", call_type);
            }
        }
        result
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn stream_handle<S: Any>(mut reply: Reply, method_name: &str) -> Result<S, Error> {
    let handle = reply
        .take_value()
        .ok_or_else(|| Error::InvalidResponse(format!("stream call `{method_name}` produced no stream handle").into()))?;
    downcast(handle)
}

fn downcast<T: Any>(value: Value) -> Result<T, Error> {
    value
        .downcast::<T>()
        .map(|v| *v)
        .map_err(|_| Error::InvalidResponse(format!("expected a value of type `{}`", type_name::<T>()).into()))
}
