// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.
//! Reference and per-call configuration.

use crate::Error;
use faststr::FastStr;
use std::collections::HashMap;
use std::time::Duration;

/// Default request timeout of a reference.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);
/// Default retry budget of a reference.
pub const DEFAULT_RETRIES: u32 = 2;
/// Default cluster strategy name.
pub const DEFAULT_CLUSTER: &str = "failover";

/// Resolved configuration of a referenced (remote) service.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ReferenceConfig {
    /// Default per-call timeout.
    /// Default is 3s.
    pub request_timeout: Duration,
    /// Default retry budget handed to the cluster layer.
    /// Default is 2.
    pub retries: u32,
    /// Cluster strategy name, interpreted by the invoker factory.
    /// Default is `failover`.
    pub cluster: FastStr,
    /// Service group.
    pub group: FastStr,
    /// Service version.
    pub version: FastStr,
    /// Registries the reference subscribes to.
    pub registry_ids: Vec<FastStr>,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            retries: DEFAULT_RETRIES,
            cluster: FastStr::from_static_str(DEFAULT_CLUSTER),
            group: FastStr::empty(),
            version: FastStr::empty(),
            registry_ids: Vec::new(),
        }
    }
}

impl ReferenceConfig {
    /// Returns the default reference config.
    pub fn new() -> Self {
        Self::default()
    }
    /// Set the default per-call timeout.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
    /// Set the default retry budget.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }
    /// Set the cluster strategy name. An empty name means the default.
    pub fn with_cluster(mut self, cluster: impl Into<FastStr>) -> Self {
        let cluster = cluster.into();
        self.cluster = if cluster.is_empty() { FastStr::from_static_str(DEFAULT_CLUSTER) } else { cluster };
        self
    }
    /// Set the service group.
    pub fn with_group(mut self, group: impl Into<FastStr>) -> Self {
        self.group = group.into();
        self
    }
    /// Set the service version.
    pub fn with_version(mut self, version: impl Into<FastStr>) -> Self {
        self.version = version.into();
        self
    }
    /// Add a registry id, ignoring duplicates and surrounding whitespace.
    pub fn with_registry_id(mut self, registry_id: impl Into<FastStr>) -> Self {
        let id: FastStr = registry_id.into();
        let id = FastStr::new(id.trim());
        if !id.is_empty() && !self.registry_ids.contains(&id) {
            self.registry_ids.push(id);
        }
        self
    }

    /// Verifies the config.
    pub fn verify(&self) -> Result<(), Error> {
        if self.cluster.is_empty() {
            return Err(Error::invalid_argument("cluster must not be empty"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::invalid_argument("request timeout must be positive"));
        }
        Ok(())
    }

    /// The call options every call starts from.
    pub fn default_call_options(&self) -> CallOptions {
        CallOptions {
            timeout: Some(self.request_timeout),
            retries: self.retries,
            attachments: HashMap::new(),
        }
    }
}

/// Descriptor of the target interface a client is initialized with.
#[derive(Clone, Debug, Default)]
pub struct ClientInfo {
    /// Interface name, e.g. `greet.GreetService`.
    pub interface_name: FastStr,
    /// Methods of the interface. Empty means any method is accepted.
    pub method_names: Vec<FastStr>,
    /// Free-form application metadata.
    pub meta: HashMap<FastStr, FastStr>,
}

impl ClientInfo {
    /// Creates a descriptor for `interface_name`.
    pub fn new(interface_name: impl Into<FastStr>) -> Self {
        Self {
            interface_name: interface_name.into(),
            ..Default::default()
        }
    }
    /// Add a method name.
    pub fn with_method(mut self, method_name: impl Into<FastStr>) -> Self {
        self.method_names.push(method_name.into());
        self
    }
    /// Add a metadata entry.
    pub fn with_meta(mut self, key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }
    /// Whether `method_name` may be called through this interface.
    pub fn accepts(&self, method_name: &str) -> bool {
        self.method_names.is_empty() || self.method_names.iter().any(|m| m.as_str() == method_name)
    }
}

/// Options of one call, resolved from the reference defaults and the supplied [`CallOption`]s.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Per-call timeout. Combined with the context deadline, the earlier one wins.
    pub timeout: Option<Duration>,
    /// Retry budget for the cluster layer.
    pub retries: u32,
    /// Call metadata.
    pub attachments: HashMap<FastStr, FastStr>,
}

impl CallOptions {
    /// Applies `options` in order and returns the result.
    pub fn apply(self, options: impl IntoIterator<Item = CallOption>) -> Self {
        options.into_iter().fold(self, |resolved, option| option.apply(resolved))
    }
}

/// A recognized per-call option.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallOption {
    /// Overrides the default timeout.
    Timeout(Duration),
    /// Sets the retry budget.
    Retries(u32),
    /// Merges one entry into the call metadata.
    Attachment(FastStr, FastStr),
    /// Merges entries into the call metadata.
    Attachments(HashMap<FastStr, FastStr>),
}

impl CallOption {
    /// Shorthand for [`CallOption::Attachment`].
    pub fn attachment(key: impl Into<FastStr>, value: impl Into<FastStr>) -> Self {
        Self::Attachment(key.into(), value.into())
    }

    /// Applies this option over `options`.
    pub fn apply(self, mut options: CallOptions) -> CallOptions {
        match self {
            CallOption::Timeout(timeout) => options.timeout = Some(timeout),
            CallOption::Retries(retries) => options.retries = retries,
            CallOption::Attachment(key, value) => {
                options.attachments.insert(key, value);
            },
            CallOption::Attachments(attachments) => options.attachments.extend(attachments),
        }
        options
    }
}
