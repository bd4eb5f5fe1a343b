// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use meshcall::client::config::{ClientInfo, ReferenceConfig};
use meshcall::client::{Invoker, Refer};
use meshcall::context::Context;
use meshcall::invocation::{CallType, Invocation, Reply};
use meshcall::registry::{ServiceDirectory, ServiceInstance};
use meshcall::Error;
use rand::seq::IteratorRandom;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Request of the `Greet` and `GreetStream` methods.
#[derive(Debug, Clone)]
pub struct GreetRequest {
    pub name: String,
}

/// Reply of the `Greet` method.
#[derive(Debug, Clone)]
pub struct GreetReply {
    pub message: String,
    pub served_by: String,
}

/// An in-process stand-in for a transport: picks a random enabled instance of the interface's
/// service and answers on its behalf.
pub struct LocalInvoker {
    directory: Arc<ServiceDirectory>,
    latency: Duration,
}

impl Invoker for LocalInvoker {
    async fn invoke(&self, _: &Context, invocation: Invocation) -> Result<Reply, Error> {
        let snapshot = self.directory.snapshot(invocation.interface_name());
        let instance = snapshot
            .enabled()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| Error::transport(format!("no live instance of {}", invocation.interface_name())))?;
        tokio::time::sleep(self.latency).await;

        let name = invocation.request::<GreetRequest>().map(|r| r.name.clone()).unwrap_or_default();
        match invocation.call_type() {
            CallType::Unary => {
                let reply = GreetReply {
                    message: format!("Hello, {name}!"),
                    served_by: instance.id(),
                };
                if let Some(sink) = invocation.response_sink() {
                    let _ = sink.fill(reply);
                }
                Ok(Reply::empty().with_attachment("served-by", instance.id()))
            },
            CallType::ServerStream => {
                let (tx, rx) = mpsc::channel(8);
                let served_by = instance.id();
                tokio::spawn(async move {
                    for n in 1..=3 {
                        if tx.send(format!("[{served_by}] greeting #{n} for {name}")).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(Reply::with_value(rx))
            },
            call_type => Err(Error::transport(format!("{call_type} calls are not served by the local invoker"))),
        }
    }
}

/// Resolves every reference to a [`LocalInvoker`] over `directory`.
pub struct LocalRefer {
    pub directory: Arc<ServiceDirectory>,
    pub latency: Duration,
}

impl Refer for LocalRefer {
    type Invoker = LocalInvoker;

    fn refer(&self, config: &ReferenceConfig, info: &ClientInfo) -> Result<LocalInvoker, Error> {
        tracing::info!("[MESHCALL] referring {} with cluster {}", info.interface_name, config.cluster);
        Ok(LocalInvoker {
            directory: self.directory.clone(),
            latency: self.latency,
        })
    }
}

/// First port of the simulated instances.
pub const BASE_PORT: u16 = 20000;

/// `count` local instances of `service` on consecutive ports from [`BASE_PORT`], stopping at the
/// last valid port.
pub fn simulated_instances(service: &str, count: u16) -> Vec<Arc<ServiceInstance>> {
    (0..count)
        .map_while(|n| BASE_PORT.checked_add(n))
        .map(|port| Arc::new(ServiceInstance::new(service.to_string(), "127.0.0.1", port)))
        .collect()
}

/// Initializes a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing(service_name: &'static str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    tracing::info!("{service_name} started");
    Ok(())
}
