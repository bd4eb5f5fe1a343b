// Copyright Andeya Lee 2024
//
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

use clap::Parser;
use meshcall::client::config::{CallOption, ClientInfo, ReferenceConfig};
use meshcall::client::Client;
use meshcall::context;
use meshcall::observer::EventBus;
use meshcall::registry::{RegistryNotifier, ServiceDirectory};
use service::{init_tracing, simulated_instances, GreetReply, GreetRequest, LocalRefer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
struct Flags {
    /// Sets the service (interface) name to call.
    #[clap(long, default_value = "greet.GreetService")]
    service: String,
    /// Sets the largest number of simulated instances.
    #[clap(long, default_value_t = 3, value_parser = clap::value_parser!(u16).range(1..=1024))]
    instances: u16,
    /// Sets the number of unary calls to make.
    #[clap(long, default_value_t = 5)]
    calls: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let flags = Flags::parse();
    init_tracing("Meshcall Example Client")?;

    let bus = EventBus::new();
    let directory = ServiceDirectory::subscribe(&bus);
    let notifier = Arc::new(RegistryNotifier::new(bus.clone()));

    // A simulated registry connection that keeps reshaping the membership.
    let registry = {
        let notifier = notifier.clone();
        let service = flags.service.clone();
        let max = flags.instances.max(1);
        tokio::spawn(async move {
            for count in (1..=max).cycle() {
                notifier.notify(service.clone(), simulated_instances(&service, count));
                tokio::time::sleep(Duration::from_millis(15)).await;
            }
        })
    };

    let mut updates = directory.watch();
    let first = updates.recv().await?;
    tracing::info!("first membership of {}: {} instances", first.service_name(), first.len());

    let client = Client::new(
        ReferenceConfig::new().with_request_timeout(Duration::from_millis(500)),
        LocalRefer {
            directory: directory.clone(),
            latency: Duration::from_millis(5),
        },
    )?;
    client.init(Some(ClientInfo::new(flags.service.clone()).with_method("Greet").with_method("GreetStream")))?;

    let ctx = context::current();
    for n in 0..flags.calls {
        let request = GreetRequest { name: format!("caller-{n}") };
        match client.call_unary::<_, GreetReply>(&ctx, request, "", "Greet", [CallOption::attachment("attempt", n.to_string())]).await {
            Ok(reply) => tracing::info!("{} (served by {})", reply.message, reply.served_by),
            Err(e) => tracing::warn!("{:?}", anyhow::Error::from(e)),
        }
    }

    let mut stream: mpsc::Receiver<String> = client
        .call_server_stream(&ctx, GreetRequest { name: "stream".into() }, "", "GreetStream", [CallOption::Timeout(Duration::from_millis(100))])
        .await?;
    while let Some(greeting) = stream.recv().await {
        tracing::info!("{greeting}");
    }

    // A call that is cancelled before dispatch never reaches the invoker.
    let cancelled = context::current();
    cancelled.cancel();
    if let Err(e) = client.call_unary::<_, GreetReply>(&cancelled, GreetRequest { name: "late".into() }, "", "Greet", []).await {
        tracing::info!("cancelled call: {e}");
    }

    registry.abort();
    Ok(())
}
