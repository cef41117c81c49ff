use bpmcore::{StartRequestBus, StartRequestBusConfig};
use bpmruntime::BpmRuntime;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Broker settings from `BPM_BROKER_URL` and friends; `None` when the
/// listener is disabled
pub fn config_from_env() -> Option<StartRequestBusConfig> {
    let connection_string = std::env::var("BPM_BROKER_URL").ok()?;
    let mut config = StartRequestBusConfig {
        connection_string,
        ..StartRequestBusConfig::default()
    };

    if let Ok(stream) = std::env::var("BPM_BROKER_STREAM") {
        config.stream_name = stream;
    }
    if let Ok(topic) = std::env::var("BPM_BROKER_TOPIC") {
        config.topic_name = topic;
    }
    if let Ok(group) = std::env::var("BPM_BROKER_GROUP") {
        config.consumer_group = group;
    }
    config.process_public_id = std::env::var("BPM_BROKER_PROCESS")
        .ok()
        .filter(|p| !p.trim().is_empty());
    Some(config)
}

/// Feed start requests from the broker into the runtime's queue until
/// `shutdown` fires
pub fn spawn_listener(
    config: StartRequestBusConfig,
    runtime: Arc<BpmRuntime>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let bus = match StartRequestBus::connect(config).await {
            Ok(bus) => bus,
            Err(e) => {
                error!("Broker listener disabled: {}", e);
                return;
            }
        };
        let mut subscription = match bus.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!("Broker subscription failed: {}", e);
                return;
            }
        };

        info!(topic = %bus.config().topic_name, "Listening for start requests");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = subscription.next_request() => match request {
                    Some(request) => {
                        runtime.submit(request);
                    }
                    None => break,
                },
            }
        }
        info!("Broker listener stopped");
    })
}
