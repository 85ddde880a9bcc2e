use anyhow::Context;
use commune_gateway_client::HttpMessageGateway;
use commune_realtime::{AppState, RealtimeService};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env(std::env::args().skip(1))?;

    // Initialize tracing; RUST_LOG wins over the LOG_LEVEL default
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "commune_watch={0},commune_realtime={0},commune_gateway_client={0}",
                    config.common.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        environment = ?config.environment(),
        url = %config.common.gateway.url,
        conversations = ?config.conversations,
        interval_ms = config.common.polling.effective_interval_ms(),
        "Starting Commune watch"
    );

    let gateway = HttpMessageGateway::new(&config.common.gateway)
        .context("Failed to build backend gateway")?;
    let realtime = RealtimeService::new(gateway, config.common.polling.clone());
    realtime.initialize();

    for &conversation_id in &config.conversations {
        let handle = realtime.subscribe_to_conversation(conversation_id, move |message| {
            tracing::info!(
                conversation_id,
                message_id = message.id,
                body = %message.field("body").unwrap_or(&serde_json::Value::Null),
                "New message"
            );
        });
        tracing::info!(channel = %handle.channel(), "Subscribed");
    }

    if config.watch_notifications {
        let handle = realtime.subscribe_to_notifications(|event| {
            tracing::info!(conversations = event.data.len(), "Conversation list refreshed");
        });
        tracing::info!(channel = %handle.channel(), "Subscribed");
    }

    // Lines on stdin ("background", "active", ...) simulate app lifecycle changes
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<AppState>() {
                    Ok(state) => {
                        realtime.handle_app_state_change(state);
                        tracing::info!(state = %realtime.connection_state(), "Connection state");
                    }
                    Err(e) => tracing::warn!(error = %e, "Ignoring input"),
                },
                // stdin closed: keep polling until Ctrl-C
                Ok(None) => {
                    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
                    break;
                }
                Err(e) => return Err(e).context("Failed to read stdin"),
            },
        }
    }

    realtime.disconnect();
    tracing::info!("Commune watch stopped");

    Ok(())
}
