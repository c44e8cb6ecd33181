use dailog_session::config::{get_config_path, load_config};
use dailog_session::{ClientContext, ClientEvent};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Stand-in for the UI: turns client events into navigation decisions
async fn relay_events(ctx: ClientContext) {
    let mut subscriber = ctx.events.subscribe();
    loop {
        let event = match subscriber.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event relay lagged behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        match ctx.handle_view_event(&event).await {
            Ok(Some(view)) => info!("Navigating to {:?}", view),
            Ok(None) => match &event {
                ClientEvent::AlertIssued { alert } => {
                    info!(severity = ?alert.severity, "[alert] {}", alert.message);
                }
                other => debug!(event = other.event_type(), "Client event"),
            },
            Err(e) => error!(error = %e, "Failed to apply client event"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if it exists
    let env_file_path = dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if cfg!(debug_assertions) {
                "dailog_session=debug,info".into()
            } else {
                "dailog_session=info,warn".into()
            }
        }))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    match env_file_path {
        Some(path) => info!("Loaded environment variables from {}", path.display()),
        None => debug!("No .env file found. Using existing environment variables."),
    };

    let config = load_config(&get_config_path()).await?;
    info!(base_url = %config.api.base_url, "Dailog session client starting");

    let ctx = ClientContext::new(config).await?;
    let relay = tokio::spawn(relay_events(ctx.clone()));

    if ctx.session.is_logged_in() {
        if let Err(e) = ctx.session.fetch_profile().await {
            warn!(error = %e, "Could not refresh profile on startup");
        }
    }

    let monitor = ctx.health.start().await;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    ctx.health.stop().await;
    if let Err(e) = monitor.await {
        error!(error = %e, "Health monitor task failed");
    }
    relay.abort();

    Ok(())
}
