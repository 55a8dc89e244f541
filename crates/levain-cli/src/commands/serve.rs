use std::sync::Arc;

use clap::Args;
use levain_core::api::{self, ApiState};
use levain_core::capability::{SystemClock, TokioTimer};
use levain_core::{EngineConfig, EngineEvent, NotificationEngine, RecalibrationService, StaticSensor};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use super::{capabilities, open_bakes, CliResult};

#[derive(Args)]
pub struct ServeArgs {
    /// Bind address; overrides `server.bind`
    #[arg(long)]
    pub bind: Option<String>,
    /// Fixed sensor temperature in tenths of a degree Celsius
    #[arg(long, allow_hyphen_values = true)]
    pub temperature: Option<i32>,
    /// Fixed sensor humidity in percent
    #[arg(long)]
    pub humidity: Option<i32>,
}

pub async fn run(args: ServeArgs) -> CliResult {
    let config = EngineConfig::load_or_default();

    let caps = capabilities(Some(Arc::new(TokioTimer::new())))?;
    let mut events = caps.events.subscribe();
    let engine = NotificationEngine::new(caps, &config);
    engine.start_monitors();

    let event_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let service = RecalibrationService::new(
        Arc::new(open_bakes()?),
        Arc::new(StaticSensor {
            temperature: args.temperature,
            humidity: args.humidity,
        }),
        Arc::new(SystemClock),
        config.recalibration.clone(),
    );
    let app = api::router(ApiState { service });

    let bind = args.bind.unwrap_or(config.server.bind);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(addr = %bind, "listening for connections");

    let server = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for shutdown signal");
        }
        info!("received shutdown signal");
    });
    let result = server.await;

    engine.shutdown();
    event_log.abort();
    result?;
    Ok(())
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::AlarmFired {
            kind,
            step_name,
            bake_id,
            delivery,
            ..
        } => info!(kind = kind.label(), step_name, ?bake_id, ?delivery, "alarm fired"),
        EngineEvent::BannerRequested { title, body, .. } => {
            info!(title, body, "in-app banner")
        }
        other => match serde_json::to_string(other) {
            Ok(json) => info!(event = %json, "engine event"),
            Err(e) => warn!(error = %e, "unserializable engine event"),
        },
    }
}
