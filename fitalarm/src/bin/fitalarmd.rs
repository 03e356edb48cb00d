//! Alarm coordination daemon.
//!
//! Runs one endpoint (wearable or companion) linked to its peer over TCP,
//! with the control API on a local port. Configured from `FITALARM_*`
//! environment variables; see `fitalarm::config`.

use anyhow::{Context, Result};
use time::UtcOffset;
use tokio_util::sync::CancellationToken;

use fitalarm::api::{self, SharedState};
use fitalarm::config::DaemonConfig;
use fitalarm::endpoint::Endpoint;
use fitalarm::feedback::LogFeedback;
use fitalarm::tracing::prelude::*;
use fitalarm::transport::tcp::TcpChannel;

fn main() -> Result<()> {
    // The local offset can only be read while the process is single
    // threaded, so read it before the runtime starts.
    let utc_offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    fitalarm::tracing::init_journald_or_stdout();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?
        .block_on(run(utc_offset))
}

async fn run(utc_offset: UtcOffset) -> Result<()> {
    let config = DaemonConfig::from_env().context("invalid configuration")?;
    info!(
        role = %config.role,
        peer = %config.peer,
        api = %config.api_addr,
        window = config.window_size,
        "Starting fitalarm daemon"
    );

    let shutdown = CancellationToken::new();

    let channel = TcpChannel::start(config.peer, shutdown.clone())
        .await
        .context("failed to start peer link")?;

    let mut settings = config.endpoint_settings();
    settings.utc_offset = utc_offset;
    let (endpoint, handle) = Endpoint::new(settings, Box::new(channel), Box::new(LogFeedback::new()))?;
    let endpoint_task = tokio::spawn(endpoint.run(shutdown.clone()));

    if let Some(alarm) = config.initial_alarm.clone() {
        let state = handle.arm(alarm).await.context("failed to arm on startup")?;
        info!(state = %state, "Armed from environment");
    }

    let mut api_task = tokio::spawn(api::serve(
        config.api_addr,
        SharedState::new(handle),
        shutdown.clone(),
    ));

    let api_finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Shutdown requested");
            None
        }
        result = &mut api_task => Some(result),
    };

    shutdown.cancel();

    let api_result = match api_finished {
        Some(result) => result,
        None => api_task.await,
    };
    match api_result {
        Ok(Err(e)) => error!(error = %e, "Control API failed"),
        Err(e) => error!(error = %e, "Control API task failed"),
        Ok(Ok(())) => {}
    }
    if let Err(e) = endpoint_task.await {
        error!(error = %e, "Endpoint task failed");
    }

    info!("fitalarm daemon stopped");
    Ok(())
}
