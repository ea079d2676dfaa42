//! Background maintenance tasks

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::auth::ClaimsService;
use crate::state::AppState;

/// Spawn the periodic claims sweep
///
/// The first pass runs at startup, then once per configured interval. The
/// returned handle is aborted on shutdown.
pub fn spawn_claims_sweep(state: AppState) -> JoinHandle<()> {
    let hours = state.config().claims.sweep_interval_hours.max(1);

    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(hours * 60 * 60));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = run_claims_sweep(&state).await {
                tracing::error!("Scheduled claims sweep failed: {:#}", e);
            }
        }
    })
}

async fn run_claims_sweep(state: &AppState) -> Result<()> {
    let report = ClaimsService::new(state.db())
        .cleanup(state.config().claims.max_age_hours, "scheduler")
        .await?;

    tracing::info!(
        "Scheduled claims sweep: processed {}, updated {}, errors {}",
        report.processed,
        report.updated,
        report.errors
    );

    Ok(())
}
