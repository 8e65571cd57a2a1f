//! Periodic housekeeping.
//!
//! Runs on its own ticker, independent of the session engine: image-cache
//! eviction using the configured limits, expired refresh-token cleanup,
//! and a passive WAL checkpoint. Takes no lock beyond ordinary store
//! transactions.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use opsdec_db::pool::{checkpoint_passive, get_conn};
use opsdec_db::queries::{refresh_tokens, settings};

use crate::context::AppContext;

/// Sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

pub async fn run_job_runner(ctx: AppContext, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    tracing::info!("Job runner started (sweep every {SWEEP_INTERVAL:?})");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = run_sweep(&ctx) {
            tracing::error!("Housekeeping sweep failed: {e}");
        }
    }

    tracing::info!("Job runner stopped");
}

fn run_sweep(ctx: &AppContext) -> opsdec_core::Result<()> {
    let conn = get_conn(&ctx.db)?;

    let max_age = settings::get_setting_i64(&conn, "image_cache_max_age_secs", 2_592_000)?;
    let max_size = settings::get_setting_i64(&conn, "image_cache_max_size_bytes", 524_288_000)?;

    let evicted = ctx.images.evict(max_age, max_size)?;
    if evicted.removed_by_age + evicted.removed_by_lru > 0 {
        tracing::info!(
            by_age = evicted.removed_by_age,
            by_lru = evicted.removed_by_lru,
            "Image cache sweep"
        );
    }

    let expired = refresh_tokens::delete_expired(&conn, &chrono::Utc::now().to_rfc3339())?;
    if expired > 0 {
        tracing::info!(expired, "Removed expired refresh tokens");
    }

    checkpoint_passive(&conn)?;
    Ok(())
}
