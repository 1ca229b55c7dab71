//! Background tasks: the Archivist poll loop and the nightly Relationship
//! Engine timer. A `tokio::spawn` + `sleep`-driven loop; per-cycle errors
//! are logged and swallowed rather than killing the task.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike};
use tracing::{error, info};

use umg_core::{Archivist, FastEmbedService, OpenAiLlmClient, RedbStorage, RelationshipEngine, RunMode};

const DRAIN_BATCH_SIZE: usize = 50;

/// Drains pending events on a fixed interval, then feeds each processed
/// event's touched entities into an incremental Relationship Engine run —
/// "Archivist finishing an event enqueues the event id into the
/// Relationship Engine incremental queue". A single
/// in-process task is sufficient at this scale.
pub fn spawn_archivist_loop(
    archivist: Arc<Archivist<RedbStorage, OpenAiLlmClient, FastEmbedService>>,
    relationship_engine: Arc<RelationshipEngine<RedbStorage, OpenAiLlmClient, FastEmbedService>>,
    poll_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match archivist.drain_pending(DRAIN_BATCH_SIZE).await {
                Ok(results) => {
                    for result in &results {
                        if result.trigger_entity_ids.is_empty() {
                            continue;
                        }
                        match relationship_engine
                            .run(RunMode::Incremental, &result.trigger_entity_ids)
                            .await
                        {
                            Ok(run) => info!(
                                "incremental relationship run for event {}: +{} edges, {} reinforced",
                                result.event_id, run.edges_created, run.edges_updated
                            ),
                            Err(e) => error!("incremental relationship run failed: {e}"),
                        }
                    }
                }
                Err(e) => error!("archivist drain failed: {e}"),
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}

/// Sleeps until the next occurrence of `hour_local`, then runs a full
/// `Nightly` pass (all five strategies, then decay, then prune) once per
/// day, indefinitely.
pub fn spawn_nightly_loop(
    relationship_engine: Arc<RelationshipEngine<RedbStorage, OpenAiLlmClient, FastEmbedService>>,
    hour_local: u8,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(duration_until_next_hour(hour_local)).await;
            info!("starting nightly relationship engine run");
            match relationship_engine.run(RunMode::Nightly, &[]).await {
                Ok(run) => info!(
                    "nightly run complete: {} entities analyzed, +{} edges, {} reinforced, {} decayed, {} pruned",
                    run.entities_analyzed, run.edges_created, run.edges_updated, run.edges_decayed, run.edges_pruned
                ),
                Err(e) => error!("nightly relationship run failed: {e}"),
            }
        }
    })
}

fn duration_until_next_hour(hour_local: u8) -> Duration {
    let now = Local::now();
    let mut next = now
        .date_naive()
        .and_hms_opt(hour_local as u32, 0, 0)
        .expect("hour_local must be 0-23")
        .and_local_timezone(Local)
        .single()
        .unwrap_or_else(|| now);
    if next <= now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_until_next_hour_is_always_positive_and_at_most_a_day() {
        for hour in 0..24u8 {
            let d = duration_until_next_hour(hour);
            assert!(d > Duration::from_secs(0));
            assert!(d <= Duration::from_secs(24 * 3600));
        }
    }

    #[test]
    fn duration_until_current_hour_wraps_to_tomorrow() {
        let current_hour = Local::now().hour() as u8;
        let d = duration_until_next_hour(current_hour);
        // Same hour-of-day as "now" must roll forward ~24h, not be ~0.
        assert!(d > Duration::from_secs(60 * 60 * 23 - 120));
    }
}
