use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use sqlx::SqlitePool;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::db::queries::presence;

/// Periodically delete presence records whose owners vanished without a
/// close handler running (client crash, network partition). No events are
/// broadcast: nobody is connected on behalf of those records.
pub async fn run_presence_sweeper(
    db: SqlitePool,
    interval: Duration,
    stale_after: TimeDelta,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first sweep happens one interval in.
    ticker.tick().await;

    info!(interval_secs = interval.as_secs(), stale_secs = stale_after.num_seconds(), "presence sweeper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("presence sweeper shutting down");
                break;
            }
            _ = ticker.tick() => {
                if let Err(e) = sweep_once(&db, stale_after).await {
                    error!(error = %e, "presence sweep failed");
                }
            }
        }
    }
}

/// Remove every presence record older than `stale_after`. Returns the count removed.
pub async fn sweep_once(db: &SqlitePool, stale_after: TimeDelta) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now()
        .checked_sub_signed(stale_after)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let removed = presence::sweep_stale(db, cutoff).await?;
    if removed > 0 {
        info!(removed, "swept stale presence records");
    } else {
        debug!("presence sweep found nothing stale");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::{create_pool, run_migrations};
    use crate::db::queries::rooms;

    async fn setup_db() -> SqlitePool {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn test_sweep_once_respects_timeout() {
        let pool = setup_db().await;
        let room = rooms::get_or_create_room(&pool, "open-sesame").await.unwrap();
        presence::upsert_presence(&pool, room.id, None, "ghost").await.unwrap();
        presence::upsert_presence(&pool, room.id, None, "here").await.unwrap();
        sqlx::query("UPDATE active_users SET last_seen = ? WHERE username = 'ghost'")
            .bind(Utc::now() - TimeDelta::minutes(6))
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(sweep_once(&pool, TimeDelta::minutes(5)).await.unwrap(), 1);

        let left = presence::list_active(&pool, room.id).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].username, "here");
    }

    #[tokio::test]
    async fn test_unbounded_timeout_sweeps_nothing() {
        let pool = setup_db().await;
        let room = rooms::get_or_create_room(&pool, "open-sesame").await.unwrap();
        presence::upsert_presence(&pool, room.id, None, "here").await.unwrap();

        assert_eq!(sweep_once(&pool, TimeDelta::MAX).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let pool = setup_db().await;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_presence_sweeper(
            pool,
            Duration::from_secs(3600),
            TimeDelta::minutes(5),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_ticks_in_background() {
        let pool = setup_db().await;
        let room = rooms::get_or_create_room(&pool, "open-sesame").await.unwrap();
        presence::upsert_presence(&pool, room.id, None, "ghost").await.unwrap();
        sqlx::query("UPDATE active_users SET last_seen = ? WHERE username = 'ghost'")
            .bind(Utc::now() - TimeDelta::minutes(10))
            .execute(&pool)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_presence_sweeper(
            pool.clone(),
            Duration::from_millis(20),
            TimeDelta::minutes(5),
            cancel.clone(),
        ));

        let mut swept = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if presence::count_active(&pool, room.id).await.unwrap() == 0 {
                swept = true;
                break;
            }
        }
        cancel.cancel();
        handle.await.unwrap();
        assert!(swept, "stale record should be swept by the background tick");
    }
}
