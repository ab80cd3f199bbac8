//! Background delivery loop — a tokio interval that fires the dispatcher
//! whenever the configured schedule comes due.
//!
//! The loop is only a trigger. All processing authority lives in the
//! persisted capsule status, so overlapping triggers (or a second service
//! instance) are safe: the conditional claims decide who does the work.

use std::sync::Arc;

use chrono::Utc;

use legacyguard_core::config::DeliveryConfig;

use crate::dispatcher::Dispatcher;
use crate::schedule::CronSchedule;

/// Run the scheduled delivery loop until the process exits.
pub async fn run_delivery_loop(dispatcher: Arc<Dispatcher>, config: DeliveryConfig) {
    let schedule = match CronSchedule::parse(&config.schedule)
        .or_else(|| CronSchedule::parse("0 9 * * *"))
    {
        Some(s) => s,
        None => {
            tracing::error!("No usable delivery schedule, delivery loop not started");
            return;
        }
    };
    if CronSchedule::parse(&config.schedule).is_none() {
        tracing::warn!(
            "Invalid delivery schedule '{}', falling back to daily 09:00 UTC",
            config.schedule
        );
    }

    let mut next_run = schedule.next_after(Utc::now());
    tracing::info!(
        "⏰ Delivery loop started (schedule '{}', next pass at {})",
        config.schedule,
        next_run.map(|t| t.to_rfc3339()).unwrap_or_else(|| "never".into()),
    );

    let mut interval =
        tokio::time::interval(std::time::Duration::from_secs(config.check_interval_secs.max(1)));

    loop {
        interval.tick().await;

        let due = matches!(next_run, Some(t) if Utc::now() >= t);
        if !due {
            continue;
        }

        match dispatcher.run_pass().await {
            Ok(report) => {
                if report.unlocked > 0 || report.delivered > 0 || !report.failures.is_empty() {
                    tracing::info!(
                        "📣 Scheduled pass: {} unlocked, {} delivered, {} sent, {} failed",
                        report.unlocked,
                        report.delivered,
                        report.notifications_sent,
                        report.notifications_failed,
                    );
                }
            }
            Err(e) => tracing::error!("Scheduled pass aborted: {e}"),
        }

        next_run = schedule.next_after(Utc::now());
    }
}
