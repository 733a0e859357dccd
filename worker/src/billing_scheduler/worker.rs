use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::usecases::billing_run::BillingRunUseCase;

/// Fires one billing run per `interval`. Runs never overlap: a run that outlasts the
/// interval pushes the next tick back instead of queueing a burst.
pub async fn run(usecase: Arc<BillingRunUseCase>, interval: Duration) -> Result<()> {
    info!(interval_secs = interval.as_secs(), "billing_scheduler: starting loop");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let started = Utc::now();
        match usecase.run(started).await {
            Ok(summary) => {
                let elapsed_ms = (Utc::now() - started).num_milliseconds();
                info!(
                    due = summary.due,
                    charged = summary.charged,
                    demoted = summary.demoted,
                    elapsed_ms,
                    "billing_scheduler: run completed"
                );
            }
            Err(err) => {
                error!(error = %err, "billing_scheduler: run aborted before processing");
            }
        }
    }
}
