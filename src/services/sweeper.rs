use crate::{errors::PipelineResult, services::temp_store::TempStore};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::time::{MissedTickBehavior, interval};

/// Reclaims staged uploads that were never committed or discarded.
#[derive(Clone)]
pub struct TempSweeper {
    store: TempStore,
    period: Duration,
}

impl TempSweeper {
    pub fn new(store: TempStore, period: Duration) -> Self {
        Self { store, period }
    }

    /// Start the background sweep. Returns a JoinHandle for shutdown.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::error!(error = %e, "temp sweep failed");
                }
            }
        })
    }

    /// Remove every expired temp asset now.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> PipelineResult<usize> {
        let swept = self.store.sweep_expired(Utc::now()).await?;
        if swept > 0 {
            tracing::info!(swept, "reclaimed expired uploads");
        } else {
            tracing::debug!("no expired uploads");
        }
        Ok(swept)
    }
}
