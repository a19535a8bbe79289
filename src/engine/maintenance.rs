use tokio::sync::oneshot;
use tracing::debug;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

impl Engine {
    /// Delete every record whose expiry has elapsed, whatever its status.
    /// One commit per slot set; emptied partitions are dropped afterwards.
    pub async fn sweep_expired(&self) -> Result<usize, EngineError> {
        let now = self.clock.now_ms();
        let mut swept = 0;

        for key in self.slots.keys() {
            let Some(mut txn) = self.slots.begin_existing(&key).await else {
                continue;
            };
            let expired: Vec<Ulid> = txn
                .find()
                .iter()
                .filter(|r| effective_status(r, now) == EffectiveStatus::Expired)
                .map(|r| r.id)
                .collect();
            if !expired.is_empty() {
                for id in &expired {
                    txn.delete(*id);
                }
                self.commit(txn, None).await?;
                debug!("swept {} expired records from {key}", expired.len());
                swept += expired.len();
            } else {
                drop(txn);
            }
            self.slots.prune(&key);
        }

        if swept > 0 {
            metrics::counter!(crate::observability::SWEPT_RECORDS_TOTAL).increment(swept as u64);
        }
        Ok(swept)
    }

    /// Rewrite the WAL with only the commits needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                at: self.clock.now_ms(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::DependencyFailure("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::DependencyFailure("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::DependencyFailure(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
