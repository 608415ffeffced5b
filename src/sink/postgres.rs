use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::db::repository;
use crate::handlers::context::EventSink;
use crate::records::Emission;

/// Persists emitted records to Postgres, one table per event name.
///
/// Duplicate distinct IDs are dropped by the database, so redelivered events
/// are harmless. Write failures are logged and counted; the runner checks the
/// count before advancing the checkpoint, so the range is processed again.
pub struct PgEventSink {
    pool: PgPool,
    failed: AtomicU64,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            failed: AtomicU64::new(0),
        }
    }

    async fn write(&self, event: &Emission) -> eyre::Result<u64> {
        match event {
            Emission::Transfer(r) => repository::insert_transfer(&self.pool, r).await,
            Emission::BalanceUpdate(r) => repository::insert_balance_update(&self.pool, r).await,
            Emission::TotalSupply(r) => repository::insert_supply_snapshot(&self.pool, r).await,
            Emission::Error(r) => repository::insert_error(&self.pool, r).await.map(|_| 1),
        }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn emit(&self, event: Emission) {
        match self.write(&event).await {
            Ok(0) => {
                tracing::debug!(
                    event = event.name(),
                    distinct_id = ?event.distinct_id(),
                    "Duplicate record ignored"
                );
            }
            Ok(_) => {}
            Err(e) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(
                    event = event.name(),
                    distinct_id = ?event.distinct_id(),
                    error = %e,
                    "Failed to persist record"
                );
            }
        }
    }

    fn take_failures(&self) -> u64 {
        self.failed.swap(0, Ordering::SeqCst)
    }
}
