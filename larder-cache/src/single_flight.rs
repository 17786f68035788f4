//! Per-key single-flight locks.
//!
//! Holds one async mutex per storage id with a generation in flight. A caller
//! that arrives while another is regenerating the same id waits, then re-reads
//! storage and finds the fresh entry instead of producing a duplicate.
//!
//! Entries are removed from the table when the last holder or waiter leaves,
//! so the table only ever contains ids with work in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use larder_core::{LarderResult, StorageError, StorageId};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Table of in-flight generations keyed by storage id.
#[derive(Debug, Default)]
pub struct SingleFlight {
    flights: Mutex<HashMap<StorageId, Arc<AsyncMutex<()>>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other caller holds `id`, then hold it until the guard drops.
    pub async fn acquire(self: &Arc<Self>, id: &StorageId) -> LarderResult<FlightGuard> {
        let lock = {
            let mut flights = self.flights.lock().map_err(|_| StorageError::LockPoisoned)?;
            Arc::clone(flights.entry(id.clone()).or_default())
        };

        let permit = Arc::clone(&lock).lock_owned().await;

        Ok(FlightGuard {
            table: Arc::clone(self),
            id: id.clone(),
            lock,
            permit: Some(permit),
        })
    }

    /// Number of ids with a holder or waiter.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().map(|f| f.len()).unwrap_or(0)
    }
}

/// Exclusive hold on one storage id.
#[derive(Debug)]
pub struct FlightGuard {
    table: Arc<SingleFlight>,
    id: StorageId,
    lock: Arc<AsyncMutex<()>>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // Release before inspecting the count so the permit's Arc is gone.
        drop(self.permit.take());

        if let Ok(mut flights) = self.table.flights.lock() {
            // One reference in the table, one here: nobody else is waiting.
            if Arc::strong_count(&self.lock) == 2 {
                flights.remove(&self.id);
            }
        }
    }
}
