use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};

use crate::limits::*;
use crate::model::*;

use super::{wal_append, Engine, EngineError, WalCommand};

fn validate_pricing(pricing: &Pricing) -> Result<(), EngineError> {
    let prices = [pricing.base_price, pricing.cleaning_fee, pricing.service_fee];
    if prices.iter().any(|p| *p < 0) {
        return Err(EngineError::LimitExceeded("negative price"));
    }
    if prices.iter().any(|p| *p > MAX_PRICE) {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

impl Engine {
    pub async fn create_resource(
        &self,
        id: ResourceId,
        kind: ListingKind,
        name: Option<String>,
        capacity: u32,
        pricing: Option<Pricing>,
    ) -> Result<(), EngineError> {
        if self.state.len() >= MAX_RESOURCES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if let Some(ref n) = name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("resource name too long"));
        }
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(EngineError::LimitExceeded("capacity out of range"));
        }
        if let Some(ref p) = pricing {
            validate_pricing(p)?;
        }
        if let ListingKind::Event { date } = kind {
            super::conflict::day_span(date)?;
        }
        // Held until the event is durable and the listing is visible, so a
        // racing create of the same id sees it and compaction cannot drop it.
        let catalog = self.catalog_lock.clone().lock_owned().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            kind,
            name: name.clone(),
            capacity,
            pricing,
        };
        let wal_tx = self.wal_tx.clone();
        let state = self.state.clone();
        let notify = self.notify.clone();
        tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            let rs = ResourceState::new(id, kind, name, capacity, pricing);
            state.insert(id, Arc::new(RwLock::new(rs)));
            notify.send(id, &event);
            drop(catalog);
            Ok::<(), EngineError>(())
        })
        .await
        .map_err(|e| EngineError::TransactionFailure(format!("create task failed: {e}")))??;
        tracing::info!("created {} resource {id}", kind.label());
        Ok(())
    }

    /// Set or replace the pricing record of a listing.
    pub async fn set_pricing(&self, id: ResourceId, pricing: Pricing) -> Result<(), EngineError> {
        validate_pricing(&pricing)?;
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotBookable(id))?;
        let guard = self.lock_resource(rs).await?;
        if guard.deleted {
            return Err(EngineError::ResourceNotBookable(id));
        }
        self.commit(guard, Event::PricingSet { id, pricing }).await
    }

    /// Delete a listing. Refused while it still owns reservations.
    pub async fn delete_resource(&self, id: ResourceId) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&id)
            .ok_or(EngineError::ResourceNotBookable(id))?;
        let guard = self.lock_resource(rs).await?;
        if guard.deleted {
            return Err(EngineError::ResourceNotBookable(id));
        }
        if !guard.reservations.is_empty() {
            return Err(EngineError::HasReservations(id));
        }
        // The guard marks the state deleted before it is released, so admissions
        // queued on this lock see the flag and back off.
        self.commit(guard, Event::ResourceDeleted { id }).await?;
        self.state.remove(&id);
        self.notify.remove(&id);
        tracing::info!("deleted resource {id}");
        Ok(())
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state.
    ///
    /// Every listing stays read-locked (and creates stay blocked) until the
    /// writer has swapped the log, so no commit can land in the old log after
    /// its listing was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let catalog = self.catalog_lock.clone().lock_owned().await;
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(handles.len());
        for rs in handles {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in guards.iter().filter(|g| !g.deleted) {
            events.push(Event::ResourceCreated {
                id: guard.id,
                kind: guard.kind,
                name: guard.name.clone(),
                capacity: guard.capacity,
                pricing: guard.pricing,
            });
            for reservation in &guard.reservations {
                events.push(Event::ReservationAdmitted {
                    reservation: reservation.clone(),
                });
            }
        }

        let wal_tx = self.wal_tx.clone();
        tokio::spawn(async move {
            let (tx, rx) = oneshot::channel();
            wal_tx
                .send(WalCommand::Compact { events, response: tx })
                .await
                .map_err(|_| EngineError::TransactionFailure("WAL writer shut down".into()))?;
            let result = rx
                .await
                .map_err(|_| EngineError::TransactionFailure("WAL writer dropped response".into()))?
                .map_err(|e| EngineError::TransactionFailure(format!("WAL compaction: {e}")));
            drop(guards);
            drop(catalog);
            result
        })
        .await
        .map_err(|e| EngineError::TransactionFailure(format!("compaction task failed: {e}")))?
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
