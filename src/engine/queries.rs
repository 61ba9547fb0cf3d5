use ulid::Ulid;

use crate::model::*;

use super::availability::openings;
use super::conflict::validate_window;
use super::{Engine, EngineError};

impl Engine {
    /// Open date spans of a listing inside `window`, with seats left on each.
    pub async fn compute_availability(
        &self,
        resource_id: ResourceId,
        window: DateSpan,
        min_nights: Option<u32>,
    ) -> Result<Vec<Opening>, EngineError> {
        validate_window(&window)?;
        let rs = match self.get_resource(&resource_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let guard = rs.read().await;
        if guard.deleted {
            return Ok(vec![]);
        }

        let mut open = openings(&guard, &window);
        if let Some(min) = min_nights {
            open.retain(|o| o.span.nights() >= i64::from(min));
        }
        Ok(open)
    }

    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let handles: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(handles.len());
        for rs in handles {
            let guard = rs.read().await;
            if guard.deleted {
                continue;
            }
            out.push(ResourceInfo {
                id: guard.id,
                kind: guard.kind,
                name: guard.name.clone(),
                capacity: guard.capacity,
                pricing: guard.pricing,
                reservation_count: guard.reservations.len(),
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn get_reservations(&self, resource_id: ResourceId) -> Vec<Reservation> {
        match self.get_resource(&resource_id) {
            Some(rs) => rs.read().await.reservations.clone(),
            None => vec![],
        }
    }

    pub async fn get_reservation(&self, id: Ulid) -> Option<Reservation> {
        let resource_id = self.get_resource_for_reservation(&id)?;
        let rs = self.get_resource(&resource_id)?;
        let guard = rs.read().await;
        guard.reservations.iter().find(|r| r.id == id).cloned()
    }
}
