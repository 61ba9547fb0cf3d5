use std::time::Instant;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_RESERVATIONS_PER_RESOURCE;
use crate::model::*;

use super::conflict::{check_admissible, claimed_span, now_ms, validate_request};
use super::{Engine, EngineError, Status};

impl Engine {
    /// Admit a stay. Shorthand for [`Engine::admit`] with a `Stay` request.
    pub async fn admit_stay(
        &self,
        resource_id: ResourceId,
        guest_id: GuestId,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        note: Option<String>,
    ) -> Result<Reservation, EngineError> {
        self.admit(BookingRequest::Stay {
            resource_id,
            guest_id,
            check_in,
            check_out,
            guests,
            note,
        })
        .await
    }

    /// Validate, check and insert a reservation as one atomic unit.
    ///
    /// Validation runs before any storage access. The availability check and
    /// the insert both happen under the resource's write lock, so concurrent
    /// admissions on one resource are serialized and at most one of any set of
    /// overlapping stays commits. Every rejection leaves the store untouched.
    pub async fn admit(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        let kind = request.kind().label();
        let started = Instant::now();

        let result = self.admit_inner(request).await;

        let status = match &result {
            Ok(_) => Status::Created,
            Err(e) => e.status(),
        };
        metrics::counter!(
            crate::observability::ADMISSIONS_TOTAL,
            "kind" => kind,
            "status" => status.label()
        )
        .increment(1);
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS, "kind" => kind)
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(r) => tracing::debug!(
                "admitted {kind} reservation {} on resource {} [{}, {})",
                r.id,
                r.resource_id,
                r.check_in,
                r.check_out
            ),
            Err(e) => tracing::debug!("rejected {kind} admission ({}): {e}", status.code()),
        }
        result
    }

    async fn admit_inner(&self, request: BookingRequest) -> Result<Reservation, EngineError> {
        validate_request(&request)?;

        let resource_id = request.resource_id();
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::ResourceNotBookable(resource_id))?;
        let guard = self.lock_resource(rs).await?;

        // Re-read under the lock: the listing may have been deleted or changed
        // while we waited.
        if guard.deleted {
            return Err(EngineError::ResourceNotBookable(resource_id));
        }
        let pricing = guard
            .pricing
            .ok_or(EngineError::ResourceNotBookable(resource_id))?;
        let span = claimed_span(&guard, &request)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_RESOURCE {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        check_admissible(&guard, &span, request.seats())?;

        let reservation = build_reservation(request, span, &pricing);
        let event = Event::ReservationAdmitted {
            reservation: reservation.clone(),
        };
        self.commit(guard, event).await?;
        Ok(reservation)
    }

    /// Cancel a reservation, freeing its dates or seats.
    pub async fn cancel_reservation(&self, id: Ulid) -> Result<ResourceId, EngineError> {
        let (resource_id, guard) = self.resolve_reservation_write(&id).await?;
        // Another cancel may have won the race while we waited for the lock.
        if !guard.reservations.iter().any(|r| r.id == id) {
            return Err(EngineError::NotFound(id));
        }
        self.commit(guard, Event::ReservationCancelled { id, resource_id })
            .await?;
        Ok(resource_id)
    }
}

fn build_reservation(request: BookingRequest, span: DateSpan, pricing: &Pricing) -> Reservation {
    let kind = request.kind();
    let nights = span.nights() as u32;
    let (resource_id, guest_id, guests, note) = match request {
        BookingRequest::Stay {
            resource_id,
            guest_id,
            guests,
            note,
            ..
        } => (resource_id, guest_id, guests, note),
        BookingRequest::Event {
            resource_id,
            guest_id,
            tickets,
            note,
        } => (resource_id, guest_id, tickets, note),
        BookingRequest::Experience {
            resource_id,
            guest_id,
            participants,
            note,
            ..
        } => (resource_id, guest_id, participants, note),
    };
    let units = match kind {
        BookingKind::Stay => nights,
        BookingKind::Event | BookingKind::Experience => guests,
    };
    Reservation {
        id: Ulid::new(),
        resource_id,
        guest_id,
        kind,
        check_in: span.start,
        check_out: span.end,
        nights,
        guests,
        total: pricing.total_for(units),
        note,
        created_at: now_ms(),
    }
}
