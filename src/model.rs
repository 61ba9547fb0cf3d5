use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for instants (creation time).
pub type Ms = i64;

/// Amount in the currency's minor unit.
pub type Money = i64;

pub type ResourceId = i64;
pub type GuestId = i64;

/// Half-open interval of calendar dates `[start, end)`.
///
/// Dates are timezone-naive: a check-out on day D and a check-in on day D
/// touch but never overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateSpan {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateSpan {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start < end, "DateSpan start must be before end");
        Self { start, end }
    }

    /// The single day `[date, date + 1)`. None only at `NaiveDate::MAX`.
    pub fn day(date: NaiveDate) -> Option<Self> {
        date.succ_opt().map(|next| Self::new(date, next))
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateSpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    /// Intersection of two spans, None if they do not overlap.
    pub fn clamp_to(&self, other: &DateSpan) -> Option<DateSpan> {
        self.overlaps(other)
            .then(|| DateSpan::new(self.start.max(other.start), self.end.min(other.end)))
    }
}

/// Pricing record owned by a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Per night for stays, per seat for events and experiences.
    pub base_price: Money,
    pub cleaning_fee: Money,
    pub service_fee: Money,
}

/// What a listing is. Decides which booking request variant it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingKind {
    /// Exclusive date-range rental; capacity is max guests per reservation.
    Stay,
    /// Single-date event; capacity is total seats.
    Event { date: NaiveDate },
    /// Bookable on any day; capacity is seats per day.
    Experience,
}

impl ListingKind {
    pub fn label(&self) -> &'static str {
        match self {
            ListingKind::Stay => "stay",
            ListingKind::Event { .. } => "event",
            ListingKind::Experience => "experience",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingKind {
    Stay,
    Event,
    Experience,
}

impl BookingKind {
    pub fn label(&self) -> &'static str {
        match self {
            BookingKind::Stay => "stay",
            BookingKind::Event => "event",
            BookingKind::Experience => "experience",
        }
    }
}

/// An admission request. Each variant carries exactly the fields its
/// listing kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookingRequest {
    Stay {
        resource_id: ResourceId,
        guest_id: GuestId,
        check_in: NaiveDate,
        check_out: NaiveDate,
        guests: u32,
        note: Option<String>,
    },
    Event {
        resource_id: ResourceId,
        guest_id: GuestId,
        tickets: u32,
        note: Option<String>,
    },
    Experience {
        resource_id: ResourceId,
        guest_id: GuestId,
        date: NaiveDate,
        participants: u32,
        note: Option<String>,
    },
}

impl BookingRequest {
    pub fn resource_id(&self) -> ResourceId {
        match self {
            BookingRequest::Stay { resource_id, .. }
            | BookingRequest::Event { resource_id, .. }
            | BookingRequest::Experience { resource_id, .. } => *resource_id,
        }
    }

    pub fn kind(&self) -> BookingKind {
        match self {
            BookingRequest::Stay { .. } => BookingKind::Stay,
            BookingRequest::Event { .. } => BookingKind::Event,
            BookingRequest::Experience { .. } => BookingKind::Experience,
        }
    }

    /// Guests, tickets or participants.
    pub fn seats(&self) -> u32 {
        match self {
            BookingRequest::Stay { guests, .. } => *guests,
            BookingRequest::Event { tickets, .. } => *tickets,
            BookingRequest::Experience { participants, .. } => *participants,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            BookingRequest::Stay { note, .. }
            | BookingRequest::Event { note, .. }
            | BookingRequest::Experience { note, .. } => note.as_deref(),
        }
    }
}

/// A committed claim on a listing. Never mutated after admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub resource_id: ResourceId,
    pub guest_id: GuestId,
    pub kind: BookingKind,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: u32,
    /// Guests for stays, seats for events and experiences.
    pub guests: u32,
    pub total: Money,
    pub note: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn span(&self) -> DateSpan {
        DateSpan::new(self.check_in, self.check_out)
    }
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: ResourceId,
    pub kind: ListingKind,
    pub name: Option<String>,
    pub capacity: u32,
    pub pricing: Option<Pricing>,
    /// Set under the write lock when the listing is deleted, so holders of a
    /// stale handle see it.
    pub deleted: bool,
    /// Sorted by `check_in`.
    pub reservations: Vec<Reservation>,
}

impl ResourceState {
    pub fn new(
        id: ResourceId,
        kind: ListingKind,
        name: Option<String>,
        capacity: u32,
        pricing: Option<Pricing>,
    ) -> Self {
        Self {
            id,
            kind,
            name,
            capacity,
            pricing,
            deleted: false,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.check_in <= reservation.check_in);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Reservations whose span overlaps the query window.
    /// Everything starting at or after `query.end` is skipped by binary search.
    pub fn overlapping(&self, query: &DateSpan) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.check_in < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.check_out > query.start)
    }
}

/// WAL record format. Flat, one variant per state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: ResourceId,
        kind: ListingKind,
        name: Option<String>,
        capacity: u32,
        pricing: Option<Pricing>,
    },
    PricingSet {
        id: ResourceId,
        pricing: Pricing,
    },
    ResourceDeleted {
        id: ResourceId,
    },
    ReservationAdmitted {
        reservation: Reservation,
    },
    ReservationCancelled {
        id: Ulid,
        resource_id: ResourceId,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: ResourceId,
    pub kind: ListingKind,
    pub name: Option<String>,
    pub capacity: u32,
    pub pricing: Option<Pricing>,
    pub reservation_count: usize,
}

/// A maximal available span with the seats still free on every day of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opening {
    pub span: DateSpan,
    pub remaining: u32,
}
