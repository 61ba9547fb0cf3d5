use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::availability::{collect_allocs, effective_capacity, peak_occupancy};
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Parse an ISO-8601 calendar date (`YYYY-MM-DD`).
pub fn parse_date(s: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidDateRange(format!("bad date {s:?}: {e}")))
}

/// Parse a query window `[start, end)`. The end must come after the start.
pub fn parse_window(start: &str, end: &str) -> Result<DateSpan, EngineError> {
    let (start, end) = (parse_date(start)?, parse_date(end)?);
    if end <= start {
        return Err(EngineError::InvalidDateRange(format!(
            "window end {end} must be after start {start}"
        )));
    }
    Ok(DateSpan::new(start, end))
}

fn date_bounds() -> (NaiveDate, NaiveDate) {
    let (y, m, d) = MIN_VALID_DATE;
    let min = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    let (y, m, d) = MAX_VALID_DATE;
    let max = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MAX);
    (min, max)
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    let (min, max) = date_bounds();
    if date < min || date > max {
        return Err(EngineError::InvalidDateRange(format!(
            "{date} outside {min}..={max}"
        )));
    }
    Ok(())
}

/// Build a stay span from raw check-in/check-out, rejecting empty, inverted,
/// out-of-range and overlong ranges.
pub(crate) fn stay_span(check_in: NaiveDate, check_out: NaiveDate) -> Result<DateSpan, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::InvalidDateRange(format!(
            "check-out {check_out} must be after check-in {check_in}"
        )));
    }
    validate_date(check_in)?;
    validate_date(check_out)?;
    let span = DateSpan::new(check_in, check_out);
    if span.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::InvalidDateRange(format!(
            "{} nights exceeds maximum of {MAX_STAY_NIGHTS}",
            span.nights()
        )));
    }
    Ok(span)
}

pub(crate) fn day_span(date: NaiveDate) -> Result<DateSpan, EngineError> {
    validate_date(date)?;
    DateSpan::day(date).ok_or_else(|| EngineError::InvalidDateRange(format!("{date} has no next day")))
}

pub(crate) fn validate_window(window: &DateSpan) -> Result<(), EngineError> {
    validate_date(window.start)?;
    validate_date(window.end)?;
    if window.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

/// Checks that need no storage access. Runs before any lock is taken.
pub(crate) fn validate_request(request: &BookingRequest) -> Result<(), EngineError> {
    match request {
        BookingRequest::Stay {
            check_in, check_out, ..
        } => {
            stay_span(*check_in, *check_out)?;
        }
        BookingRequest::Experience { date, .. } => {
            day_span(*date)?;
        }
        BookingRequest::Event { .. } => {}
    }
    let seats = request.seats();
    if seats == 0 || seats > MAX_CAPACITY {
        return Err(EngineError::InvalidGuestCount {
            requested: seats,
            max: MAX_CAPACITY,
        });
    }
    if let Some(note) = request.note()
        && note.len() > MAX_NOTE_LEN
    {
        return Err(EngineError::LimitExceeded("note too long"));
    }
    Ok(())
}

/// Resolve the span a request claims on this listing. Fails if the request
/// variant does not fit the listing kind.
pub(crate) fn claimed_span(rs: &ResourceState, request: &BookingRequest) -> Result<DateSpan, EngineError> {
    match (&rs.kind, request) {
        (ListingKind::Stay, BookingRequest::Stay { check_in, check_out, .. }) => {
            stay_span(*check_in, *check_out)
        }
        (ListingKind::Event { date }, BookingRequest::Event { .. }) => day_span(*date),
        (ListingKind::Experience, BookingRequest::Experience { date, .. }) => day_span(*date),
        (kind, request) => Err(EngineError::KindMismatch {
            resource_id: rs.id,
            listing: kind.label(),
            requested: request.kind().label(),
        }),
    }
}

// ── Overlap detection ────────────────────────────────────────────

/// First reservation for `resource_id` whose `[check_in, check_out)` overlaps
/// the candidate. Reservations of other resources never conflict.
pub fn find_conflict<'a>(
    resource_id: ResourceId,
    candidate: &DateSpan,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> Option<&'a Reservation> {
    existing
        .into_iter()
        .find(|r| r.resource_id == resource_id && r.span().overlaps(candidate))
}

pub fn has_conflict<'a>(
    resource_id: ResourceId,
    candidate: &DateSpan,
    existing: impl IntoIterator<Item = &'a Reservation>,
) -> bool {
    find_conflict(resource_id, candidate, existing).is_some()
}

/// Decide whether `seats` more can be admitted on `span`. Caller holds the
/// resource write lock.
pub(crate) fn check_admissible(rs: &ResourceState, span: &DateSpan, seats: u32) -> Result<(), EngineError> {
    match rs.kind {
        ListingKind::Stay => {
            if seats > rs.capacity {
                return Err(EngineError::InvalidGuestCount {
                    requested: seats,
                    max: rs.capacity,
                });
            }
            if let Some(existing) = find_conflict(rs.id, span, rs.overlapping(span)) {
                return Err(EngineError::DoubleBooking {
                    resource_id: rs.id,
                    conflicting: existing.id,
                });
            }
        }
        ListingKind::Event { .. } | ListingKind::Experience => {
            let taken = peak_occupancy(&collect_allocs(rs, span), span);
            let remaining = effective_capacity(rs).saturating_sub(taken);
            if seats > remaining {
                return Err(EngineError::SoldOut {
                    resource_id: rs.id,
                    remaining,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn span(a: &str, b: &str) -> DateSpan {
        DateSpan::new(d(a), d(b))
    }

    fn stay_on(resource_id: ResourceId, a: &str, b: &str) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id,
            guest_id: 1,
            kind: BookingKind::Stay,
            check_in: d(a),
            check_out: d(b),
            nights: span(a, b).nights() as u32,
            guests: 1,
            total: 0,
            note: None,
            created_at: 0,
        }
    }

    #[test]
    fn no_existing_reservations_no_conflict() {
        assert!(!has_conflict(1, &span("2025-01-01", "2025-01-05"), &[]));
    }

    #[test]
    fn back_to_back_is_not_a_conflict() {
        let existing = [stay_on(1, "2025-01-01", "2025-01-05")];
        assert!(!has_conflict(1, &span("2025-01-05", "2025-01-10"), &existing));
        assert!(!has_conflict(1, &span("2024-12-28", "2025-01-01"), &existing));
    }

    #[test]
    fn contained_and_partial_overlaps_conflict() {
        let existing = [stay_on(1, "2025-01-01", "2025-01-05")];
        assert!(has_conflict(1, &span("2025-01-02", "2025-01-04"), &existing));
        assert!(has_conflict(1, &span("2024-12-30", "2025-01-02"), &existing));
        assert!(has_conflict(1, &span("2025-01-04", "2025-01-09"), &existing));
        assert!(has_conflict(1, &span("2024-12-01", "2025-02-01"), &existing));
    }

    #[test]
    fn other_resources_never_conflict() {
        let existing = [stay_on(2, "2025-01-01", "2025-01-05")];
        assert!(!has_conflict(1, &span("2025-01-01", "2025-01-05"), &existing));
    }

    #[test]
    fn find_conflict_names_the_reservation() {
        let existing = [
            stay_on(1, "2025-01-01", "2025-01-03"),
            stay_on(1, "2025-01-10", "2025-01-12"),
        ];
        let hit = find_conflict(1, &span("2025-01-11", "2025-01-13"), &existing);
        assert_eq!(hit.map(|r| r.id), Some(existing[1].id));
    }

    #[test]
    fn parse_date_accepts_iso() {
        assert_eq!(parse_date("2025-01-05").unwrap(), d("2025-01-05"));
        assert_eq!(parse_date(" 2025-01-05 ").unwrap(), d("2025-01-05"));
    }

    #[test]
    fn parse_date_rejects_garbage_identically() {
        let first = parse_date("2025-13-01");
        let second = parse_date("2025-13-01");
        assert!(matches!(first, Err(EngineError::InvalidDateRange(_))));
        assert_eq!(first, second);
        assert!(parse_date("01/05/2025").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn parse_window_requires_forward_range() {
        assert_eq!(
            parse_window("2025-01-01", "2025-02-01").unwrap(),
            span("2025-01-01", "2025-02-01")
        );
        assert!(matches!(
            parse_window("2025-02-01", "2025-02-01"),
            Err(EngineError::InvalidDateRange(_))
        ));
    }

    #[test]
    fn stay_span_rejects_empty_and_inverted() {
        assert!(matches!(
            stay_span(d("2025-01-05"), d("2025-01-05")),
            Err(EngineError::InvalidDateRange(_))
        ));
        assert!(matches!(
            stay_span(d("2025-01-05"), d("2025-01-01")),
            Err(EngineError::InvalidDateRange(_))
        ));
        assert_eq!(stay_span(d("2025-01-01"), d("2025-01-05")).unwrap().nights(), 4);
    }

    #[test]
    fn stay_span_rejects_out_of_range_and_overlong() {
        assert!(stay_span(d("1999-12-30"), d("2000-01-02")).is_err());
        assert!(stay_span(d("2199-12-30"), d("2200-01-02")).is_err());
        assert!(stay_span(d("2025-01-01"), d("2026-06-01")).is_err());
        assert!(stay_span(d("2025-01-01"), d("2026-01-01")).is_ok()); // 365 nights
    }

    #[test]
    fn validate_request_checks_guests_and_note() {
        let zero = BookingRequest::Event {
            resource_id: 1,
            guest_id: 1,
            tickets: 0,
            note: None,
        };
        assert!(matches!(
            validate_request(&zero),
            Err(EngineError::InvalidGuestCount { requested: 0, .. })
        ));

        let long_note = BookingRequest::Event {
            resource_id: 1,
            guest_id: 1,
            tickets: 1,
            note: Some("x".repeat(MAX_NOTE_LEN + 1)),
        };
        assert!(matches!(
            validate_request(&long_note),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn claimed_span_rejects_wrong_variant() {
        let rs = ResourceState::new(5, ListingKind::Experience, None, 10, None);
        let req = BookingRequest::Stay {
            resource_id: 5,
            guest_id: 1,
            check_in: d("2025-01-01"),
            check_out: d("2025-01-02"),
            guests: 1,
            note: None,
        };
        assert!(matches!(
            claimed_span(&rs, &req),
            Err(EngineError::KindMismatch { listing: "experience", requested: "stay", .. })
        ));
    }

    #[test]
    fn check_admissible_stay_guest_limit() {
        let rs = ResourceState::new(1, ListingKind::Stay, None, 2, None);
        let s = span("2025-01-01", "2025-01-02");
        assert!(check_admissible(&rs, &s, 2).is_ok());
        assert!(matches!(
            check_admissible(&rs, &s, 3),
            Err(EngineError::InvalidGuestCount { requested: 3, max: 2 })
        ));
    }

    #[test]
    fn check_admissible_capacity() {
        let mut rs = ResourceState::new(9, ListingKind::Experience, None, 6, None);
        let mut r = stay_on(9, "2025-03-03", "2025-03-04");
        r.kind = BookingKind::Experience;
        r.guests = 4;
        rs.insert_reservation(r);
        let s = span("2025-03-03", "2025-03-04");
        assert!(check_admissible(&rs, &s, 2).is_ok());
        assert_eq!(
            check_admissible(&rs, &s, 3),
            Err(EngineError::SoldOut { resource_id: 9, remaining: 2 })
        );
        // Next day is untouched.
        assert!(check_admissible(&rs, &span("2025-03-04", "2025-03-05"), 6).is_ok());
    }
}
