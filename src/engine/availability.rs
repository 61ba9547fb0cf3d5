use chrono::NaiveDate;

use crate::model::*;

// ── Occupancy sweep ──────────────────────────────────────────────

/// Sweep weighted allocations into maximal segments of constant occupancy
/// covering `window` exactly (zero-occupancy segments included).
///
/// Allocations are half-open, so one ending on day D and another starting on
/// day D never add up.
pub fn occupancy(allocs: &[(DateSpan, u32)], window: &DateSpan) -> Vec<(DateSpan, u32)> {
    let mut deltas: Vec<(NaiveDate, i64)> = Vec::with_capacity(allocs.len() * 2);
    for (span, seats) in allocs {
        if let Some(clamped) = span.clamp_to(window) {
            deltas.push((clamped.start, i64::from(*seats)));
            deltas.push((clamped.end, -i64::from(*seats)));
        }
    }
    deltas.sort_by_key(|(date, _)| *date);

    let mut segments = Vec::new();
    let mut level: i64 = 0;
    let mut cursor = window.start;
    let mut i = 0;
    while i < deltas.len() {
        let at = deltas[i].0;
        let mut next = level;
        while i < deltas.len() && deltas[i].0 == at {
            next += deltas[i].1;
            i += 1;
        }
        if next != level {
            if at > cursor {
                push_segment(&mut segments, DateSpan::new(cursor, at), level);
                cursor = at;
            }
            level = next;
        }
    }
    if cursor < window.end {
        push_segment(&mut segments, DateSpan::new(cursor, window.end), level);
    }
    segments
}

fn push_segment(segments: &mut Vec<(DateSpan, u32)>, span: DateSpan, level: i64) {
    let level = level.max(0) as u32;
    if let Some(last) = segments.last_mut()
        && last.1 == level
        && last.0.end == span.start
    {
        last.0.end = span.end;
        return;
    }
    segments.push((span, level));
}

/// Highest number of seats taken on any day of `window`.
pub fn peak_occupancy(allocs: &[(DateSpan, u32)], window: &DateSpan) -> u32 {
    occupancy(allocs, window)
        .iter()
        .map(|(_, level)| *level)
        .max()
        .unwrap_or(0)
}

/// Seat-weighted allocations of a listing that touch `window`.
/// A stay reservation occupies the whole stay regardless of guest count.
pub fn collect_allocs(rs: &ResourceState, window: &DateSpan) -> Vec<(DateSpan, u32)> {
    rs.overlapping(window)
        .map(|r| {
            let seats = match rs.kind {
                ListingKind::Stay => 1,
                ListingKind::Event { .. } | ListingKind::Experience => r.guests,
            };
            (r.span(), seats)
        })
        .collect()
}

/// Seats a listing can hold on any single day.
pub fn effective_capacity(rs: &ResourceState) -> u32 {
    match rs.kind {
        ListingKind::Stay => 1,
        ListingKind::Event { .. } | ListingKind::Experience => rs.capacity,
    }
}

/// Openings for a listing inside `window`: spans with at least one free seat,
/// split wherever the number of free seats changes.
pub fn openings(rs: &ResourceState, window: &DateSpan) -> Vec<Opening> {
    let window = match rs.kind {
        ListingKind::Event { date } => match DateSpan::day(date).and_then(|d| d.clamp_to(window)) {
            Some(w) => w,
            None => return Vec::new(),
        },
        ListingKind::Stay | ListingKind::Experience => *window,
    };
    let capacity = effective_capacity(rs);
    let allocs = collect_allocs(rs, &window);

    let mut result: Vec<Opening> = Vec::new();
    for (span, level) in occupancy(&allocs, &window) {
        let remaining = capacity.saturating_sub(level);
        if remaining == 0 {
            continue;
        }
        result.push(Opening { span, remaining });
    }
    result
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

    fn reservation(resource_id: ResourceId, kind: BookingKind, a: &str, b: &str, guests: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            resource_id,
            guest_id: 1,
            kind,
            check_in: d(a),
            check_out: d(b),
            nights: span(a, b).nights() as u32,
            guests,
            total: 0,
            note: None,
            created_at: 0,
        }
    }

    #[test]
    fn occupancy_empty_is_one_free_segment() {
        let w = span("2025-01-01", "2025-02-01");
        assert_eq!(occupancy(&[], &w), vec![(w, 0)]);
    }

    #[test]
    fn occupancy_back_to_back_does_not_stack() {
        let allocs = [
            (span("2025-01-01", "2025-01-05"), 1),
            (span("2025-01-05", "2025-01-10"), 1),
        ];
        let w = span("2025-01-01", "2025-01-10");
        assert_eq!(occupancy(&allocs, &w), vec![(w, 1)]);
    }

    #[test]
    fn occupancy_overlap_stacks() {
        let allocs = [
            (span("2025-01-01", "2025-01-05"), 2),
            (span("2025-01-03", "2025-01-08"), 3),
        ];
        let w = span("2024-12-30", "2025-01-10");
        assert_eq!(
            occupancy(&allocs, &w),
            vec![
                (span("2024-12-30", "2025-01-01"), 0),
                (span("2025-01-01", "2025-01-03"), 2),
                (span("2025-01-03", "2025-01-05"), 5),
                (span("2025-01-05", "2025-01-08"), 3),
                (span("2025-01-08", "2025-01-10"), 0),
            ]
        );
        assert_eq!(peak_occupancy(&allocs, &w), 5);
    }

    #[test]
    fn occupancy_clips_to_window() {
        let allocs = [(span("2025-01-01", "2025-03-01"), 1)];
        let w = span("2025-02-01", "2025-02-10");
        assert_eq!(occupancy(&allocs, &w), vec![(w, 1)]);
    }

    #[test]
    fn peak_ignores_allocations_outside_window() {
        let allocs = [(span("2025-01-01", "2025-01-05"), 9)];
        assert_eq!(peak_occupancy(&allocs, &span("2025-01-05", "2025-01-06")), 0);
    }

    #[test]
    fn stay_openings_are_gaps_between_reservations() {
        let mut rs = ResourceState::new(1, ListingKind::Stay, None, 4, None);
        rs.insert_reservation(reservation(1, BookingKind::Stay, "2025-01-03", "2025-01-06", 3));
        rs.insert_reservation(reservation(1, BookingKind::Stay, "2025-01-06", "2025-01-08", 1));
        let open = openings(&rs, &span("2025-01-01", "2025-01-15"));
        assert_eq!(
            open,
            vec![
                Opening { span: span("2025-01-01", "2025-01-03"), remaining: 1 },
                Opening { span: span("2025-01-08", "2025-01-15"), remaining: 1 },
            ]
        );
    }

    #[test]
    fn experience_openings_report_remaining_seats() {
        let mut rs = ResourceState::new(2, ListingKind::Experience, None, 10, None);
        rs.insert_reservation(reservation(2, BookingKind::Experience, "2025-04-02", "2025-04-03", 4));
        rs.insert_reservation(reservation(2, BookingKind::Experience, "2025-04-03", "2025-04-04", 10));
        let open = openings(&rs, &span("2025-04-01", "2025-04-05"));
        assert_eq!(
            open,
            vec![
                Opening { span: span("2025-04-01", "2025-04-02"), remaining: 10 },
                Opening { span: span("2025-04-02", "2025-04-03"), remaining: 6 },
                Opening { span: span("2025-04-04", "2025-04-05"), remaining: 10 },
            ]
        );
    }

    #[test]
    fn event_openings_only_on_event_date() {
        let date = d("2025-07-14");
        let mut rs = ResourceState::new(3, ListingKind::Event { date }, None, 100, None);
        rs.insert_reservation(reservation(3, BookingKind::Event, "2025-07-14", "2025-07-15", 30));

        let open = openings(&rs, &span("2025-07-01", "2025-08-01"));
        assert_eq!(open, vec![Opening { span: span("2025-07-14", "2025-07-15"), remaining: 70 }]);

        assert!(openings(&rs, &span("2025-08-01", "2025-09-01")).is_empty());
    }
}
