//! Time-series construction from an ordered visit log.
//!
//! Visits arrive sorted by `(visited_at, id)` ascending; that order is the
//! ground truth for first-time status. Buckets are UTC calendar days or
//! months, and missing periods between the first and last visit are filled
//! with zero counts so the series is contiguous.

use chrono::{DateTime, Datelike, Months, NaiveDate};
use std::collections::BTreeMap;
use std::collections::HashSet;
use tracing::warn;

use crate::error::{CoreError, CoreResult};
use crate::models::Visit;
use crate::stats::models::{Granularity, SeriesPoint};

/// First-time flag per visit, positionally aligned with `visits`.
///
/// A visit is first-time iff its tracking id has not appeared earlier in the
/// link's history. Visits without a tracking id (pre-backfill rows whose
/// source was scrubbed) are never first-time.
pub fn first_time_flags(visits: &[Visit]) -> Vec<bool> {
    let mut seen: HashSet<&str> = HashSet::new();
    visits
        .iter()
        .map(|visit| match visit.tracking_id.as_deref() {
            Some(id) => seen.insert(id),
            None => false,
        })
        .collect()
}

/// UTC calendar bucket containing the timestamp, as the bucket's first day.
/// `None` when the timestamp is outside chrono's representable range.
pub fn bucket_start(visited_at: i64, granularity: Granularity) -> Option<NaiveDate> {
    let date = DateTime::from_timestamp(visited_at, 0)?.date_naive();
    Some(match granularity {
        Granularity::Day => date,
        Granularity::Month => date.with_day(1).unwrap_or(date),
    })
}

fn next_bucket(start: NaiveDate, granularity: Granularity) -> Option<NaiveDate> {
    match granularity {
        Granularity::Day => start.succ_opt(),
        Granularity::Month => start.checked_add_months(Months::new(1)),
    }
}

fn period_label(start: NaiveDate, granularity: Granularity) -> String {
    match granularity {
        Granularity::Day => start.format("%Y-%m-%d").to_string(),
        Granularity::Month => start.format("%Y-%m").to_string(),
    }
}

/// Build the contiguous, gap-filled series for a link's visit log.
///
/// `flags` must be the [`first_time_flags`] of the full, unfiltered log; the
/// alias filter then selects which visits are counted, so a repeat visitor
/// never turns first-time again inside a filtered view.
pub fn build_series(
    visits: &[Visit],
    flags: &[bool],
    alias: Option<&str>,
    granularity: Granularity,
) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<NaiveDate, (u64, u64)> = BTreeMap::new();

    for (visit, &first_time) in visits.iter().zip(flags) {
        if let Some(wanted) = alias {
            if visit.alias.as_deref() != Some(wanted) {
                continue;
            }
        }
        // A timestamp no calendar date can hold would otherwise anchor the
        // gap-filled series at some absurd endpoint; leave the row out.
        let Some(start) = bucket_start(visit.visited_at, granularity) else {
            warn!(
                visit_id = visit.id,
                visited_at = visit.visited_at,
                "timestamp outside calendar range, visit left out of series"
            );
            continue;
        };
        let entry = buckets.entry(start).or_insert((0, 0));
        entry.0 += 1;
        if first_time {
            entry.1 += 1;
        }
    }

    let (Some(&first), Some(&last)) = (
        buckets.keys().next(),
        buckets.keys().next_back(),
    ) else {
        return Vec::new();
    };

    // Zero-fill strictly between the first and last real data points.
    let mut series = Vec::new();
    let mut cursor = first;
    loop {
        let (total_visits, first_time_visits) = buckets.get(&cursor).copied().unwrap_or((0, 0));
        series.push(SeriesPoint {
            period: period_label(cursor, granularity),
            total_visits,
            first_time_visits,
        });
        if cursor == last {
            break;
        }
        match next_bucket(cursor, granularity) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    series
}

/// Half-open `[start, end)` slice of the series by period index. Inverted or
/// empty requests are `InvalidRange`; indices past the end clamp to the
/// series length.
pub fn select_range(
    series: Vec<SeriesPoint>,
    range: Option<(usize, usize)>,
) -> CoreResult<Vec<SeriesPoint>> {
    let Some((start, end)) = range else {
        return Ok(series);
    };

    if end <= start {
        return Err(CoreError::InvalidRange);
    }

    let start = start.min(series.len());
    let end = end.min(series.len());
    Ok(series[start..end].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn visit(id: i64, alias: &str, tracking_id: Option<&str>, visited_at: i64) -> Visit {
        Visit {
            id,
            link_id: "L1".to_string(),
            alias: Some(alias.to_string()),
            tracking_id: tracking_id.map(str::to_string),
            source_address: None,
            user_agent: None,
            referer: None,
            country_code: None,
            region_code: None,
            visited_at,
            schema_version: 3,
        }
    }

    // 2026-01-01T12:00:00Z plus whole days.
    fn day(n: i64) -> i64 {
        1_767_268_800 + n * 86_400
    }

    #[test]
    fn first_time_is_one_per_tracking_id() {
        let visits = vec![
            visit(1, "abc", Some("T1"), day(0)),
            visit(2, "abc", Some("T1"), day(1)),
            visit(3, "abc", Some("T2"), day(1)),
            visit(4, "abc", None, day(2)),
        ];
        assert_eq!(first_time_flags(&visits), vec![true, false, true, false]);
    }

    #[test]
    fn ties_resolve_by_insertion_order() {
        // Same timestamp, same tracking id: only the earlier row is first.
        let visits = vec![
            visit(10, "abc", Some("T1"), day(0)),
            visit(11, "abc", Some("T1"), day(0)),
        ];
        assert_eq!(first_time_flags(&visits), vec![true, false]);
    }

    #[test]
    fn daily_series_matches_worked_example() {
        // Aliases {"abc": live, "xyz": deleted}; visits T1, T1, T2 on
        // Jan 1, Jan 2, Jan 2.
        let visits = vec![
            visit(1, "abc", Some("T1"), day(0)),
            visit(2, "xyz", Some("T1"), day(1)),
            visit(3, "abc", Some("T2"), day(1)),
        ];
        let flags = first_time_flags(&visits);
        let series = build_series(&visits, &flags, None, Granularity::Day);

        assert_eq!(
            series,
            vec![
                SeriesPoint {
                    period: "2026-01-01".to_string(),
                    total_visits: 1,
                    first_time_visits: 1,
                },
                SeriesPoint {
                    period: "2026-01-02".to_string(),
                    total_visits: 2,
                    first_time_visits: 1,
                },
            ]
        );
    }

    #[test]
    fn gaps_are_zero_filled_between_endpoints_only() {
        let visits = vec![
            visit(1, "abc", Some("T1"), day(0)),
            visit(2, "abc", Some("T2"), day(4)),
        ];
        let flags = first_time_flags(&visits);
        let series = build_series(&visits, &flags, None, Granularity::Day);

        assert_eq!(series.len(), 5);
        assert_eq!(series[0].period, "2026-01-01");
        assert_eq!(series[4].period, "2026-01-05");
        for point in &series[1..4] {
            assert_eq!(point.total_visits, 0);
            assert_eq!(point.first_time_visits, 0);
        }
        let total: u64 = series.iter().map(|p| p.total_visits).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn monthly_buckets_cross_year_boundary() {
        // 2025-12-15 and 2026-02-15; January synthesized.
        let visits = vec![
            visit(1, "abc", Some("T1"), 1_765_800_000),
            visit(2, "abc", Some("T2"), 1_771_156_800),
        ];
        let flags = first_time_flags(&visits);
        let series = build_series(&visits, &flags, None, Granularity::Month);

        let periods: Vec<&str> = series.iter().map(|p| p.period.as_str()).collect();
        assert_eq!(periods, vec!["2025-12", "2026-01", "2026-02"]);
        assert_eq!(series[1].total_visits, 0);
    }

    #[test]
    fn alias_filter_keeps_full_history_first_time() {
        // T1 first hits "abc", then "xyz": the "xyz" view shows the visit
        // but not as first-time.
        let visits = vec![
            visit(1, "abc", Some("T1"), day(0)),
            visit(2, "xyz", Some("T1"), day(1)),
        ];
        let flags = first_time_flags(&visits);
        let series = build_series(&visits, &flags, Some("xyz"), Granularity::Day);

        assert_eq!(series.len(), 1);
        assert_eq!(series[0].total_visits, 1);
        assert_eq!(series[0].first_time_visits, 0);
    }

    #[test]
    fn empty_log_yields_empty_series() {
        let series = build_series(&[], &[], None, Granularity::Day);
        assert!(series.is_empty());
    }

    #[test]
    fn unrepresentable_timestamps_never_anchor_the_series() {
        // A corrupt timestamp far outside the calendar range must not drag
        // the gap-filled series back to some bogus endpoint.
        let visits = vec![
            visit(1, "abc", Some("T1"), i64::MIN),
            visit(2, "abc", Some("T2"), day(0)),
            visit(3, "abc", Some("T2"), day(1)),
        ];
        let flags = first_time_flags(&visits);
        let series = build_series(&visits, &flags, None, Granularity::Day);

        assert_eq!(series.len(), 2);
        assert_eq!(series[0].period, "2026-01-01");
        let total: u64 = series.iter().map(|p| p.total_visits).sum();
        assert_eq!(total, 2, "the unrepresentable visit is left out");

        assert!(bucket_start(i64::MIN, Granularity::Day).is_none());
        assert!(bucket_start(day(0), Granularity::Month).is_some());
    }

    #[test]
    fn range_selection_rules() {
        let series: Vec<SeriesPoint> = (0..4)
            .map(|i| SeriesPoint {
                period: format!("2026-01-0{}", i + 1),
                total_visits: 1,
                first_time_visits: 0,
            })
            .collect();

        assert!(matches!(
            select_range(series.clone(), Some((2, 2))),
            Err(CoreError::InvalidRange)
        ));
        assert!(matches!(
            select_range(series.clone(), Some((3, 1))),
            Err(CoreError::InvalidRange)
        ));

        let full = select_range(series.clone(), Some((0, 4))).unwrap();
        assert_eq!(full.len(), 4);

        let tail = select_range(series.clone(), Some((2, 100))).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].period, "2026-01-03");

        let past_end = select_range(series, Some((10, 12))).unwrap();
        assert!(past_end.is_empty());
    }
}
