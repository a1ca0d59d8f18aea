use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Calendar bucket width for time series, in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Month,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
        }
    }
}

/// One period of a link's time series. `period` is `YYYY-MM-DD` for days,
/// `YYYY-MM` for months.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub period: String,
    pub total_visits: u64,
    pub first_time_visits: u64,
}

/// Time-series query as the dashboard API hands it over.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesQuery {
    pub link_id: String,
    /// Restrict to visits through one alias; first-time status is still
    /// judged against the link's full history.
    pub alias: Option<String>,
    pub granularity: Granularity,
    /// Half-open period-index range `[start, end)` into the gap-filled
    /// series; `None` returns the full extent.
    pub range: Option<(usize, usize)>,
}

/// Per-category visit counts. Unparseable or absent values land in the
/// reserved `"unknown"` bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakdownReport {
    pub browsers: BTreeMap<String, u64>,
    pub platforms: BTreeMap<String, u64>,
    pub referrers: BTreeMap<String, u64>,
    pub countries: BTreeMap<String, u64>,
    pub regions: BTreeMap<String, u64>,
}
