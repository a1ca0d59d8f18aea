use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Country/region marks derived from a source address. `None` fields are
/// persisted as NULL and surface as the "unknown" bucket in breakdowns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoMark {
    pub country_code: Option<String>,
    pub region_code: Option<String>,
}

impl GeoMark {
    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.country_code.is_none() && self.region_code.is_none()
    }
}

/// Immutable redirect-time visit row. Only migrations and the source-address
/// scrub ever touch a visit after it is written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visit {
    pub id: i64,
    pub link_id: String,
    /// Denormalized alias text in effect at visit time. NULL only on rows
    /// written before the multi-alias migration ran.
    pub alias: Option<String>,
    /// NULL only on rows written before the visitor-tracking migration ran.
    pub tracking_id: Option<String>,
    /// NULL once the anonymization pass has scrubbed it.
    pub source_address: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub country_code: Option<String>,
    pub region_code: Option<String>,
    pub visited_at: i64,
    pub schema_version: i64,
}

/// Fields the recorder supplies for a new visit; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub link_id: String,
    pub alias: String,
    pub tracking_id: String,
    pub source_address: String,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub geo: GeoMark,
    pub visited_at: i64,
}
