//! Geo-lookup collaborators.
//!
//! The recorder derives country/region marks through an injected
//! [`GeoProvider`]; a failed or unanswerable lookup degrades to the unknown
//! mark and never fails the visit.

pub mod maxmind;

use std::collections::HashMap;

use crate::models::GeoMark;

pub use maxmind::MaxMindGeo;

pub trait GeoProvider: Send + Sync {
    fn lookup(&self, source_address: &str) -> GeoMark;
}

/// Fixed-table provider for tests and deployments without a MaxMind database.
#[derive(Default)]
pub struct StaticGeo {
    table: HashMap<String, GeoMark>,
}

impl StaticGeo {
    pub fn new(table: HashMap<String, GeoMark>) -> Self {
        Self { table }
    }

    /// Provider that answers unknown for every address.
    pub fn empty() -> Self {
        Self::default()
    }
}

impl GeoProvider for StaticGeo {
    fn lookup(&self, source_address: &str) -> GeoMark {
        self.table
            .get(source_address)
            .cloned()
            .unwrap_or_else(GeoMark::unknown)
    }
}
