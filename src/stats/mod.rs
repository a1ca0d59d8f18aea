//! Aggregation engine: derived statistics recomputed from the visit log.
//!
//! The engine never persists aggregates; every query scans the link's visit
//! rows and rebuilds the series or breakdown. An optional moka cache keyed
//! by query shape fronts the series path; it is correctness-neutral and off
//! by default.

pub mod classify;
pub mod models;
pub mod series;

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::store::LinkStore;

pub use models::{BreakdownReport, Granularity, SeriesPoint, SeriesQuery};

/// TTL + capacity knobs for the optional series cache.
#[derive(Debug, Clone, Copy)]
pub struct StatsCacheConfig {
    pub capacity: u64,
    pub ttl_secs: u64,
}

pub struct AggregationEngine {
    store: Arc<dyn LinkStore>,
    series_cache: Option<Cache<String, Arc<Vec<SeriesPoint>>>>,
}

impl AggregationEngine {
    pub fn new(store: Arc<dyn LinkStore>, cache: Option<StatsCacheConfig>) -> Self {
        let series_cache = cache.map(|c| {
            Cache::builder()
                .max_capacity(c.capacity)
                .time_to_live(Duration::from_secs(c.ttl_secs))
                .build()
        });
        Self {
            store,
            series_cache,
        }
    }

    /// Gap-filled time series for a link, optionally filtered to one alias
    /// and sliced to a period-index range.
    pub async fn series(&self, query: &SeriesQuery) -> CoreResult<Vec<SeriesPoint>> {
        if let Some((start, end)) = query.range {
            if end <= start {
                return Err(CoreError::InvalidRange);
            }
        }

        let full = self.full_series(query).await?;
        series::select_range(full.as_ref().clone(), query.range)
    }

    /// Categorical breakdowns (browser, platform, referrer domain, geography)
    /// over a link's visits, optionally filtered to one alias.
    pub async fn breakdown(
        &self,
        link_id: &str,
        alias: Option<&str>,
    ) -> CoreResult<BreakdownReport> {
        let visits = self.store.visits_for_link(link_id).await?;

        let mut report = BreakdownReport::default();
        for visit in &visits {
            if let Some(wanted) = alias {
                if visit.alias.as_deref() != Some(wanted) {
                    continue;
                }
            }

            *report
                .browsers
                .entry(classify::browser_family(visit.user_agent.as_deref()))
                .or_insert(0) += 1;
            *report
                .platforms
                .entry(classify::platform_family(visit.user_agent.as_deref()))
                .or_insert(0) += 1;
            *report
                .referrers
                .entry(classify::referrer_domain(visit.referer.as_deref()))
                .or_insert(0) += 1;
            *report
                .countries
                .entry(classify::country_bucket(visit.country_code.as_deref()))
                .or_insert(0) += 1;
            *report
                .regions
                .entry(classify::region_bucket(visit.region_code.as_deref()))
                .or_insert(0) += 1;
        }

        Ok(report)
    }

    /// Full (un-ranged) series, through the cache when one is configured.
    async fn full_series(&self, query: &SeriesQuery) -> CoreResult<Arc<Vec<SeriesPoint>>> {
        let key = format!(
            "{}|{}|{}",
            query.link_id,
            query.alias.as_deref().unwrap_or("*"),
            query.granularity.as_str()
        );

        if let Some(cache) = &self.series_cache {
            if let Some(cached) = cache.get(&key).await {
                debug!(key, "series cache hit");
                return Ok(cached);
            }
        }

        let computed = Arc::new(self.compute_series(query).await?);

        if let Some(cache) = &self.series_cache {
            cache.insert(key, Arc::clone(&computed)).await;
        }

        Ok(computed)
    }

    async fn compute_series(&self, query: &SeriesQuery) -> CoreResult<Vec<SeriesPoint>> {
        let visits = self.store.visits_for_link(&query.link_id).await?;
        let flags = series::first_time_flags(&visits);
        Ok(series::build_series(
            &visits,
            &flags,
            query.alias.as_deref(),
            query.granularity,
        ))
    }
}
