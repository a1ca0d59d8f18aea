//! Visitor identity resolution.
//!
//! Maps a raw source address to a stable pseudonymous tracking id. The store
//! holds the binding under an insert-if-absent primitive, so concurrent
//! first sightings of one address all converge on a single id. A process-local
//! cache fronts the store; it is advisory only and safe because a binding is
//! never reassigned once created.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::CoreResult;
use crate::store::LinkStore;

pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

pub struct IdentityResolver {
    store: Arc<dyn LinkStore>,
    cache: DashMap<String, String>,
    cache_capacity: usize,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn LinkStore>, cache_capacity: usize) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            cache_capacity,
        }
    }

    /// Stable tracking id for the address, minting one on first sighting.
    pub async fn identity_for(&self, source_address: &str) -> CoreResult<String> {
        if let Some(cached) = self.cache.get(source_address) {
            return Ok(cached.value().clone());
        }

        // The candidate only wins when no binding exists yet; either way the
        // store hands back the one id every caller converges on.
        let candidate = Uuid::new_v4().to_string();
        let tracking_id = self.store.bind_tracking_id(source_address, &candidate).await?;

        if tracking_id != candidate {
            debug!(source_address, "tracking id already bound, reusing");
        }

        // A full cache is cleared wholesale, no eviction policy; entries
        // refill from the store on demand.
        if self.cache.len() >= self.cache_capacity {
            self.cache.clear();
        }
        self.cache
            .insert(source_address.to_string(), tracking_id.clone());

        Ok(tracking_id)
    }
}
