//! Redirect-time visit recording.
//!
//! One call per inbound redirect: resolve the alias, settle the visitor's
//! tracking id, derive geo, append the visit row. The identity binding is
//! durable before the visit row that references it is written; geo failures
//! degrade to the unknown mark; transient store failures are retried before
//! surfacing `Unavailable`.

use std::sync::Arc;
use tracing::debug;

use crate::error::CoreResult;
use crate::geo::GeoProvider;
use crate::identity::IdentityResolver;
use crate::models::NewVisit;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::LinkStore;

pub struct VisitRecorder {
    store: Arc<dyn LinkStore>,
    identity: Arc<IdentityResolver>,
    geo: Arc<dyn GeoProvider>,
    retry: RetryPolicy,
}

impl VisitRecorder {
    pub fn new(
        store: Arc<dyn LinkStore>,
        identity: Arc<IdentityResolver>,
        geo: Arc<dyn GeoProvider>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            identity,
            geo,
            retry,
        }
    }

    /// Record one visit; returns the new visit's id. `NotFound` when the
    /// alias does not resolve; the caller decides whether that is a 404.
    pub async fn record(
        &self,
        alias_text: &str,
        source_address: &str,
        user_agent: Option<&str>,
        referer: Option<&str>,
        visited_at: i64,
    ) -> CoreResult<i64> {
        let link_id = self.store.resolve(alias_text).await?;

        // Identity first: the visit row must never reference a tracking id
        // that is not yet durable.
        let tracking_id = with_retry("identity_for", self.retry, || {
            self.identity.identity_for(source_address)
        })
        .await?;

        let geo = self.geo.lookup(source_address);

        let visit = NewVisit {
            link_id: link_id.clone(),
            alias: alias_text.to_string(),
            tracking_id,
            source_address: source_address.to_string(),
            user_agent: user_agent.map(str::to_string),
            referer: referer.map(str::to_string),
            geo,
            visited_at,
        };

        let visit_id = with_retry("append_visit", self.retry, || {
            self.store.append_visit(&visit)
        })
        .await?;

        debug!(link_id, alias = alias_text, visit_id, "visit recorded");
        Ok(visit_id)
    }
}
