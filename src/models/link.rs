use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Maximum number of non-deleted aliases a link may carry.
pub const MAX_LIVE_ALIASES: i64 = 6;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub link_id: String,
    pub title: String,
    pub long_url: String,
    pub owner: String,
    pub deleted: bool,
    pub created_at: i64,
}

/// One alias row. `position` preserves per-link insertion order;
/// a deleted alias keeps its slot so the order survives revival.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Alias {
    pub alias_text: String,
    pub deleted: bool,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkWithAliases {
    pub link: Link,
    /// Ordered by `position` ascending, deleted entries included.
    pub aliases: Vec<Alias>,
}

impl LinkWithAliases {
    pub fn live_aliases(&self) -> impl Iterator<Item = &Alias> {
        self.aliases.iter().filter(|a| !a.deleted)
    }
}
