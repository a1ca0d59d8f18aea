pub mod link;
pub mod visit;

pub use link::{Alias, Link, LinkWithAliases};
pub use visit::{GeoMark, NewVisit, Visit};
