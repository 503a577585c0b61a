pub mod activity_log;
pub mod entity;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use activity_log::{ActivityLogFilters, ActivityLogStore, PgActivityLogStore};
pub use entity::{EntityResolver, PgEntityResolver};
