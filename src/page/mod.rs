mod projection;
mod snapshot;

use anyhow::Result;
use futures::future::BoxFuture;

use crate::domain::{PageKind, RawRow};

pub use projection::{GenerationGuard, PageProjection};
pub use snapshot::SnapshotPage;

/// A rendered page the worker projects verdicts onto.
pub trait PageAdapter: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> PageKind;

    /// Current rows in document order.
    fn rows(&self) -> BoxFuture<'_, Result<Vec<RawRow>>>;

    /// Applies `projection`; returns false when it was older than what the page already shows.
    fn apply<'a>(&'a self, projection: &'a PageProjection) -> BoxFuture<'a, Result<bool>>;
}
