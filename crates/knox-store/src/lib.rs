//! Store router for the Knox policy and telemetry store.
//!
//! [`StoreRouter`] holds the backend chosen at startup and exposes the policy,
//! telemetry and summary operations on top of it.

mod report;
mod router;
mod summary;

pub use knox_types::StoreError;
pub use report::{ItemOutcome, SchemaReport, WriteReport};
pub use router::StoreRouter;
pub use summary::SummaryAccumulator;
