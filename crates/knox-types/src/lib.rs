//! Core types and the storage backend contract for the Knox policy and telemetry store.

mod config;
mod dimensions;
mod policy;
mod summary;
mod telemetry;
mod traits;

pub use config::*;
pub use dimensions::*;
pub use policy::*;
pub use summary::*;
pub use telemetry::*;
pub use traits::*;
