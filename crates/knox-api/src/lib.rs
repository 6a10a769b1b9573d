//! REST surface for the Knox store.

pub mod server;
