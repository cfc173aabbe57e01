//! Signal polling engine.
//!
//! This crate owns the watch registry and the per-target poller state, and
//! turns fetched items into events: new items are de-duplicated against a
//! bounded seen set, and metric series are checked for percent-change
//! jumps within a sliding window.

pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod seen;
pub mod series;
pub mod state;

pub use poller::*;
pub use registry::*;
pub use scheduler::*;
pub use seen::*;
pub use series::*;
pub use state::*;
