//! Core data types for the Smart Flow signal bot.

pub mod event;
pub mod item;
pub mod rule;
pub mod target;

pub use event::*;
pub use item::*;
pub use rule::*;
pub use target::*;
