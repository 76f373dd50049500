//! Upstream channel registry and priority-tiered weighted selection

#![allow(clippy::must_use_candidate)]

mod channel;
mod error;
mod health;
mod registry;
pub mod sampling;
mod selector;

pub use channel::{Channel, ChannelId, ChannelView};
pub use error::ChannelError;
pub use health::{ChannelHealth, CircuitState};
pub use registry::{Ability, ChannelRegistry, Snapshot, TagUpdate};
pub use selector::ChannelSelector;
