//! Prefetch Module
//!
//! Background loading of predicted keys, steered by interaction events.

mod events;
mod scheduler;

pub use events::{InteractionEventSource, InteractionHub, InteractionListener, SubscriptionId};
pub use scheduler::{PrefetchOptions, PrefetchScheduler, PrefetchSettings};
