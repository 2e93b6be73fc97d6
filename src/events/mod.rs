//! Live repair events.
//!
//! Every clamp and drift warning, per-entity failure, skipped stage and run
//! boundary is published on an [`EventBus`]. Subscribers get bounded buffers;
//! a subscriber that falls behind is dropped instead of slowing the sweep.
//!
//! # Example
//!
//! ```ignore
//! let handle = engine.events().subscribe(SubscriptionConfig {
//!     filter: EventFilter::warnings(),
//!     ..Default::default()
//! });
//!
//! engine.scheduled_retention_run();
//!
//! for event in handle.drain() {
//!     if let RepairEvent::Warning { warning, .. } = event {
//!         println!("{:?}", warning);
//!     }
//! }
//! ```

mod bus;
mod types;

pub use bus::EventBus;
pub use types::{
    DropReason, EventFilter, RepairEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};
