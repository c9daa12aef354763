//! Message bus between the control plane and the workers.
//!
//! Two topics exist: commands (control plane -> workers) and heartbeats
//! (workers -> control plane). Both carry JSON keyed by job id. Delivery is
//! at-least-once: a consumer acknowledges a [`Delivery`] only after it has
//! been handled, and anything left unacknowledged is delivered again.

pub mod error;
pub mod memory;
pub mod messages;
pub mod redis_streams;
pub mod transport;

pub use error::BusError;
pub use memory::MemoryBus;
pub use messages::{BusMessage, HeartbeatEvent, JobCommand};
pub use transport::{send, Delivery, Publisher, Subscriber};
