//! Pure domain logic shared by the control plane and the workers.
//!
//! Nothing in this crate performs I/O: it holds the job lifecycle state
//! machine, liveness policy, retry backoff and the wire-neutral detection
//! types so both services agree on them.

pub mod backoff;
pub mod detection;
pub mod error;
pub mod lifecycle;
pub mod liveness;
pub mod types;
