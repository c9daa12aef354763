pub mod heartbeat;
pub mod job;
pub mod local_job;
pub mod outbox;
