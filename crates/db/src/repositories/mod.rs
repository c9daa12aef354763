pub mod heartbeat_repo;
pub mod job_repo;
pub mod local_job_repo;
pub mod outbox_repo;

pub use heartbeat_repo::HeartbeatRepo;
pub use job_repo::JobRepo;
pub use local_job_repo::LocalJobRepo;
pub use outbox_repo::OutboxRepo;
