//! Request handlers.
//!
//! Handlers delegate to the lifecycle engine for anything that changes a
//! job, and to the repositories in `vidflow_db` for reads. Errors map to
//! HTTP responses via [`AppError`](crate::error::AppError).

pub mod jobs;
