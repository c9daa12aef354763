//! Job lifecycle engine.
//!
//! [`lifecycle`] applies client and watchdog transitions atomically with
//! their outbox rows; [`dispatcher`] drains the outbox to the command
//! topic; [`heartbeats`] advances jobs on worker liveness evidence.

pub mod dispatcher;
pub mod heartbeats;
pub mod lifecycle;
