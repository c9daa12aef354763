//! vidflow worker.
//!
//! Consumes job commands, runs one processing task per started job and
//! reports liveness and progress back to the control plane as heartbeats.
//! A local record per job survives process crashes so an interrupted job
//! is resumed on restart.

pub mod config;
pub mod consumer;
pub mod detection;
pub mod local_store;
pub mod processor;
pub mod registry;
pub mod task_manager;
pub mod unit_group;
