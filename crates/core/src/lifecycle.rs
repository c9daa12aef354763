//! Job lifecycle state machine.
//!
//! A job cycles through six statuses:
//!
//! ```text
//! init_startup -> in_startup_processing -> active
//!      ^                                     |
//!      |                                     v
//!   inactive <- in_shutdown_processing <- init_shutdown
//! ```
//!
//! Clients can only request `start` or `stop`; [`plan_transition`] decides
//! whether the request is accepted and what the caller must persist. The
//! `*_processing` statuses are owned by the outbox dispatcher
//! ([`dispatched_status`]) and left only on heartbeat evidence
//! ([`heartbeat_transition`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! define_text_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $text)] $variant ),+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$name] = &[$( $name::$variant ),+];

            /// Return the value stored in the database and sent on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err(CoreError::Validation(format!(
                        "unknown {} '{other}'",
                        stringify!($name),
                    ))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

define_text_enum! {
    /// Control-plane status of a job.
    JobStatus {
        InitStartup = "init_startup",
        InStartupProcessing = "in_startup_processing",
        Active = "active",
        InitShutdown = "init_shutdown",
        InShutdownProcessing = "in_shutdown_processing",
        Inactive = "inactive",
    }
}

define_text_enum! {
    /// Action carried by client requests, commands and heartbeats.
    JobAction {
        Start = "start",
        Stop = "stop",
    }
}

/// The effect of an accepted transition.
///
/// Callers must apply all of it in one database transaction: set the job
/// status to `next`, retire unprocessed outbox rows when `cancel_pending`
/// is set, and insert one outbox row carrying `emit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: JobStatus,
    pub next: JobStatus,
    pub emit: JobAction,
    pub cancel_pending: bool,
}

/// Decide the outcome of a client `start`/`stop` request.
pub fn plan_transition(current: JobStatus, action: JobAction) -> Result<Transition, CoreError> {
    use JobAction::*;
    use JobStatus::*;

    let (next, cancel_pending) = match (current, action) {
        (InitStartup, Stop) => (InitShutdown, true),
        (InStartupProcessing | Active, Stop) => (InitShutdown, false),
        (InitShutdown, Start) => (InitStartup, true),
        (InShutdownProcessing | Inactive, Start) => (InitStartup, false),
        (InitStartup | InStartupProcessing | Active, Start)
        | (InitShutdown | InShutdownProcessing | Inactive, Stop) => {
            return Err(CoreError::InvalidTransition {
                from: current,
                action,
            });
        }
    };

    Ok(Transition {
        from: current,
        next,
        emit: action,
        cancel_pending,
    })
}

/// Restart issued by the watchdog for a job whose heartbeats went stale.
///
/// Only `active` jobs are restarted; any other status means the job moved
/// on since the scan and the restart is skipped.
pub fn plan_restart(current: JobStatus) -> Option<Transition> {
    (current == JobStatus::Active).then_some(Transition {
        from: current,
        next: JobStatus::InitStartup,
        emit: JobAction::Start,
        cancel_pending: false,
    })
}

/// Status a job must be in for a published command to advance it.
pub fn pending_status(action: JobAction) -> JobStatus {
    match action {
        JobAction::Start => JobStatus::InitStartup,
        JobAction::Stop => JobStatus::InitShutdown,
    }
}

/// Status a job enters once its command has been published.
pub fn dispatched_status(action: JobAction) -> JobStatus {
    match action {
        JobAction::Start => JobStatus::InStartupProcessing,
        JobAction::Stop => JobStatus::InShutdownProcessing,
    }
}

/// Statuses a heartbeat with `action` is allowed to move out of, and the
/// status it moves them to.
pub fn heartbeat_targets(action: JobAction) -> (&'static [JobStatus], JobStatus) {
    match action {
        JobAction::Start => (&[JobStatus::InStartupProcessing], JobStatus::Active),
        JobAction::Stop => (
            &[JobStatus::InShutdownProcessing, JobStatus::Active],
            JobStatus::Inactive,
        ),
    }
}

/// New status implied by a heartbeat, or `None` when the heartbeat is only
/// recorded (duplicates and out-of-order events land here).
pub fn heartbeat_transition(current: JobStatus, action: JobAction) -> Option<JobStatus> {
    let (from, to) = heartbeat_targets(action);
    from.contains(&current).then_some(to)
}
