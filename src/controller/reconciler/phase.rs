//! # Phase
//!
//! Per-resource reconcile state machine.
//!
//! ```text
//! Idle ──drift──▶ Syncing ──success──▶ Settled ──drift──▶ Syncing
//!                   │  ▲
//!     transient fail└──┘      fatal fail ──▶ Failed ──drift──▶ Syncing
//! ```
//!
//! `Suspended` is entered from any phase while `spec.suspend` is true.

use crate::constants::RECONCILE_ANNOTATION;
use crate::crd::KeyVaultSecretSync;
use chrono::{DateTime, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Syncing,
    Settled,
    Failed,
    Suspended,
}

impl Phase {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Syncing => "Syncing",
            Phase::Settled => "Settled",
            Phase::Failed => "Failed",
            Phase::Suspended => "Suspended",
        }
    }

    /// Phase recorded in status; unknown or missing values read as `Idle`
    #[must_use]
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Syncing") => Phase::Syncing,
            Some("Settled") => Phase::Settled,
            Some("Failed") => Phase::Failed,
            Some("Suspended") => Phase::Suspended,
            _ => Phase::Idle,
        }
    }

    /// Apply an event
    ///
    /// Events that do not apply to the current phase leave it unchanged.
    #[must_use]
    pub fn transition(self, event: PhaseEvent) -> Self {
        match (self, event) {
            (_, PhaseEvent::Suspend) => Phase::Suspended,
            (_, PhaseEvent::DriftDetected) => Phase::Syncing,
            (Phase::Syncing, PhaseEvent::SyncSucceeded) => Phase::Settled,
            (Phase::Syncing, PhaseEvent::SyncFailed { fatal: false }) => Phase::Syncing,
            (Phase::Syncing, PhaseEvent::SyncFailed { fatal: true }) => Phase::Failed,
            (phase, _) => phase,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    DriftDetected,
    SyncSucceeded,
    SyncFailed { fatal: bool },
    Suspend,
}

/// Why a resource needs to converge again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftReason {
    /// Spec generation differs from the observed generation
    SpecChanged,
    /// Manual trigger annotation present
    Manual,
    /// Refresh interval elapsed
    RefreshDue,
    /// Previous reconcile did not settle and its retry is due
    NotSettled,
}

impl DriftReason {
    /// Trigger label used in metrics and logs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftReason::SpecChanged => "spec-change",
            DriftReason::Manual => "manual",
            DriftReason::RefreshDue => "timer-based",
            DriftReason::NotSettled => "not-settled",
        }
    }
}

/// Tolerance applied to `nextReconcileTime`, the requeue may fire slightly early
const REFRESH_TOLERANCE_SECS: i64 = 2;

/// Detect drift for a resource, `None` when it is settled and current
#[must_use]
pub fn detect_drift(resource: &KeyVaultSecretSync, now: DateTime<Utc>) -> Option<DriftReason> {
    let status = resource.status.as_ref();
    let generation = resource.metadata.generation;
    let observed_generation = status.and_then(|s| s.observed_generation);

    if observed_generation.is_none() || generation != observed_generation {
        return Some(DriftReason::SpecChanged);
    }

    let has_manual_trigger = resource
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|annotations| annotations.contains_key(RECONCILE_ANNOTATION));
    if has_manual_trigger {
        return Some(DriftReason::Manual);
    }

    // Failed and retrying resources wait for their scheduled retry like settled ones wait for refresh
    let due = status
        .and_then(|s| s.next_reconcile_time.as_deref())
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .is_none_or(|next| {
            now >= next.with_timezone(&Utc) - chrono::Duration::seconds(REFRESH_TOLERANCE_SECS)
        });
    if !due {
        return None;
    }

    if Phase::parse(status.and_then(|s| s.phase.as_deref())) == Phase::Settled {
        Some(DriftReason::RefreshDue)
    } else {
        Some(DriftReason::NotSettled)
    }
}
