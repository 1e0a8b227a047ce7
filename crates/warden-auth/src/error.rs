//! Unified denial error type.
//!
//! Every failure mode of a permission check surfaces synchronously as an
//! [`AccessDenied`] value; none are retried automatically. Retrying a
//! denial would not change the outcome, and retrying a timeout risks
//! unbounded latency.

use crate::Permission;
use std::time::Duration;
use thiserror::Error;

/// Error raised when a permission check does not succeed.
///
/// Callers can match on the variant to distinguish an ordinary policy
/// denial from the engine failing closed.
///
/// # Example
///
/// ```
/// use warden_auth::AccessDenied;
///
/// let err: AccessDenied<String> = AccessDenied::Denied {
///     permission: "file.write:/etc".to_string(),
/// };
///
/// assert!(err.to_string().contains("file.write:/etc"));
/// assert!(!err.is_fatal());
/// ```
#[derive(Debug, Error)]
pub enum AccessDenied<P: Permission> {
    /// The permission is not implied by every domain in the merged
    /// context. Never cached: policy can change, so a transient denial
    /// must not be sticky.
    #[error("access denied: {permission}")]
    Denied {
        /// The permission that was refused.
        permission: P,
    },

    /// The nested permission-check depth bound was hit.
    ///
    /// Indicates a cyclic dependency between policy resolution and
    /// permission checking. The check fails closed instead of overflowing
    /// the call stack.
    #[error("too many recursive permission checks (depth {depth}): {permission}")]
    RecursionExceeded {
        /// The permission whose check tripped the bound.
        permission: P,
        /// The depth at which the check was rejected.
        depth: u8,
    },

    /// The parallel fan-in wait exceeded its bound; treated as a denial.
    ///
    /// Anomalous: implies pathological contention or a stuck domain
    /// evaluation.
    #[error("permission evaluation timed out after {waited:?}: {permission}")]
    EvaluationTimeout {
        /// The permission being evaluated when the wait expired.
        permission: P,
        /// How long the fan-in wait lasted before giving up.
        waited: Duration,
    },

    /// An unexpected fault while asking a domain to evaluate.
    ///
    /// Fatal and propagated — converting an internal error into a silent
    /// grant would be a privilege-escalation bug.
    #[error("internal evaluation failure while checking {permission}: {reason}")]
    EvaluationFailure {
        /// The permission being evaluated when the fault occurred.
        permission: P,
        /// Short description of the underlying fault.
        reason: String,
    },
}

impl<P: Permission> AccessDenied<P> {
    /// Returns the permission the failed check was for.
    #[must_use]
    pub fn permission(&self) -> &P {
        match self {
            Self::Denied { permission }
            | Self::RecursionExceeded { permission, .. }
            | Self::EvaluationTimeout { permission, .. }
            | Self::EvaluationFailure { permission, .. } => permission,
        }
    }

    /// Returns `true` for faults that indicate engine breakage rather
    /// than a policy decision.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EvaluationFailure { .. })
    }
}
