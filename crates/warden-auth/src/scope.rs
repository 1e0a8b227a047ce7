//! Check scope: recursion depth and cooperative cancellation.
//!
//! Resolving caching metadata or consulting a policy backing store may
//! itself require a permission check, so a check can re-enter the engine.
//! [`CheckScope`] carries the nesting depth as an explicit argument
//! through every call that can re-enter — including across worker-task
//! boundaries — instead of hiding it in thread-local state. When the depth
//! exceeds [`MAX_CHECK_DEPTH`] the engine fails closed rather than
//! overflowing the stack.
//!
//! The scope also carries a [`CancelToken`], the cooperative stand-in for
//! thread interruption: a caller that wants a safe shutdown sets the
//! token, and the evaluator's fan-in wait observes it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Maximum permitted depth of nested permission checks.
///
/// A bounded number of nested checks is legitimate (policy resolution may
/// repeat the same check a few levels deep); anything beyond this bound
/// indicates a cyclic dependency between policy resolution and permission
/// checking and is rejected rather than retried.
pub const MAX_CHECK_DEPTH: u8 = 7;

/// Cooperative cancellation flag shared between a caller and the engine.
///
/// Cloning produces another handle to the *same* flag.
///
/// # Example
///
/// ```
/// use warden_auth::CancelToken;
///
/// let token = CancelToken::new();
/// let handle = token.clone();
///
/// assert!(!token.is_cancelled());
/// handle.cancel();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a new, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` if the token is currently set.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clears the token and returns whether it was set.
    ///
    /// Mirrors the save-and-clear half of the evaluator's interrupt
    /// contract: the prior state must be restored on every exit path.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }
}

/// Call-scoped state threaded through a permission check.
///
/// Combines the nesting depth with the cancellation token. Scopes are
/// cheap to clone; [`deepen`](Self::deepen) returns a new scope one level
/// deeper sharing the same token.
///
/// # Example
///
/// ```
/// use warden_auth::{CheckScope, MAX_CHECK_DEPTH};
///
/// let mut scope = CheckScope::root();
/// assert_eq!(scope.depth(), 0);
/// assert!(!scope.exceeded());
///
/// for _ in 0..=MAX_CHECK_DEPTH {
///     scope = scope.deepen();
/// }
/// assert!(scope.exceeded());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CheckScope {
    depth: u8,
    cancel: CancelToken,
}

impl CheckScope {
    /// Creates a top-level scope with a fresh, unset token.
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Creates a top-level scope observing the given token.
    #[must_use]
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { depth: 0, cancel }
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> u8 {
        self.depth
    }

    /// Returns the cancellation token carried by this scope.
    #[must_use]
    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    /// Returns a scope one level deeper, sharing the same token.
    ///
    /// The depth saturates; the engine rejects the check via
    /// [`exceeded`](Self::exceeded) before saturation matters.
    #[must_use]
    pub fn deepen(&self) -> Self {
        Self {
            depth: self.depth.saturating_add(1),
            cancel: self.cancel.clone(),
        }
    }

    /// Returns `true` if the depth is beyond [`MAX_CHECK_DEPTH`].
    #[must_use]
    pub fn exceeded(&self) -> bool {
        self.depth > MAX_CHECK_DEPTH
    }
}
