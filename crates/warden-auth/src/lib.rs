//! Permission primitives for Warden.
//!
//! This crate provides the abstract permission model consumed by
//! `warden-engine`. It defines *what* the engine reasons about —
//! permissions, protection domains, domain combiners, check scopes —
//! without any engine machinery.
//!
//! # Crate Architecture
//!
//! ```text
//! warden-auth  (Permission, ProtectionDomain, DomainCombiner,
//!               CheckScope, AccessDenied)          ◄── THIS CRATE
//!     ↑
//! warden-engine (SecurityContext, ContextCache, SecurityManager,
//!                Evaluator, ExpiringMap)
//! ```
//!
//! # Design Principles
//!
//! - **Trait definitions here, implementations in consumers** — the engine
//!   and its callers provide concrete [`DomainPolicy`] and
//!   [`DomainCombiner`] implementations.
//! - **Permissions are opaque** — the engine never inspects a permission
//!   beyond equality. How one permission implies another is decided by
//!   each domain's policy, an external collaborator.
//! - **Deny wins** — a permission is granted only if every protection
//!   domain of the merged context implies it.
//! - **Explicit context passing** — recursion depth and cooperative
//!   cancellation travel in a [`CheckScope`] argument, never in ambient
//!   thread state.

pub mod combiner;
pub mod domain;
pub mod error;
pub mod permission;
pub mod scope;

// Re-export core types
pub use combiner::DomainCombiner;
pub use domain::{DomainId, DomainPolicy, ProtectionDomain};
pub use error::AccessDenied;
pub use permission::Permission;
pub use scope::{CancelToken, CheckScope, MAX_CHECK_DEPTH};
