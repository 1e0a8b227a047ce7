//! Concurrent security-decision engine for Warden.
//!
//! This crate houses the machinery behind a permission check: canonical
//! security contexts, context combination and compression, fan-out
//! policy evaluation, and the caches that make repeated checks cheap.
//! The abstract model it operates on (permissions, protection domains,
//! combiners, check scopes) lives in `warden-auth`.
//!
//! # Crate Architecture
//!
//! ```text
//! warden-auth  (Permission, ProtectionDomain, DomainCombiner,
//!               CheckScope, AccessDenied)
//!     ↑
//! warden-engine                                     ◄── THIS CRATE
//!     ├── context   SecurityContext + ContextCache (content-addressed)
//!     ├── combiner  DelegateCombiner (strips the engine's domain)
//!     ├── evaluate  Evaluator (inline or one worker per domain)
//!     ├── expiring  ExpiringMap (idle-expiry concurrent cache)
//!     └── manager   SecurityManager (the checking frontend)
//! ```
//!
//! # Check Lifecycle
//!
//! 1. The caller captures its effective domains in a [`SecurityContext`]
//!    via the shared [`ContextCache`].
//! 2. [`SecurityManager::check_permission`] consults the decision cache;
//!    a hit grants immediately.
//! 3. On a miss, the caller's context is compressed into a *delegate*
//!    context (the engine's own domain stripped, duplicates merged) and
//!    the delegate's domains are evaluated, inline for small sets or
//!    fanned out one worker per domain.
//! 4. A unanimous grant is recorded in the decision cache; a denial is
//!    returned and never cached.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_auth::{CheckScope, DomainId, ProtectionDomain};
//! use warden_engine::{ContextCache, ContextSpec, ManagerConfig, SecurityManager};
//!
//! // String permissions: any Clone + Eq + Hash + Display type works.
//! let contexts = Arc::new(ContextCache::new());
//! let engine_domain = ProtectionDomain::new(
//!     DomainId::derived("warden.engine"),
//!     |_: &String, _: &CheckScope| true,
//! );
//! let manager = SecurityManager::new(
//!     Arc::clone(&contexts),
//!     ManagerConfig::new(engine_domain, "warden.admin".to_string()),
//! );
//!
//! let sandbox = ProtectionDomain::new(
//!     DomainId::derived("app.sandbox"),
//!     |permission: &String, _: &CheckScope| permission.starts_with("fs.read"),
//! );
//! let caller = contexts.build(ContextSpec::with_domains(vec![sandbox]));
//!
//! assert!(manager.check_permission(&"fs.read:/data".to_string(), &caller).is_ok());
//! assert!(manager.check_permission(&"fs.write:/data".to_string(), &caller).is_err());
//! ```

pub mod combiner;
pub mod context;
pub mod evaluate;
pub mod expiring;
pub mod manager;

// Re-export core types
pub use combiner::DelegateCombiner;
pub use context::{ContextCache, ContextSpec, SecurityContext};
pub use evaluate::{
    EvalFault, Evaluator, EvaluatorConfig, DEFAULT_PARALLEL_THRESHOLD, DEFAULT_WAIT_TIMEOUT,
};
pub use expiring::ExpiringMap;
pub use manager::{
    CheckedPermissions, ManagerConfig, SecurityManager, DEFAULT_CHECKED_TTL, DEFAULT_DELEGATE_TTL,
};
