//! Opaque permission marker trait.
//!
//! Warden treats a permission as a requested capability whose internal
//! structure is irrelevant to the engine: decision caches key on exact
//! equality, and whether a domain's grants *imply* a permission is decided
//! by that domain's [`DomainPolicy`](crate::DomainPolicy). This keeps
//! wildcard matching, action masks and the rest of a permission hierarchy
//! out of the trust-boundary core.

use std::fmt;
use std::hash::Hash;

/// Marker trait for types usable as permissions.
///
/// Automatically implemented for any type meeting the bounds, so plain
/// `String` permissions work out of the box for tests and simple hosts,
/// while production callers bring their own permission hierarchy.
///
/// # Requirements
///
/// - `Eq + Hash` — decision caches record exact permissions already proven
///   for a context.
/// - `Clone + Send + Sync + 'static` — permissions are copied into worker
///   tasks during parallel evaluation.
/// - `Debug + Display` — denial errors name the permission that failed.
///
/// # Example
///
/// ```
/// use warden_auth::Permission;
///
/// fn takes_permission<P: Permission>(_p: &P) {}
///
/// takes_permission(&"file.read:/etc/hosts".to_string());
/// ```
pub trait Permission:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> Permission for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}
