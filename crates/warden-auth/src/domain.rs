//! Protection domains: opaque trust units with a stable identity.
//!
//! A [`ProtectionDomain`] pairs a [`DomainId`] with a [`DomainPolicy`],
//! the capability-implication test consulted during checks. Identity
//! equality and hashing use **only** the id: domain comparison must stay
//! cheap because context content-addressing hashes domain sets on every
//! cache lookup, and a domain's real-world identity (code origin, loader,
//! principals) may otherwise back onto network or filesystem lookups.
//! Callers derive the id from those identity sources once, up front.

use crate::{CheckScope, Permission};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use uuid::Uuid;

/// Namespace for origin-derived domain ids (UUID v5).
const DOMAIN_NAMESPACE: Uuid = Uuid::from_u128(0x6f0e_8c1a_93d4_4b56_a1c7_2e85_d0f3_b914);

/// Stable identifier for a protection domain.
///
/// Two domains with the same id are the same trust unit, regardless of
/// which [`ProtectionDomain`] handle refers to them.
///
/// # Example
///
/// ```
/// use warden_auth::DomainId;
///
/// // Random identity for an anonymous domain.
/// let a = DomainId::new();
/// let b = DomainId::new();
/// assert_ne!(a, b);
///
/// // Stable identity derived from a code origin.
/// let lib = DomainId::derived("file:///opt/app/lib.so");
/// assert_eq!(lib, DomainId::derived("file:///opt/app/lib.so"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DomainId(pub Uuid);

impl DomainId {
    /// Creates a new [`DomainId`] with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Derives a stable [`DomainId`] from an origin string (UUID v5).
    ///
    /// Use this when the same code unit must map to the same domain
    /// identity across processes or restarts.
    #[must_use]
    pub fn derived(origin: &str) -> Self {
        Self(Uuid::new_v5(&DOMAIN_NAMESPACE, origin.as_bytes()))
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain:{}", self.0)
    }
}

/// Capability-implication test for one protection domain.
///
/// This is the engine's outbound seam: what a domain's static grants are,
/// and which policy source is consulted when they are insufficient, is
/// entirely the implementor's business. The [`CheckScope`] is passed
/// through so a policy that re-enters the engine (e.g. to read its own
/// configuration) stays inside the recursion bound.
///
/// Implemented for closures, which keeps tests and simple hosts terse:
///
/// ```
/// use warden_auth::{CheckScope, DomainId, ProtectionDomain};
///
/// let read_only = ProtectionDomain::new(
///     DomainId::derived("trusted:read-only"),
///     |perm: &String, _scope: &CheckScope| perm.starts_with("file.read"),
/// );
///
/// let scope = CheckScope::root();
/// assert!(read_only.implies(&"file.read:/tmp/x".to_string(), &scope));
/// assert!(!read_only.implies(&"file.write:/tmp/x".to_string(), &scope));
/// ```
pub trait DomainPolicy<P: Permission>: Send + Sync {
    /// Returns `true` if this domain's grants imply `permission`.
    fn implies(&self, permission: &P, scope: &CheckScope) -> bool;
}

impl<P, F> DomainPolicy<P> for F
where
    P: Permission,
    F: Fn(&P, &CheckScope) -> bool + Send + Sync,
{
    fn implies(&self, permission: &P, scope: &CheckScope) -> bool {
        self(permission, scope)
    }
}

/// An opaque trust unit: stable identity plus an implication test.
///
/// Domains are created once per code unit, immutable thereafter, and
/// shared by many contexts — cloning a `ProtectionDomain` clones a cheap
/// handle, not the policy. Equality and hashing delegate to the
/// [`DomainId`] only.
pub struct ProtectionDomain<P: Permission> {
    inner: Arc<DomainInner<P>>,
}

struct DomainInner<P: Permission> {
    id: DomainId,
    policy: Box<dyn DomainPolicy<P>>,
}

impl<P: Permission> ProtectionDomain<P> {
    /// Creates a domain from an identity and a policy.
    #[must_use]
    pub fn new<D>(id: DomainId, policy: D) -> Self
    where
        D: DomainPolicy<P> + 'static,
    {
        Self {
            inner: Arc::new(DomainInner {
                id,
                policy: Box::new(policy),
            }),
        }
    }

    /// Returns this domain's stable identity.
    #[must_use]
    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    /// Asks this domain whether it implies `permission`.
    #[must_use]
    pub fn implies(&self, permission: &P, scope: &CheckScope) -> bool {
        self.inner.policy.implies(permission, scope)
    }
}

impl<P: Permission> Clone for ProtectionDomain<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Permission> PartialEq for ProtectionDomain<P> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<P: Permission> Eq for ProtectionDomain<P> {}

impl<P: Permission> Hash for ProtectionDomain<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<P: Permission> fmt::Debug for ProtectionDomain<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectionDomain")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allow_all() -> ProtectionDomain<String> {
        ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| true)
    }

    #[test]
    fn derived_ids_are_stable() {
        let a = DomainId::derived("file:///lib/a.so");
        let b = DomainId::derived("file:///lib/a.so");
        let c = DomainId::derived("file:///lib/c.so");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn equality_is_identity_not_policy() {
        let id = DomainId::new();
        let permissive = ProtectionDomain::new(id, |_: &String, _: &CheckScope| true);
        let restrictive = ProtectionDomain::new(id, |_: &String, _: &CheckScope| false);

        // Same id, different policies: still the same trust unit.
        assert_eq!(permissive, restrictive);
    }

    #[test]
    fn clones_share_the_policy() {
        let domain = allow_all();
        let copy = domain.clone();

        let scope = CheckScope::root();
        assert!(copy.implies(&"anything".to_string(), &scope));
        assert_eq!(domain, copy);
    }

    #[test]
    fn closure_policy_sees_the_scope() {
        let domain = ProtectionDomain::new(DomainId::new(), |_: &String, scope: &CheckScope| {
            scope.depth() < 3
        });

        let shallow = CheckScope::root();
        let deep = shallow.deepen().deepen().deepen();
        assert!(domain.implies(&"p".to_string(), &shallow));
        assert!(!domain.implies(&"p".to_string(), &deep));
    }
}
