//! Domain combiner trait.
//!
//! When contexts are nested — a privileged operation carrying an assigned
//! context over a captured stack context — the two domain sets must be
//! merged before a decision is made. A [`DomainCombiner`] owns that merge.
//! The engine attaches its own combiner to delegate contexts; hosts may
//! attach their own to implement subject-based or intersection semantics.

use crate::{Permission, ProtectionDomain};

/// Merges a current (stack) domain set with an assigned (inherited or
/// privileged) domain set.
///
/// A combiner attached to an assigned context gets **first right of
/// refusal** during context optimization: when present, it is delegated
/// to unconditionally, before any of the cheap merge shortcuts.
///
/// # Recursion caveat
///
/// An implementation used by the security manager itself must exclude the
/// manager's *own* protection domain from its output. The policy backing
/// store may otherwise ask "does the manager's domain have permission to
/// read its configuration?", which asks the manager, which consults the
/// policy store, without end. Omitting the domain is safe because the
/// manager's domain is separately, statically trusted.
pub trait DomainCombiner<P: Permission>: Send + Sync {
    /// Returns the merged domain set used for the actual decision.
    ///
    /// Implementations must not rely on either slice staying alive; the
    /// returned vector is the sole output.
    fn combine(
        &self,
        current: &[ProtectionDomain<P>],
        assigned: &[ProtectionDomain<P>],
    ) -> Vec<ProtectionDomain<P>>;
}
