//! The engine's own [`DomainCombiner`].
//!
//! When the engine stages a delegate context for evaluation, the
//! engine's protection domain is itself on the assigned side — and a
//! permission check performed *by* the engine while combining must not
//! recurse into a check against the engine's own domain. The combiner
//! therefore keeps only the caller's domains and drops the engine's
//! domain from the assigned side.

use warden_auth::{DomainCombiner, Permission, ProtectionDomain};

/// Combiner that keeps the caller's domains and strips the engine's own
/// domain from the assigned side.
///
/// The caller's (current) domains take the result's leading positions,
/// preserving order; surviving assigned domains follow, minus
/// duplicates.
pub struct DelegateCombiner<P: Permission> {
    engine_domain: ProtectionDomain<P>,
}

impl<P: Permission> DelegateCombiner<P> {
    /// Creates a combiner that filters out `engine_domain`.
    #[must_use]
    pub fn new(engine_domain: ProtectionDomain<P>) -> Self {
        Self { engine_domain }
    }
}

impl<P: Permission> DomainCombiner<P> for DelegateCombiner<P> {
    fn combine(
        &self,
        current: &[ProtectionDomain<P>],
        assigned: &[ProtectionDomain<P>],
    ) -> Vec<ProtectionDomain<P>> {
        let mut combined: Vec<ProtectionDomain<P>> = current.to_vec();
        for domain in assigned {
            if *domain != self.engine_domain && !combined.contains(domain) {
                combined.push(domain.clone());
            }
        }
        combined
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_auth::{CheckScope, DomainId};

    fn domain(name: &str) -> ProtectionDomain<String> {
        ProtectionDomain::new(DomainId::derived(name), |_: &String, _: &CheckScope| true)
    }

    #[test]
    fn strips_engine_domain_from_assigned() {
        let engine = domain("engine");
        let caller = domain("caller");
        let combiner = DelegateCombiner::new(engine.clone());

        let combined = combiner.combine(&[caller.clone()], &[engine, caller.clone()]);
        assert_eq!(combined, vec![caller]);
    }

    #[test]
    fn keeps_foreign_assigned_domains() {
        let engine = domain("engine");
        let caller = domain("caller");
        let other = domain("other");
        let combiner = DelegateCombiner::new(engine.clone());

        let combined = combiner.combine(&[caller.clone()], &[other.clone(), engine]);
        assert_eq!(combined, vec![caller, other]);
    }

    #[test]
    fn empty_current_yields_surviving_assigned() {
        let engine = domain("engine");
        let other = domain("other");
        let combiner = DelegateCombiner::new(engine.clone());

        let combined = combiner.combine(&[], &[engine, other.clone()]);
        assert_eq!(combined, vec![other]);
    }
}
