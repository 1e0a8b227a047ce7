//! Content-addressed security contexts.
//!
//! A [`SecurityContext`] is an immutable bundle of protection domains plus
//! optional combining behavior. Contexts are **content-addressed**: two
//! contexts built from equal (domain-set, combiner, privileged-context,
//! privileged-flag) tuples are the *same* shared instance, not merely
//! equal values. That invariant is what makes instance identity usable as
//! a cache key everywhere else in the engine.
//!
//! Canonical instances live in a [`ContextCache`] — an explicitly
//! constructed, dependency-injected service rather than process-global
//! state. The cache retains contexts weakly, so an unreferenced context
//! can be dropped without ever violating the same-instance invariant for
//! contexts still live.
//!
//! ```text
//! ContextSpec ──► ContextCache::build ──► canonical SecurityContext
//!                      │  (normalize, content-hash, adopt-on-race)
//!                      ▼
//!            DashMap<ContextKey, Weak<inner>>
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use warden_auth::{DomainCombiner, DomainId, Permission, ProtectionDomain};

/// An immutable, content-addressed set of protection domains with
/// optional combining behavior.
///
/// # Domain sentinel
///
/// `domains() == None` means "no domains": the context is unrestricted by
/// any stack, distinct from a context that *has* domains. Builders
/// normalize an empty input set to this sentinel.
///
/// # Sharing
///
/// Cloning is an `Arc` bump. Contexts are freely shared across threads
/// and never mutated after construction.
pub struct SecurityContext<P: Permission> {
    pub(crate) inner: Arc<ContextInner<P>>,
}

pub(crate) struct ContextInner<P: Permission> {
    domains: Option<Box<[ProtectionDomain<P>]>>,
    combiner: Option<Arc<dyn DomainCombiner<P>>>,
    privileged: Option<SecurityContext<P>>,
    is_privileged: bool,
    /// Content hash over the identity tuple, computed once.
    hash: u64,
}

impl<P: Permission> SecurityContext<P> {
    /// Returns the protection domains, or `None` for the unrestricted
    /// sentinel.
    #[must_use]
    pub fn domains(&self) -> Option<&[ProtectionDomain<P>]> {
        self.inner.domains.as_deref()
    }

    /// Number of protection domains (zero for the sentinel).
    #[must_use]
    pub fn domain_count(&self) -> usize {
        self.inner.domains.as_ref().map_or(0, |d| d.len())
    }

    /// Returns the combiner associated with this context, if any.
    #[must_use]
    pub fn combiner(&self) -> Option<&Arc<dyn DomainCombiner<P>>> {
        self.inner.combiner.as_ref()
    }

    /// Returns the privileged sub-context, if any.
    #[must_use]
    pub fn privileged_context(&self) -> Option<&SecurityContext<P>> {
        self.inner.privileged.as_ref()
    }

    /// Returns `true` if this context captures a privileged scope.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        self.inner.is_privileged
    }

    /// Returns `true` if both handles refer to the same canonical
    /// instance.
    ///
    /// For contexts built through the same [`ContextCache`] this is
    /// equivalent to content equality, but immune to the cost of a deep
    /// comparison.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Merges this stack-captured context with its assigned (privileged)
    /// context and returns the canonical merged context.
    ///
    /// A pure function: `self` is never mutated. The result may be `self`
    /// or the assigned side unchanged when merging would not shrink
    /// anything. Rules, in order:
    ///
    /// 1. An assigned-side combiner gets first right of refusal: delegate
    ///    the whole merge to it, regardless of either side's domain count.
    /// 2. Neither side has domains: return the assigned side (it may still
    ///    carry meaningful shape), or `self` when there is no assigned side.
    /// 3. No stack domains: the assigned side is already compressed.
    /// 4. No assigned side and at most two stack domains: nothing to
    ///    compress.
    /// 5. General merge: assigned domains first, order preserved, then
    ///    stack domains with duplicates dropped; if the merge equals one
    ///    side's original set, reuse that side's context instead of
    ///    allocating a new canonical entry.
    #[must_use]
    pub fn optimize(&self, cache: &ContextCache<P>) -> SecurityContext<P> {
        let assigned = self.inner.privileged.as_ref();
        let skip_stack = self.inner.domains.is_none();
        let skip_assigned = assigned.map_or(true, |a| a.inner.domains.is_none());

        if let Some(assigned) = assigned {
            if let Some(combiner) = &assigned.inner.combiner {
                let current = self.domains().unwrap_or(&[]);
                let inherited = assigned.domains().unwrap_or(&[]);
                let combined = combiner.combine(current, inherited);
                return cache.build(
                    ContextSpec::with_domains(combined)
                        .privileged_context(assigned.clone())
                        .combiner(Arc::clone(combiner)),
                );
            }
        }

        if skip_stack {
            // With no stack domains the assigned side is already the
            // whole answer, whether or not it carries domains.
            return assigned.cloned().unwrap_or_else(|| self.clone());
        }

        let stack = self.domains().unwrap_or(&[]);
        if skip_assigned && stack.len() <= 2 {
            return self.clone();
        }

        let inherited = if skip_assigned {
            &[]
        } else {
            assigned.and_then(|a| a.domains()).unwrap_or(&[])
        };

        let mut merged: Vec<ProtectionDomain<P>> = inherited.to_vec();
        for domain in stack {
            if !merged.contains(domain) {
                merged.push(domain.clone());
            }
        }

        if !skip_assigned && merged.len() == inherited.len() {
            return assigned.cloned().unwrap_or_else(|| self.clone());
        }
        if skip_assigned && merged.len() == stack.len() {
            return self.clone();
        }

        cache.build(ContextSpec {
            domains: merged,
            privileged: self.inner.privileged.clone(),
            combiner: None,
            is_privileged: false,
        })
    }
}

impl<P: Permission> Clone for SecurityContext<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Permission> PartialEq for SecurityContext<P> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_instance(other) {
            return true;
        }
        if self.inner.hash != other.inner.hash
            || self.inner.is_privileged != other.inner.is_privileged
        {
            return false;
        }
        if !combiner_eq(&self.inner.combiner, &other.inner.combiner) {
            return false;
        }
        if self.inner.privileged != other.inner.privileged {
            return false;
        }
        domain_set_eq(self.domains(), other.domains())
    }
}

impl<P: Permission> Eq for SecurityContext<P> {}

impl<P: Permission> Hash for SecurityContext<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl<P: Permission> fmt::Debug for SecurityContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("domains", &self.domain_count())
            .field("has_combiner", &self.inner.combiner.is_some())
            .field("is_privileged", &self.inner.is_privileged)
            .finish_non_exhaustive()
    }
}

/// Combiner identity: the same combiner object, not a deep comparison.
fn combiner_eq<P: Permission>(
    a: &Option<Arc<dyn DomainCombiner<P>>>,
    b: &Option<Arc<dyn DomainCombiner<P>>>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Order-independent domain-set equality.
fn domain_set_eq<P: Permission>(
    a: Option<&[ProtectionDomain<P>]>,
    b: Option<&[ProtectionDomain<P>]>,
) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.len() == b.len() && a.iter().all(|domain| b.contains(domain))
        }
        _ => false,
    }
}

/// Input to [`ContextCache::build`].
///
/// Duplicate domains are removed (first occurrence wins) and an empty set
/// normalizes to the unrestricted sentinel. The spec owns its domain
/// vector, so a caller's buffer can never mutate a cached instance later.
pub struct ContextSpec<P: Permission> {
    pub(crate) domains: Vec<ProtectionDomain<P>>,
    pub(crate) privileged: Option<SecurityContext<P>>,
    pub(crate) combiner: Option<Arc<dyn DomainCombiner<P>>>,
    pub(crate) is_privileged: bool,
}

impl<P: Permission> ContextSpec<P> {
    /// A context with no domains: unrestricted by any stack.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::with_domains(Vec::new())
    }

    /// A context restricted by the given domains.
    #[must_use]
    pub fn with_domains(domains: Vec<ProtectionDomain<P>>) -> Self {
        Self {
            domains,
            privileged: None,
            combiner: None,
            is_privileged: false,
        }
    }

    /// Attaches a privileged (assigned) sub-context.
    #[must_use]
    pub fn privileged_context(mut self, context: SecurityContext<P>) -> Self {
        self.privileged = Some(context);
        self
    }

    /// Attaches a combining function.
    #[must_use]
    pub fn combiner(mut self, combiner: Arc<dyn DomainCombiner<P>>) -> Self {
        self.combiner = Some(combiner);
        self
    }

    /// Marks the context as captured from a privileged scope.
    #[must_use]
    pub fn mark_privileged(mut self) -> Self {
        self.is_privileged = true;
        self
    }
}

/// Cache key derived solely from a context's identity-relevant fields.
///
/// Hashes and compares independent of domain iteration order: domain ids
/// are kept sorted. The key holds strong references to the combiner and
/// privileged context so their identities cannot be recycled while the
/// key is retained.
struct ContextKey<P: Permission> {
    domain_ids: Box<[DomainId]>,
    privileged: Option<SecurityContext<P>>,
    combiner: Option<Arc<dyn DomainCombiner<P>>>,
    is_privileged: bool,
    hash: u64,
}

impl<P: Permission> ContextKey<P> {
    fn new(
        domains: &[ProtectionDomain<P>],
        privileged: &Option<SecurityContext<P>>,
        combiner: &Option<Arc<dyn DomainCombiner<P>>>,
        is_privileged: bool,
    ) -> Self {
        let mut domain_ids: Vec<DomainId> = domains.iter().map(ProtectionDomain::id).collect();
        domain_ids.sort_unstable();
        let hash = content_hash(&domain_ids, privileged, combiner, is_privileged);
        Self {
            domain_ids: domain_ids.into_boxed_slice(),
            privileged: privileged.clone(),
            combiner: combiner.clone(),
            is_privileged,
            hash,
        }
    }
}

impl<P: Permission> Clone for ContextKey<P> {
    fn clone(&self) -> Self {
        Self {
            domain_ids: self.domain_ids.clone(),
            privileged: self.privileged.clone(),
            combiner: self.combiner.clone(),
            is_privileged: self.is_privileged,
            hash: self.hash,
        }
    }
}

impl<P: Permission> PartialEq for ContextKey<P> {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.is_privileged == other.is_privileged
            && self.domain_ids == other.domain_ids
            && combiner_eq(&self.combiner, &other.combiner)
            && self.privileged == other.privileged
    }
}

impl<P: Permission> Eq for ContextKey<P> {}

impl<P: Permission> Hash for ContextKey<P> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Content hash over the identity tuple. Domain ids must already be
/// sorted so equal sets hash equally regardless of input order.
fn content_hash<P: Permission>(
    sorted_domain_ids: &[DomainId],
    privileged: &Option<SecurityContext<P>>,
    combiner: &Option<Arc<dyn DomainCombiner<P>>>,
    is_privileged: bool,
) -> u64 {
    let mut hasher = DefaultHasher::new();
    sorted_domain_ids.hash(&mut hasher);
    if let Some(privileged) = privileged {
        hasher.write_u64(privileged.inner.hash);
    } else {
        hasher.write_u8(0);
    }
    if let Some(combiner) = combiner {
        // Combiner identity is the object, so hash its address. The key
        // holds the Arc alive, preventing address recycling.
        hasher.write_usize(Arc::as_ptr(combiner).cast::<()>() as usize);
    } else {
        hasher.write_u8(0);
    }
    is_privileged.hash(&mut hasher);
    hasher.finish()
}

/// Process-wide canonicalizing cache for [`SecurityContext`] instances.
///
/// Explicitly constructed and passed to whoever builds contexts — a
/// service, not a static singleton — which keeps the engine testable and
/// its teardown obvious. Contexts are retained weakly: an instance with
/// no outside references may be dropped, and its stale cache slot is
/// pruned opportunistically.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use warden_auth::{CheckScope, DomainId, ProtectionDomain};
/// use warden_engine::{ContextCache, ContextSpec};
///
/// let cache: Arc<ContextCache<String>> = Arc::new(ContextCache::new());
/// let d1 = ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| true);
/// let d2 = ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| true);
///
/// // Same set, different input order: the same canonical instance.
/// let a = cache.build(ContextSpec::with_domains(vec![d1.clone(), d2.clone()]));
/// let b = cache.build(ContextSpec::with_domains(vec![d2, d1]));
/// assert!(a.same_instance(&b));
/// ```
pub struct ContextCache<P: Permission> {
    entries: DashMap<ContextKey<P>, Weak<ContextInner<P>>>,
    builds: AtomicU64,
}

/// Builds between opportunistic prunes of dead weak slots.
const PRUNE_INTERVAL: u64 = 64;

impl<P: Permission> ContextCache<P> {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            builds: AtomicU64::new(0),
        }
    }

    /// Builds (or fetches) the canonical context for `spec`.
    ///
    /// Put-if-absent semantics: when two threads race to build an equal
    /// context, both succeed locally but only one instance becomes
    /// canonical and both callers converge on it.
    #[must_use]
    pub fn build(&self, spec: ContextSpec<P>) -> SecurityContext<P> {
        self.maybe_prune();

        let ContextSpec {
            domains,
            privileged,
            combiner,
            is_privileged,
        } = spec;

        // Normalize: drop duplicates (first occurrence wins), then map an
        // empty set to the unrestricted sentinel.
        let mut unique: Vec<ProtectionDomain<P>> = Vec::with_capacity(domains.len());
        for domain in domains {
            if !unique.contains(&domain) {
                unique.push(domain);
            }
        }

        let key = ContextKey::new(&unique, &privileged, &combiner, is_privileged);
        let normalized = if unique.is_empty() {
            None
        } else {
            Some(unique.into_boxed_slice())
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(live) = occupied.get().upgrade() {
                    return SecurityContext { inner: live };
                }
                let inner = Arc::new(ContextInner {
                    domains: normalized,
                    combiner,
                    privileged,
                    is_privileged,
                    hash: occupied.key().hash,
                });
                occupied.insert(Arc::downgrade(&inner));
                SecurityContext { inner }
            }
            Entry::Vacant(vacant) => {
                let inner = Arc::new(ContextInner {
                    domains: normalized,
                    combiner,
                    privileged,
                    is_privileged,
                    hash: vacant.key().hash,
                });
                vacant.insert(Arc::downgrade(&inner));
                SecurityContext { inner }
            }
        }
    }

    /// Number of cache slots, including not-yet-pruned dead ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn maybe_prune(&self) {
        if self.builds.fetch_add(1, Ordering::Relaxed) % PRUNE_INTERVAL != 0 {
            return;
        }
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }
}

impl<P: Permission> Default for ContextCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_auth::CheckScope;

    fn allow(name: &str) -> ProtectionDomain<String> {
        ProtectionDomain::new(DomainId::derived(name), |_: &String, _: &CheckScope| true)
    }

    struct KeepAssigned;

    impl DomainCombiner<String> for KeepAssigned {
        fn combine(
            &self,
            _current: &[ProtectionDomain<String>],
            assigned: &[ProtectionDomain<String>],
        ) -> Vec<ProtectionDomain<String>> {
            assigned.to_vec()
        }
    }

    #[test]
    fn content_addressing_ignores_input_order() {
        let cache = ContextCache::new();
        let (a, b, c) = (allow("a"), allow("b"), allow("c"));

        let first = cache.build(ContextSpec::with_domains(vec![
            a.clone(),
            b.clone(),
            c.clone(),
        ]));
        let second = cache.build(ContextSpec::with_domains(vec![c, a, b]));

        assert!(first.same_instance(&second));
        assert_eq!(first, second);
    }

    #[test]
    fn duplicates_are_dropped() {
        let cache = ContextCache::new();
        let a = allow("a");

        let ctx = cache.build(ContextSpec::with_domains(vec![a.clone(), a.clone(), a]));
        assert_eq!(ctx.domain_count(), 1);
    }

    #[test]
    fn empty_set_normalizes_to_sentinel() {
        let cache: ContextCache<String> = ContextCache::new();

        let ctx = cache.build(ContextSpec::unrestricted());
        assert!(ctx.domains().is_none());
        assert_eq!(ctx.domain_count(), 0);
    }

    #[test]
    fn privileged_flag_distinguishes_contexts() {
        let cache = ContextCache::new();
        let a = allow("a");

        let plain = cache.build(ContextSpec::with_domains(vec![a.clone()]));
        let privileged = cache.build(ContextSpec::with_domains(vec![a]).mark_privileged());

        assert!(!plain.same_instance(&privileged));
        assert_ne!(plain, privileged);
    }

    #[test]
    fn distinct_combiner_objects_distinguish_contexts() {
        let cache = ContextCache::new();
        let a = allow("a");
        let c1: Arc<dyn DomainCombiner<String>> = Arc::new(KeepAssigned);
        let c2: Arc<dyn DomainCombiner<String>> = Arc::new(KeepAssigned);

        let first = cache.build(ContextSpec::with_domains(vec![a.clone()]).combiner(Arc::clone(&c1)));
        let again = cache.build(ContextSpec::with_domains(vec![a.clone()]).combiner(c1));
        let other = cache.build(ContextSpec::with_domains(vec![a]).combiner(c2));

        assert!(first.same_instance(&again));
        assert!(!first.same_instance(&other));
    }

    #[test]
    fn dead_contexts_can_be_rebuilt() {
        let cache = ContextCache::new();
        let a = allow("a");

        let first = cache.build(ContextSpec::with_domains(vec![a.clone()]));
        let first_ptr = Arc::as_ptr(&first.inner);
        drop(first);

        // The weak slot is dead; a rebuild gets a fresh canonical
        // instance without any equality-invariant violation (no live
        // instance exists to disagree with).
        let second = cache.build(ContextSpec::with_domains(vec![a]));
        let _ = first_ptr;
        assert_eq!(second.domain_count(), 1);
    }

    #[test]
    fn optimize_routes_through_combiner_even_with_empty_stack() {
        let cache = ContextCache::new();
        let a = allow("a");
        let combiner: Arc<dyn DomainCombiner<String>> = Arc::new(KeepAssigned);

        let assigned = cache.build(
            ContextSpec::with_domains(vec![a.clone()]).combiner(Arc::clone(&combiner)),
        );
        let stack = cache.build(
            ContextSpec::unrestricted()
                .privileged_context(assigned)
                .mark_privileged(),
        );

        let merged = stack.optimize(&cache);
        assert_eq!(merged.domain_count(), 1);
        assert_eq!(merged.domains().map(|d| d[0].clone()), Some(a));
        assert!(merged.combiner().is_some());
    }

    #[test]
    fn optimize_returns_self_for_small_stack_without_assigned() {
        let cache = ContextCache::new();
        let ctx = cache.build(ContextSpec::with_domains(vec![allow("a"), allow("b")]));

        let optimized = ctx.optimize(&cache);
        assert!(optimized.same_instance(&ctx));
    }

    #[test]
    fn optimize_returns_assigned_when_stack_is_empty() {
        let cache = ContextCache::new();
        let assigned = cache.build(ContextSpec::with_domains(vec![allow("a")]));
        let stack = cache.build(
            ContextSpec::unrestricted()
                .privileged_context(assigned.clone())
                .mark_privileged(),
        );

        let optimized = stack.optimize(&cache);
        assert!(optimized.same_instance(&assigned));
    }

    #[test]
    fn optimize_merges_assigned_first_and_dedupes() {
        let cache = ContextCache::new();
        let (a, b, c, d) = (allow("a"), allow("b"), allow("c"), allow("d"));

        let assigned = cache.build(ContextSpec::with_domains(vec![a.clone(), b.clone()]));
        let stack = cache.build(
            ContextSpec::with_domains(vec![b.clone(), c.clone(), d.clone()])
                .privileged_context(assigned)
                .mark_privileged(),
        );

        let merged = stack.optimize(&cache);
        let order: Vec<DomainId> = merged
            .domains()
            .expect("merged context has domains")
            .iter()
            .map(ProtectionDomain::id)
            .collect();
        assert_eq!(order, vec![a.id(), b.id(), c.id(), d.id()]);
    }

    #[test]
    fn optimize_reuses_assigned_when_stack_adds_nothing() {
        let cache = ContextCache::new();
        let (a, b, c) = (allow("a"), allow("b"), allow("c"));

        let assigned = cache.build(ContextSpec::with_domains(vec![
            a.clone(),
            b.clone(),
            c.clone(),
        ]));
        let stack = cache.build(
            ContextSpec::with_domains(vec![c, b, a])
                .privileged_context(assigned.clone())
                .mark_privileged(),
        );

        let merged = stack.optimize(&cache);
        assert!(merged.same_instance(&assigned));
    }
}
