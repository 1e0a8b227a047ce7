//! The security manager: cached permission decisions over contexts.
//!
//! `SecurityManager` answers "may the code captured by this context
//! exercise this permission?" and caches what it learns at two levels:
//!
//! | Cache | Keyed by | Holds | Staleness bound |
//! |-------|----------|-------|-----------------|
//! | delegate cache | caller context | compressed context actually evaluated | delegate TTL |
//! | decision cache | caller context | set of permissions already granted | checked TTL |
//!
//! Both caches key on [`SecurityContext`] instances, which is only sound
//! because contexts are content-addressed by the shared [`ContextCache`]:
//! equal contexts are the same instance, so a lookup by one caller hits
//! decisions recorded by another with the same effective domains.
//!
//! Denials are never cached. A denied permission is re-evaluated on every
//! check, so a policy that starts granting takes effect immediately; a
//! revocation takes effect within the checked TTL or on an explicit
//! [`clear_cache`](SecurityManager::clear_cache).

use crate::combiner::DelegateCombiner;
use crate::context::{ContextCache, ContextSpec, SecurityContext};
use crate::evaluate::{EvalFault, Evaluator, EvaluatorConfig};
use crate::expiring::ExpiringMap;
use arc_swap::ArcSwap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warden_auth::{AccessDenied, CheckScope, DomainCombiner, Permission, ProtectionDomain};

/// Default TTL for cached positive decisions.
pub const DEFAULT_CHECKED_TTL: Duration = Duration::from_secs(15);

/// Default TTL for cached delegate contexts.
pub const DEFAULT_DELEGATE_TTL: Duration = Duration::from_secs(60);

/// Construction parameters for [`SecurityManager`].
///
/// Only the engine's own domain and the administrative permission are
/// mandatory; TTLs and evaluator tuning default to production values.
pub struct ManagerConfig<P: Permission> {
    /// The engine's own protection domain, stripped from every delegate.
    pub engine_domain: ProtectionDomain<P>,
    /// Permission required to clear the decision cache.
    pub admin_permission: P,
    /// TTL for cached positive decisions.
    pub checked_ttl: Duration,
    /// TTL for cached delegate contexts.
    pub delegate_ttl: Duration,
    /// Evaluator tuning.
    pub evaluator: EvaluatorConfig,
}

impl<P: Permission> ManagerConfig<P> {
    /// Configuration with default TTLs and evaluator settings.
    #[must_use]
    pub fn new(engine_domain: ProtectionDomain<P>, admin_permission: P) -> Self {
        Self {
            engine_domain,
            admin_permission,
            checked_ttl: DEFAULT_CHECKED_TTL,
            delegate_ttl: DEFAULT_DELEGATE_TTL,
            evaluator: EvaluatorConfig::default(),
        }
    }
}

/// Permissions already granted for one context within the current cache
/// epoch.
///
/// Shared between all checks for the context; only ever grows, and the
/// whole set ages out with its [`ExpiringMap`] slot.
pub struct CheckedPermissions<P: Permission> {
    granted: RwLock<HashSet<P>>,
}

impl<P: Permission> CheckedPermissions<P> {
    fn new() -> Self {
        Self {
            granted: RwLock::new(HashSet::new()),
        }
    }

    /// Returns `true` if `permission` was already granted this epoch.
    #[must_use]
    pub fn contains(&self, permission: &P) -> bool {
        self.granted.read().contains(permission)
    }

    fn record(&self, permission: P) {
        self.granted.write().insert(permission);
    }
}

type DecisionEpoch<P> = ExpiringMap<SecurityContext<P>, Arc<CheckedPermissions<P>>>;

/// Permission-checking frontend with delegate compression and decision
/// caching.
///
/// Explicitly constructed over a shared [`ContextCache`]; there is no
/// global instance. Cheap to share behind an `Arc`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use warden_auth::{CheckScope, DomainId, ProtectionDomain};
/// use warden_engine::{ContextCache, ContextSpec, ManagerConfig, SecurityManager};
///
/// let contexts = Arc::new(ContextCache::new());
/// let engine_domain = ProtectionDomain::new(
///     DomainId::derived("warden.engine"),
///     |_: &String, _: &CheckScope| true,
/// );
/// let manager = SecurityManager::new(
///     Arc::clone(&contexts),
///     ManagerConfig::new(engine_domain, "warden.admin".to_string()),
/// );
///
/// let reader = ProtectionDomain::new(
///     DomainId::derived("app.reader"),
///     |permission: &String, _: &CheckScope| permission.starts_with("fs.read"),
/// );
/// let caller = contexts.build(ContextSpec::with_domains(vec![reader]));
///
/// assert!(manager.check_permission(&"fs.read:/tmp".to_string(), &caller).is_ok());
/// assert!(manager.check_permission(&"fs.write:/tmp".to_string(), &caller).is_err());
/// ```
pub struct SecurityManager<P: Permission> {
    contexts: Arc<ContextCache<P>>,
    combiner: Arc<dyn DomainCombiner<P>>,
    /// Caller context -> compressed context actually evaluated.
    delegates: ExpiringMap<SecurityContext<P>, SecurityContext<P>>,
    /// Current decision-cache epoch; replaced wholesale on clear.
    checked: ArcSwap<DecisionEpoch<P>>,
    evaluator: Evaluator,
    admin_permission: P,
    /// Canonical context for the engine's own domain; checks from it are
    /// accepted without evaluation.
    trusted: SecurityContext<P>,
    checked_ttl: Duration,
}

impl<P: Permission> SecurityManager<P> {
    /// Creates a manager over the given context cache.
    #[must_use]
    pub fn new(contexts: Arc<ContextCache<P>>, config: ManagerConfig<P>) -> Self {
        let ManagerConfig {
            engine_domain,
            admin_permission,
            checked_ttl,
            delegate_ttl,
            evaluator,
        } = config;
        let trusted = contexts.build(ContextSpec::with_domains(vec![engine_domain.clone()]));
        Self {
            combiner: Arc::new(DelegateCombiner::new(engine_domain)),
            delegates: ExpiringMap::new(delegate_ttl),
            checked: ArcSwap::from_pointee(ExpiringMap::new(checked_ttl)),
            evaluator: Evaluator::new(evaluator),
            admin_permission,
            trusted,
            checked_ttl,
            contexts,
        }
    }

    /// The context cache this manager builds contexts through.
    #[must_use]
    pub fn context_cache(&self) -> &Arc<ContextCache<P>> {
        &self.contexts
    }

    /// The canonical context of the engine's own domain.
    #[must_use]
    pub fn trusted_context(&self) -> &SecurityContext<P> {
        &self.trusted
    }

    /// Checks `permission` for `context` at the top level.
    ///
    /// See [`check_permission_in`](Self::check_permission_in) for the
    /// nested-check variant.
    pub fn check_permission(
        &self,
        permission: &P,
        context: &SecurityContext<P>,
    ) -> Result<(), AccessDenied<P>> {
        self.check_permission_in(permission, context, &CheckScope::root())
    }

    /// Checks `permission` for `context` within an explicit scope.
    ///
    /// Policies that need to re-enter the engine must pass a deepened
    /// scope so the recursion bound holds; a check entering with an
    /// exhausted scope fails closed.
    pub fn check_permission_in(
        &self,
        permission: &P,
        context: &SecurityContext<P>,
        scope: &CheckScope,
    ) -> Result<(), AccessDenied<P>> {
        if scope.exceeded() {
            error!(
                permission = %permission,
                depth = scope.depth(),
                "nested permission checks exceeded the recursion bound"
            );
            return Err(AccessDenied::RecursionExceeded {
                permission: permission.clone(),
                depth: scope.depth(),
            });
        }

        // The engine checking on its own behalf: instance identity is
        // enough, no evaluation needed.
        if context.same_instance(&self.trusted) {
            return Ok(());
        }

        let epoch = self.checked.load_full();
        let decisions = match epoch.get(context) {
            Some(decisions) => decisions,
            None => epoch.put_if_absent(context.clone(), Arc::new(CheckedPermissions::new())),
        };
        if decisions.contains(permission) {
            debug!(permission = %permission, "permission granted (cached)");
            return Ok(());
        }

        let delegate = match self.delegates.get(context) {
            Some(delegate) => delegate,
            None => {
                let delegate = self.delegate_for(context);
                self.delegates.put_if_absent(context.clone(), delegate)
            }
        };

        let Some(domains) = delegate.domains() else {
            // Nothing restricts the delegate.
            decisions.record(permission.clone());
            debug!(permission = %permission, "permission granted (unrestricted)");
            return Ok(());
        };

        match self.evaluator.evaluate(permission, domains, &scope.deepen()) {
            Ok(true) => {
                decisions.record(permission.clone());
                debug!(
                    permission = %permission,
                    domains = domains.len(),
                    "permission granted"
                );
                Ok(())
            }
            Ok(false) => {
                warn!(
                    permission = %permission,
                    domains = domains.len(),
                    "permission denied"
                );
                Err(AccessDenied::Denied {
                    permission: permission.clone(),
                })
            }
            Err(EvalFault::Timeout { waited }) => {
                warn!(
                    permission = %permission,
                    waited_ms = waited.as_millis() as u64,
                    "permission denied: evaluation timed out"
                );
                Err(AccessDenied::EvaluationTimeout {
                    permission: permission.clone(),
                    waited,
                })
            }
            Err(EvalFault::Worker { reason }) => {
                error!(
                    permission = %permission,
                    %reason,
                    "permission denied: evaluation failure"
                );
                Err(AccessDenied::EvaluationFailure {
                    permission: permission.clone(),
                    reason,
                })
            }
        }
    }

    /// Discards every cached positive decision.
    ///
    /// Gated on the administrative permission: `caller` must hold it
    /// under this manager's own policy. The epoch is replaced wholesale,
    /// so checks racing with the clear finish against the epoch they
    /// started with and at worst re-evaluate once.
    pub fn clear_cache(&self, caller: &SecurityContext<P>) -> Result<(), AccessDenied<P>> {
        self.check_permission(&self.admin_permission.clone(), caller)?;
        self.checked
            .store(Arc::new(ExpiringMap::new(self.checked_ttl)));
        info!("decision cache cleared");
        Ok(())
    }

    /// Compresses a caller context into the context actually evaluated:
    /// the caller's effective domains minus the engine's own domain.
    fn delegate_for(&self, context: &SecurityContext<P>) -> SecurityContext<P> {
        let domains = context.domains().map(<[_]>::to_vec).unwrap_or_default();
        let assigned = self.contexts.build(
            ContextSpec::with_domains(domains)
                .combiner(Arc::clone(&self.combiner)),
        );
        let staged = self.contexts.build(
            ContextSpec::unrestricted()
                .privileged_context(assigned)
                .mark_privileged(),
        );
        staged.optimize(&self.contexts)
    }
}
