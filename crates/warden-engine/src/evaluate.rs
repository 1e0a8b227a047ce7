//! Fan-out evaluation of a permission against a set of domains.
//!
//! A permission is granted only when **every** domain implies it, so the
//! per-domain policy calls are independent and can run concurrently. For
//! small sets the spawn cost dwarfs the win and the evaluator runs the
//! domains inline with early exit on the first denial; at
//! [`EvaluatorConfig::parallel_threshold`] domains and above it fans out
//! one worker thread per domain and collects verdicts as they arrive.
//!
//! The fan-in wait honors the caller's [`CancelToken`]: a cancellation
//! observed mid-wait does not abandon the check — the evaluator re-runs
//! the full domain set sequentially on the calling thread, so the caller
//! still gets a complete verdict, and the cancellation is re-asserted on
//! exit for whoever observes the token next.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};
use warden_auth::{CancelToken, CheckScope, Permission, ProtectionDomain};

/// Domain count at which evaluation switches from inline to one worker
/// thread per domain.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

/// Upper bound on the fan-in wait for worker verdicts.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(180);

/// Granularity of the fan-in wait; each slice re-checks cancellation.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Evaluation failed for a reason other than an ordinary denial.
#[derive(Debug, Error)]
pub enum EvalFault {
    /// No verdict arrived within the configured wait bound.
    #[error("evaluation timed out after {waited:?}")]
    Timeout {
        /// How long the evaluator waited before giving up.
        waited: Duration,
    },

    /// A worker disappeared or a policy panicked.
    #[error("evaluation worker failed: {reason}")]
    Worker {
        /// Human-readable description of the failure.
        reason: String,
    },
}

/// Tuning knobs for [`Evaluator`].
#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    /// Domain count at which to fan out worker threads.
    pub parallel_threshold: usize,
    /// Upper bound on the fan-in wait.
    pub wait_timeout: Duration,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        }
    }
}

/// Evaluates a permission against a domain set, inline or fanned out.
#[derive(Debug, Default)]
pub struct Evaluator {
    config: EvaluatorConfig,
}

impl Evaluator {
    /// Creates an evaluator with the given configuration.
    #[must_use]
    pub fn new(config: EvaluatorConfig) -> Self {
        Self { config }
    }

    /// Returns `Ok(true)` when every domain implies `permission`,
    /// `Ok(false)` on the first denial, and a fault when no complete
    /// verdict could be reached.
    ///
    /// The caller's pending cancellation, if any, is cleared for the
    /// duration of the evaluation and restored on every exit path, so a
    /// cancellation aimed at an *enclosing* operation is neither lost nor
    /// allowed to corrupt this check.
    pub fn evaluate<P: Permission>(
        &self,
        permission: &P,
        domains: &[ProtectionDomain<P>],
        scope: &CheckScope,
    ) -> Result<bool, EvalFault> {
        // Save-and-clear the pending cancellation; the guard re-asserts
        // it on drop no matter how we leave.
        let restore = RestoreCancel::save(scope.cancel());

        if domains.len() < self.config.parallel_threshold {
            let granted = evaluate_inline(permission, domains, scope);
            drop(restore);
            return Ok(granted);
        }
        self.evaluate_parallel(permission, domains, scope)
        // `restore` drops here, re-asserting any saved or newly observed
        // cancellation.
    }

    fn evaluate_parallel<P: Permission>(
        &self,
        permission: &P,
        domains: &[ProtectionDomain<P>],
        scope: &CheckScope,
    ) -> Result<bool, EvalFault> {
        let (tx, rx) = mpsc::channel::<Result<bool, String>>();

        for domain in domains {
            let tx = tx.clone();
            let domain = domain.clone();
            let permission = permission.clone();
            let scope = scope.clone();
            let spawned = thread::Builder::new()
                .name("warden-eval".into())
                .spawn(move || {
                    let verdict = panic::catch_unwind(AssertUnwindSafe(|| {
                        domain.implies(&permission, &scope)
                    }))
                    .map_err(|payload| panic_reason(payload.as_ref()));
                    // The receiver may have left early on a denial.
                    let _ = tx.send(verdict);
                });
            if let Err(err) = spawned {
                return Err(EvalFault::Worker {
                    reason: format!("failed to spawn evaluation worker: {err}"),
                });
            }
        }
        drop(tx);

        let started = Instant::now();
        let deadline = started + self.config.wait_timeout;
        let mut remaining = domains.len();

        while remaining > 0 {
            let now = Instant::now();
            if now >= deadline {
                warn!(
                    waited_ms = started.elapsed().as_millis() as u64,
                    outstanding = remaining,
                    "evaluation wait exhausted"
                );
                return Err(EvalFault::Timeout {
                    waited: started.elapsed(),
                });
            }
            if scope.cancel().take() {
                // The caller wants out of the *wait*, not out of the
                // decision. Abandon the workers and produce the complete
                // verdict inline, then re-assert the cancellation for
                // whoever observes the token next.
                debug!("cancellation during fan-in wait, re-running inline");
                let granted = evaluate_inline(permission, domains, scope);
                scope.cancel().cancel();
                return Ok(granted);
            }

            let slice = WAIT_SLICE.min(deadline - now);
            match rx.recv_timeout(slice) {
                Ok(Ok(true)) => remaining -= 1,
                Ok(Ok(false)) => return Ok(false),
                Ok(Err(reason)) => return Err(EvalFault::Worker { reason }),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    // All senders gone with verdicts outstanding: a
                    // worker died without reporting.
                    return Err(EvalFault::Worker {
                        reason: "evaluation worker exited without a verdict".into(),
                    });
                }
            }
        }

        Ok(true)
    }
}

/// Sequential all-domains evaluation with early exit on denial.
fn evaluate_inline<P: Permission>(
    permission: &P,
    domains: &[ProtectionDomain<P>],
    scope: &CheckScope,
) -> bool {
    domains
        .iter()
        .all(|domain| domain.implies(permission, scope))
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("policy panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("policy panicked: {message}")
    } else {
        "policy panicked".into()
    }
}

/// Drop guard pairing [`CancelToken::take`]: re-asserts the token on drop
/// when it was set at save time.
struct RestoreCancel<'a> {
    token: &'a CancelToken,
    was_set: bool,
}

impl<'a> RestoreCancel<'a> {
    fn save(token: &'a CancelToken) -> Self {
        let was_set = token.take();
        Self { token, was_set }
    }
}

impl Drop for RestoreCancel<'_> {
    fn drop(&mut self) {
        if self.was_set {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warden_auth::DomainId;

    fn grant_counting(calls: Arc<AtomicUsize>) -> ProtectionDomain<String> {
        ProtectionDomain::new(DomainId::new(), move |_: &String, _: &CheckScope| {
            calls.fetch_add(1, Ordering::SeqCst);
            true
        })
    }

    fn deny() -> ProtectionDomain<String> {
        ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| false)
    }

    #[test]
    fn inline_path_consults_every_domain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let domains = vec![
            grant_counting(Arc::clone(&calls)),
            grant_counting(Arc::clone(&calls)),
            grant_counting(Arc::clone(&calls)),
        ];
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"net.connect".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Ok(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn inline_path_stops_at_first_denial() {
        let calls = Arc::new(AtomicUsize::new(0));
        let domains = vec![deny(), grant_counting(Arc::clone(&calls))];
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"net.connect".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Ok(false)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn parallel_path_grants_when_all_grant() {
        let calls = Arc::new(AtomicUsize::new(0));
        let domains: Vec<_> = (0..6).map(|_| grant_counting(Arc::clone(&calls))).collect();
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Ok(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn parallel_path_denies_on_any_denial() {
        let domains: Vec<_> = (0..5)
            .map(|_| grant_counting(Arc::new(AtomicUsize::new(0))))
            .chain(std::iter::once(deny()))
            .collect();
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Ok(false)));
    }

    #[test]
    fn small_sets_fan_out_when_the_threshold_allows() {
        let domains = vec![
            grant_counting(Arc::new(AtomicUsize::new(0))),
            grant_counting(Arc::new(AtomicUsize::new(0))),
            deny(),
        ];
        let evaluator = Evaluator::new(EvaluatorConfig {
            parallel_threshold: 1,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
        });

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Ok(false)));
    }

    #[test]
    fn slow_workers_trip_the_timeout() {
        let domains: Vec<_> = (0..4)
            .map(|_| {
                ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| {
                    thread::sleep(Duration::from_secs(5));
                    true
                })
            })
            .collect();
        let evaluator = Evaluator::new(EvaluatorConfig {
            parallel_threshold: 4,
            wait_timeout: Duration::from_millis(120),
        });

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        assert!(matches!(verdict, Err(EvalFault::Timeout { .. })));
    }

    #[test]
    fn panicking_policy_surfaces_as_worker_fault() {
        let mut domains: Vec<_> = (0..3)
            .map(|_| grant_counting(Arc::new(AtomicUsize::new(0))))
            .collect();
        domains.push(ProtectionDomain::new(
            DomainId::new(),
            |_: &String, _: &CheckScope| -> bool { panic!("backing store unavailable") },
        ));
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        match verdict {
            Err(EvalFault::Worker { reason }) => {
                assert!(reason.contains("backing store unavailable"));
            }
            other => panic!("expected worker fault, got {other:?}"),
        }
    }

    #[test]
    fn formatted_panic_message_is_preserved() {
        let mut domains: Vec<_> = (0..3)
            .map(|_| grant_counting(Arc::new(AtomicUsize::new(0))))
            .collect();
        domains.push(ProtectionDomain::new(
            DomainId::new(),
            |_: &String, _: &CheckScope| -> bool {
                let shard = 3;
                panic!("shard {shard} offline");
            },
        ));
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &CheckScope::root());
        match verdict {
            Err(EvalFault::Worker { reason }) => {
                assert!(reason.contains("shard 3 offline"), "got: {reason}");
            }
            other => panic!("expected worker fault, got {other:?}"),
        }
    }

    #[test]
    fn cancellation_during_wait_still_yields_full_verdict() {
        let token = CancelToken::new();
        let scope = CheckScope::with_cancel(token.clone());

        // Slow grants so the fan-in is mid-wait when the cancel lands.
        let domains: Vec<_> = (0..4)
            .map(|_| {
                ProtectionDomain::new(DomainId::new(), |_: &String, _: &CheckScope| {
                    thread::sleep(Duration::from_millis(200));
                    true
                })
            })
            .collect();
        let evaluator = Evaluator::new(EvaluatorConfig {
            parallel_threshold: 4,
            wait_timeout: Duration::from_secs(5),
        });

        let canceller = {
            let token = token.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &scope);
        canceller.join().expect("canceller thread");

        assert!(matches!(verdict, Ok(true)));
        // The guard re-asserted the cancellation for the caller.
        assert!(token.is_cancelled());
    }

    #[test]
    fn pending_cancellation_is_restored_after_inline_run() {
        let token = CancelToken::new();
        token.cancel();
        let scope = CheckScope::with_cancel(token.clone());
        let domains = vec![grant_counting(Arc::new(AtomicUsize::new(0)))];
        let evaluator = Evaluator::default();

        let verdict = evaluator.evaluate(&"fs.read".to_string(), &domains, &scope);
        assert!(matches!(verdict, Ok(true)));
        assert!(token.is_cancelled());
    }
}
