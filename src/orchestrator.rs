//! Form Orchestrator: parameter ownership and recompute sequencing.
//!
//! Owns the authoritative parameter map and the last successfully derived
//! `(variables, execution_result)` pair.
//!
//! # Update cycle
//!
//! | Step | Action                                                   |
//! |------|----------------------------------------------------------|
//! | 1    | merge `{name: value}` and take a submission number       |
//! | 2    | wait the debounce window (when configured)               |
//! | 3    | take the recompute gate; drop if a newer submission exists |
//! | 4    | recompute against the current parameter map             |
//! | 5    | discard if superseded or detached, else apply or log     |
//!
//! ## Invariants
//!
//! - At most one recompute is in flight per orchestrator.
//! - A result is applied only if no newer submission exists: ordering is by
//!   submission, never by completion.
//! - Variables and execution result are replaced together or not at all.
//! - A merged edit is never rolled back when its recompute fails.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use form_types::{ExecutionResult, FormSnapshot, ParameterMap, VariableDescriptor};
use tokio::sync::{watch, Mutex, RwLock};

use crate::bridge::Recompute;
use crate::error::FormError;

// ---------------------------------------------------------------------------
// UpdateOutcome
// ---------------------------------------------------------------------------

/// What happened to one `update` submission.
#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Recompute succeeded and its result is now current.
    Applied(FormSnapshot),
    /// Recompute failed; previous variables and result are still current,
    /// the parameter edit is kept.
    Stale { error: FormError },
    /// A newer submission made this one irrelevant.
    Superseded,
    /// The orchestrator was detached; nothing was changed.
    Detached,
}

impl UpdateOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpdateOutcome::Applied(_))
    }
}

// ---------------------------------------------------------------------------
// FormOrchestrator
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct FormState {
    parameters: ParameterMap,
    variables: Vec<VariableDescriptor>,
    execution_result: Option<ExecutionResult>,
    last_error: Option<FormError>,
}

pub struct FormOrchestrator {
    recompute: Arc<dyn Recompute>,
    state: RwLock<FormState>,
    /// Held for the duration of a recompute.
    gate: Mutex<()>,
    submitted: AtomicU64,
    detached: AtomicBool,
    debounce: Duration,
    snapshots: watch::Sender<Option<FormSnapshot>>,
}

impl FormOrchestrator {
    pub fn new(recompute: Arc<dyn Recompute>) -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            recompute,
            state: RwLock::new(FormState::default()),
            gate: Mutex::new(()),
            submitted: AtomicU64::new(0),
            detached: AtomicBool::new(false),
            debounce: Duration::ZERO,
            snapshots,
        }
    }

    /// Wait this long after each change before recomputing.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Preload parameters (bulk initial load).
    pub fn with_parameters(mut self, parameters: ParameterMap) -> Self {
        self.state.get_mut().parameters = parameters;
        self
    }

    /// First recompute after mount. Zero variables is a valid outcome.
    pub async fn initialize(&self) -> UpdateOutcome {
        tracing::info!("Initializing form");
        self.update(None, None).await
    }

    /// Recompute against the unchanged parameter map.
    pub async fn refresh(&self) -> UpdateOutcome {
        self.update(None, None).await
    }

    /// Merge one field then recompute. `None` clears the field but keeps the key.
    pub async fn update_field(&self, name: &str, value: Option<String>) -> UpdateOutcome {
        self.update(Some(name), value).await
    }

    /// Merge `{name: value}` when a name is given, then submit one recompute.
    ///
    /// Never fails: recompute errors are logged and reported as
    /// [`UpdateOutcome::Stale`].
    pub async fn update(&self, name: Option<&str>, value: Option<String>) -> UpdateOutcome {
        if self.is_detached() {
            return UpdateOutcome::Detached;
        }

        let seq = {
            let mut state = self.state.write().await;
            if let Some(name) = name {
                state.parameters.set(name, value);
            }
            self.submitted.fetch_add(1, Ordering::SeqCst) + 1
        };

        if !self.debounce.is_zero() {
            tokio::time::sleep(self.debounce).await;
        }

        let _gate = self.gate.lock().await;

        if self.is_detached() {
            return UpdateOutcome::Detached;
        }
        if self.is_superseded(seq) {
            tracing::debug!(seq, "Dropping superseded recompute before it started");
            return UpdateOutcome::Superseded;
        }

        let parameters = self.state.read().await.parameters.clone();
        let result = self.recompute.recompute(&parameters).await;

        // Merges also hold the write lock, so no submission can slip in
        // between this check and the apply below.
        let mut state = self.state.write().await;
        if self.is_detached() {
            tracing::debug!(seq, "Discarding recompute result after detach");
            return UpdateOutcome::Detached;
        }
        if self.is_superseded(seq) {
            tracing::debug!(seq, "Discarding recompute result superseded during execution");
            return UpdateOutcome::Superseded;
        }

        match result {
            Ok(recomputed) => {
                state.variables = recomputed.variables;
                state.execution_result = Some(recomputed.execution_result.clone());
                state.last_error = None;

                let snapshot = FormSnapshot {
                    execution_result: recomputed.execution_result,
                    parameters,
                    variables: state.variables.clone(),
                };
                tracing::debug!(
                    seq,
                    variables = snapshot.variables.len(),
                    "Applied recompute"
                );
                self.snapshots.send_replace(Some(snapshot.clone()));
                UpdateOutcome::Applied(snapshot)
            }
            Err(error) => {
                tracing::error!(seq, %error, "Template recompute failed; keeping previous variables");
                state.last_error = Some(error.clone());
                UpdateOutcome::Stale { error }
            }
        }
    }

    /// Stop accepting updates and discard anything in flight.
    pub fn detach(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            tracing::info!("Form detached");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn is_superseded(&self, seq: u64) -> bool {
        self.submitted.load(Ordering::SeqCst) > seq
    }

    /// Receive every applied snapshot. Holds `None` until the first success.
    pub fn subscribe(&self) -> watch::Receiver<Option<FormSnapshot>> {
        self.snapshots.subscribe()
    }

    /// Last applied snapshot
    pub fn snapshot(&self) -> Option<FormSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub async fn parameters(&self) -> ParameterMap {
        self.state.read().await.parameters.clone()
    }

    pub async fn variables(&self) -> Vec<VariableDescriptor> {
        self.state.read().await.variables.clone()
    }

    pub async fn execution_result(&self) -> Option<ExecutionResult> {
        self.state.read().await.execution_result.clone()
    }

    /// Error from the most recent recompute, cleared by the next success.
    pub async fn last_error(&self) -> Option<FormError> {
        self.state.read().await.last_error.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ExecutionBridge, Recomputed};
    use crate::engine::MarkupEngine;
    use crate::error::FormResult;
    use form_types::VariableKind;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn markup(source: &str) -> FormOrchestrator {
        FormOrchestrator::new(Arc::new(ExecutionBridge::new(
            Arc::new(MarkupEngine::new()),
            source,
        )))
    }

    /// Echoes the `Name` parameter; parks while `Name == "first"` until released.
    #[derive(Default)]
    struct HeldRecompute {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Recompute for HeldRecompute {
        async fn recompute(&self, parameters: &ParameterMap) -> FormResult<Recomputed> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if parameters.get("Name") == Some("first") {
                self.entered.notify_one();
                self.release.notified().await;
            }
            Ok(Recomputed {
                variables: vec![VariableDescriptor::new("Name", VariableKind::Text)],
                execution_result: ExecutionResult::new(
                    serde_json::json!({ "name": parameters.get("Name") }),
                ),
            })
        }
    }

    #[tokio::test]
    async fn test_initialize_with_zero_variables() {
        let orch = markup("Plain text, nothing to fill in.");
        let outcome = orch.initialize().await;

        assert!(outcome.is_applied());
        assert!(orch.variables().await.is_empty());
        assert!(orch.execution_result().await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_is_idempotent() {
        let orch = markup("Hello [[Name]] on [[Start: Date]]");
        orch.initialize().await;

        let first = match orch.refresh().await {
            UpdateOutcome::Applied(snapshot) => snapshot,
            other => panic!("Expected Applied, got {:?}", other),
        };
        let second = match orch.refresh().await {
            UpdateOutcome::Applied(snapshot) => snapshot,
            other => panic!("Expected Applied, got {:?}", other),
        };

        assert_eq!(first.variables, second.variables);
        assert_eq!(first.execution_result, second.execution_result);
    }

    #[tokio::test]
    async fn test_failed_recompute_keeps_edit_and_previous_result() {
        let orch = markup("Fee: [[Fee: Number]]");
        orch.initialize().await;
        let before = orch.execution_result().await.expect("initial result");

        let outcome = orch.update_field("Fee", Some("ten".into())).await;

        assert!(matches!(
            outcome,
            UpdateOutcome::Stale {
                error: FormError::Execution { .. }
            }
        ));
        assert_eq!(orch.parameters().await.get("Fee"), Some("ten"));
        assert_eq!(orch.execution_result().await, Some(before));
        assert!(orch.last_error().await.is_some());

        let outcome = orch.update_field("Fee", Some("10".into())).await;
        assert!(outcome.is_applied());
        assert!(orch.last_error().await.is_none());
        assert_eq!(
            orch.execution_result().await.unwrap().payload()["text"],
            "Fee: 10"
        );
    }

    #[tokio::test]
    async fn test_compile_error_leaves_nothing_rendered() {
        let orch = markup("Broken [[Name");
        let outcome = orch.initialize().await;

        assert!(matches!(
            outcome,
            UpdateOutcome::Stale {
                error: FormError::Compile { .. }
            }
        ));
        assert!(orch.variables().await.is_empty());
        assert!(orch.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_clear_keeps_key_with_no_value() {
        let orch = markup("Hello [[Name]]");
        orch.initialize().await;
        orch.update_field("Name", Some("Ada".into())).await;

        let outcome = orch.update_field("Name", None).await;

        assert!(outcome.is_applied());
        let params = orch.parameters().await;
        assert!(params.contains_key("Name"));
        assert!(params.is_cleared("Name"));
    }

    #[tokio::test]
    async fn test_preloaded_parameters_are_used() {
        let params: ParameterMap = [("Name", "Grace")].into_iter().collect();
        let orch = markup("Hello [[Name]]").with_parameters(params);

        orch.initialize().await;

        assert_eq!(
            orch.execution_result().await.unwrap().payload()["text"],
            "Hello Grace"
        );
    }

    #[tokio::test]
    async fn test_subscribers_receive_snapshots() {
        let orch = markup("Hello [[Name]]");
        let mut rx = orch.subscribe();
        assert!(rx.borrow().is_none());

        orch.initialize().await;
        orch.update_field("Name", Some("Ada".into())).await;

        rx.changed().await.expect("sender alive");
        let snapshot = rx.borrow().clone().expect("snapshot");
        assert_eq!(snapshot.parameters.get("Name"), Some("Ada"));
        assert_eq!(snapshot.variable_names(), vec!["Name"]);
    }

    #[tokio::test]
    async fn test_stale_result_is_rejected() {
        let fake = Arc::new(HeldRecompute::default());
        let orch = Arc::new(FormOrchestrator::new(fake.clone()));
        orch.initialize().await;

        let first = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_field("Name", Some("first".into())).await })
        };
        fake.entered.notified().await;

        let second = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_field("Name", Some("second".into())).await })
        };
        while orch.parameters().await.get("Name") != Some("second") {
            tokio::task::yield_now().await;
        }

        // The first recompute finishes after the second was submitted.
        fake.release.notify_one();

        assert!(matches!(first.await.unwrap(), UpdateOutcome::Superseded));
        assert!(second.await.unwrap().is_applied());
        assert_eq!(
            orch.execution_result().await.unwrap().payload()["name"],
            "second"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_applied_snapshot_matches_its_parameters() {
        let fake = Arc::new(HeldRecompute::default());
        let orch = Arc::new(FormOrchestrator::new(fake.clone()));
        orch.initialize().await;

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.update_field("Name", Some(format!("v{i}"))).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            if let UpdateOutcome::Applied(snapshot) = handle.await.unwrap() {
                applied += 1;
                assert_eq!(
                    snapshot.execution_result.payload()["name"],
                    snapshot.parameters.get("Name").unwrap()
                );
            }
        }

        assert!(applied >= 1);
        let current = orch.snapshot().expect("snapshot");
        assert_eq!(current.parameters, orch.parameters().await);
        assert_eq!(
            orch.execution_result().await.unwrap().payload()["name"],
            current.parameters.get("Name").unwrap()
        );
    }

    #[tokio::test]
    async fn test_detach_discards_in_flight_result() {
        let fake = Arc::new(HeldRecompute::default());
        let orch = Arc::new(FormOrchestrator::new(fake.clone()));
        orch.initialize().await;
        let before = orch.execution_result().await;

        let pending = {
            let orch = orch.clone();
            tokio::spawn(async move { orch.update_field("Name", Some("first".into())).await })
        };
        fake.entered.notified().await;
        orch.detach();
        fake.release.notify_one();

        assert!(matches!(pending.await.unwrap(), UpdateOutcome::Detached));
        assert_eq!(orch.execution_result().await, before);

        let outcome = orch.update_field("Name", Some("later".into())).await;
        assert!(matches!(outcome, UpdateOutcome::Detached));
        assert_eq!(orch.parameters().await.get("Name"), Some("first"));
    }

    #[tokio::test]
    async fn test_debounce_drops_intermediate_submissions() {
        let fake = Arc::new(HeldRecompute::default());
        let orch = Arc::new(
            FormOrchestrator::new(fake.clone()).with_debounce(Duration::from_millis(50)),
        );
        orch.initialize().await;

        let handles: Vec<_> = ["A", "B", "C"]
            .into_iter()
            .map(|key| {
                let orch = orch.clone();
                tokio::spawn(async move { orch.update_field(key, Some("x".into())).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                UpdateOutcome::Applied(_) => applied += 1,
                UpdateOutcome::Superseded => {}
                other => panic!("Unexpected outcome {:?}", other),
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
        let params = orch.parameters().await;
        assert_eq!(params.defined().count(), 3);
    }
}
