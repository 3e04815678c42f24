//! Dynamic Form: binds the orchestrator to the mounted input adapters.
//!
//! ```text
//! input(name, UserInput)
//!     │
//!     ▼
//! adapter.on_user_input ──None──► local state only (invalid input)
//!     │ Some(FieldChange)
//!     ▼
//! orchestrator.update_field ──► recompute ──► reconcile adapters
//!                                               │
//!                          saved identity ──────┴──► spawned lookup ──► mpsc ──► apply_lookups
//! ```
//!
//! The mounted adapter set always matches the names of the latest descriptor
//! list. A lookup result is delivered only to the adapter instance that asked
//! for it: each mount gets a fresh generation number and stale generations are
//! dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use form_types::{ParameterMap, VariableDescriptor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::adapters::{
    AdapterContext, AdapterRegistry, EngineIdentityResolver, EngineValidator, FieldView,
    IdentityResolver, InputAdapter, ResolvedIdentity, UserInput,
};
use crate::engine::TemplateEngine;
use crate::error::{FormError, FormResult};
use crate::orchestrator::{FormOrchestrator, UpdateOutcome};

// ---------------------------------------------------------------------------
// Internal types
// ---------------------------------------------------------------------------

struct MountedField {
    adapter: Box<dyn InputAdapter>,
    generation: u64,
    lookup: Option<JoinHandle<()>>,
}

impl MountedField {
    fn abort_lookup(&mut self) {
        if let Some(handle) = self.lookup.take() {
            handle.abort();
        }
    }
}

struct LookupMessage {
    name: String,
    generation: u64,
    result: FormResult<ResolvedIdentity>,
}

// ---------------------------------------------------------------------------
// DynamicForm
// ---------------------------------------------------------------------------

pub struct DynamicForm {
    orchestrator: Arc<FormOrchestrator>,
    engine: Arc<dyn TemplateEngine>,
    registry: AdapterRegistry,
    context: AdapterContext,
    resolver: Arc<dyn IdentityResolver>,
    fields: BTreeMap<String, MountedField>,
    /// Descriptor list the mounted fields were reconciled against
    variables: Vec<VariableDescriptor>,
    lookup_tx: mpsc::UnboundedSender<LookupMessage>,
    lookup_rx: mpsc::UnboundedReceiver<LookupMessage>,
    next_generation: u64,
}

impl DynamicForm {
    pub fn new(orchestrator: Arc<FormOrchestrator>, engine: Arc<dyn TemplateEngine>) -> Self {
        let (lookup_tx, lookup_rx) = mpsc::unbounded_channel();
        Self {
            orchestrator,
            registry: AdapterRegistry::default(),
            context: AdapterContext::new(engine.clone()),
            resolver: Arc::new(EngineIdentityResolver::new(engine.clone())),
            engine,
            fields: BTreeMap::new(),
            variables: Vec::new(),
            lookup_tx,
            lookup_rx,
            next_generation: 0,
        }
    }

    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn IdentityResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Class prefix for text-like inputs
    pub fn with_input_class(mut self, class: impl Into<String>) -> Self {
        self.context.text_like_input_class = class.into();
        self
    }

    pub fn orchestrator(&self) -> &Arc<FormOrchestrator> {
        &self.orchestrator
    }

    /// Initial recompute, then mount one adapter per variable.
    pub async fn mount(&mut self) -> UpdateOutcome {
        let outcome = self.orchestrator.initialize().await;
        self.sync().await;
        outcome
    }

    /// Route one interaction to its field.
    ///
    /// Returns `Ok(None)` when the adapter rejected the input and nothing
    /// was forwarded.
    pub async fn input(&mut self, name: &str, input: UserInput) -> FormResult<Option<UpdateOutcome>> {
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| FormError::field(name, "not a visible field"))?;

        let validator = EngineValidator::new(self.engine.as_ref(), &self.variables);
        let Some(change) = field.adapter.on_user_input(input, &validator) else {
            return Ok(None);
        };

        Ok(Some(self.submit(&change.name, change.value).await))
    }

    /// Entry point for custom hosts that produce values themselves.
    ///
    /// A mounted field for `name` is remounted from the new value, so its
    /// local display never disagrees with the parameter map.
    pub async fn on_change(&mut self, name: &str, value: Option<String>) -> UpdateOutcome {
        if let Some(mut field) = self.fields.remove(name) {
            field.abort_lookup();
        }
        self.submit(name, value).await
    }

    async fn submit(&mut self, name: &str, value: Option<String>) -> UpdateOutcome {
        let outcome = self.orchestrator.update_field(name, value).await;
        self.sync().await;
        outcome
    }

    /// Recompute with unchanged parameters.
    pub async fn refresh(&mut self) -> UpdateOutcome {
        let outcome = self.orchestrator.refresh().await;
        self.sync().await;
        outcome
    }

    /// Move a pristine field into editing.
    pub fn focus(&mut self, name: &str) -> bool {
        match self.fields.get_mut(name) {
            Some(field) => {
                field.adapter.focus();
                true
            }
            None => false,
        }
    }

    /// Reconcile against whatever the orchestrator currently holds.
    pub async fn sync(&mut self) {
        let variables = self.orchestrator.variables().await;
        let parameters = self.orchestrator.parameters().await;
        self.reconcile(variables, &parameters);
    }

    fn reconcile(&mut self, variables: Vec<VariableDescriptor>, parameters: &ParameterMap) {
        if self.orchestrator.is_detached() {
            return;
        }

        self.fields.retain(|name, field| {
            let keep = variables
                .iter()
                .any(|v| &v.name == name && v.kind == *field.adapter.kind());
            if !keep {
                field.abort_lookup();
                tracing::debug!(field = %name, "Unmounted field");
            }
            keep
        });

        for descriptor in &variables {
            if self.fields.contains_key(&descriptor.name) {
                continue;
            }

            let mut adapter =
                self.registry
                    .create(descriptor, parameters.get(&descriptor.name), &self.context);
            self.next_generation += 1;
            let generation = self.next_generation;

            let lookup = adapter
                .take_lookup()
                .map(|canonical| self.spawn_lookup(descriptor.clone(), canonical, generation));

            tracing::debug!(field = %descriptor.name, kind = %descriptor.kind, "Mounted field");
            self.fields.insert(
                descriptor.name.clone(),
                MountedField {
                    adapter,
                    generation,
                    lookup,
                },
            );
        }

        self.variables = variables;
    }

    fn spawn_lookup(
        &self,
        descriptor: VariableDescriptor,
        canonical: String,
        generation: u64,
    ) -> JoinHandle<()> {
        let resolver = self.resolver.clone();
        let tx = self.lookup_tx.clone();

        tokio::spawn(async move {
            let result = resolver.resolve(&descriptor, &canonical).await;
            // Receiver is gone once the form is dropped.
            let _ = tx.send(LookupMessage {
                name: descriptor.name,
                generation,
                result,
            });
        })
    }

    /// Deliver finished lookups; returns how many reached a mounted field.
    pub fn apply_lookups(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.lookup_rx.try_recv() {
            match self.fields.get_mut(&message.name) {
                Some(field) if field.generation == message.generation => {
                    field.lookup = None;
                    field.adapter.apply_lookup(message.result);
                    applied += 1;
                }
                _ => {
                    tracing::debug!(field = %message.name, "Dropping lookup for unmounted field");
                }
            }
        }
        applied
    }

    /// Wait for every pending lookup, then deliver them.
    pub async fn settle_lookups(&mut self) -> usize {
        let pending: Vec<_> = self
            .fields
            .values_mut()
            .filter_map(|field| field.lookup.take())
            .collect();
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::debug!(error = %e, "Lookup task did not complete");
            }
        }
        self.apply_lookups()
    }

    /// Views for every mounted field, in descriptor order.
    pub fn render(&self) -> Vec<FieldView> {
        self.variables
            .iter()
            .filter_map(|v| self.fields.get(&v.name))
            .map(|field| field.adapter.render())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<FieldView> {
        self.fields.get(name).map(|field| field.adapter.render())
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.variables
            .iter()
            .filter(|v| self.fields.contains_key(&v.name))
            .map(|v| v.name.as_str())
            .collect()
    }

    /// Tear down: abort lookups, drop adapters, detach the orchestrator.
    pub fn unmount(&mut self) {
        for field in self.fields.values_mut() {
            field.abort_lookup();
        }
        self.fields.clear();
        self.variables.clear();
        self.orchestrator.detach();
    }
}

impl Drop for DynamicForm {
    fn drop(&mut self) {
        for field in self.fields.values_mut() {
            field.abort_lookup();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
