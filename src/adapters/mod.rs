//! Typed input adapters.
//!
//! One adapter is mounted per visible variable. Adapters own only their local
//! UI state; every value that should reach the parameter map leaves through
//! the [`FieldChange`] returned from [`InputAdapter::on_user_input`].
//!
//! ## Design Principles
//!
//! 1. **No callbacks** - input handlers return the change, the form forwards it
//! 2. **Stateless rendering** - [`FieldView`] is rebuilt from adapter state each time
//! 3. **Closed dispatch** - [`AdapterRegistry`] maps kinds to constructors,
//!    anything unregistered renders as text
//!
//! ## Field phases
//!
//! ```text
//! Pristine ──input──► Editing ──validated──► Valid
//!                        ▲                     │
//!                        └──────input──────────┤
//!                        │                     ▼
//!                        └──────input────── Invalid
//! ```

pub mod date;
pub mod identity;
pub mod text;

use std::collections::HashMap;
use std::sync::Arc;

use form_types::{FieldChange, TypedValue, VariableDescriptor, VariableKind};
use serde::{Deserialize, Serialize};

use crate::engine::TemplateEngine;
use crate::error::{FormError, FormResult};

pub use date::{CalendarSelection, DateAdapter};
pub use identity::{EngineIdentityResolver, IdentityAdapter, IdentityResolver, ResolvedIdentity};
pub use text::TextAdapter;

// ---------------------------------------------------------------------------
// Input and view model
// ---------------------------------------------------------------------------

/// Raw user interaction delivered to an adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum UserInput {
    /// Typed text; empty clears the field
    Text(String),
    /// Calendar picker selection; empty clears the field
    Dates(Vec<CalendarSelection>),
}

impl UserInput {
    pub fn text(value: impl Into<String>) -> Self {
        UserInput::Text(value.into())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            UserInput::Text(s) => s.is_empty(),
            UserInput::Dates(dates) => dates.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPhase {
    #[default]
    Pristine,
    Editing,
    Valid,
    Invalid,
}

/// Render-ready description of one field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldView {
    pub name: String,
    pub label: String,
    /// HTML input type hint (`text`, `email`, `date`, `datetime-local`)
    pub input_type: String,
    /// What the input shows, not necessarily the canonical value
    pub value: String,
    pub wrapper_class: String,
    pub input_class: String,
    pub placeholder: String,
    pub is_error: bool,
    pub phase: FieldPhase,
    /// Secondary text shown next to the value (resolved display name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl FieldView {
    pub(crate) fn new(descriptor: &VariableDescriptor, input_type: &str) -> Self {
        Self {
            name: descriptor.name.clone(),
            label: descriptor.name.clone(),
            input_type: input_type.to_string(),
            value: String::new(),
            wrapper_class: "contract-variable".to_string(),
            input_class: String::new(),
            placeholder: descriptor.name.clone(),
            is_error: false,
            phase: FieldPhase::Pristine,
            hint: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation delegate
// ---------------------------------------------------------------------------

/// Per-field validation, independent of the engine's execution errors.
pub trait Validator {
    fn validity(&self, name: &str, raw: &str) -> FormResult<TypedValue>;
}

/// Validates against the latest descriptor list through the engine.
pub struct EngineValidator<'a> {
    engine: &'a dyn TemplateEngine,
    variables: &'a [VariableDescriptor],
}

impl<'a> EngineValidator<'a> {
    pub fn new(engine: &'a dyn TemplateEngine, variables: &'a [VariableDescriptor]) -> Self {
        Self { engine, variables }
    }
}

impl Validator for EngineValidator<'_> {
    fn validity(&self, name: &str, raw: &str) -> FormResult<TypedValue> {
        let descriptor = self
            .variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| FormError::field(name, "not a variable of this form"))?;
        self.engine.validity(descriptor, raw)
    }
}

// ---------------------------------------------------------------------------
// InputAdapter trait
// ---------------------------------------------------------------------------

/// Shared construction inputs for adapters.
#[derive(Clone)]
pub struct AdapterContext {
    pub engine: Arc<dyn TemplateEngine>,
    pub text_like_input_class: String,
}

impl AdapterContext {
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self {
            engine,
            text_like_input_class: String::new(),
        }
    }

    pub fn with_input_class(mut self, class: impl Into<String>) -> Self {
        self.text_like_input_class = class.into();
        self
    }
}

/// Behavior of one mounted field.
pub trait InputAdapter: Send {
    fn descriptor(&self) -> &VariableDescriptor;

    fn kind(&self) -> &VariableKind {
        &self.descriptor().kind
    }

    fn render(&self) -> FieldView;

    /// Handle one interaction. Empty input always returns a clearing change;
    /// rejected input returns `None` and only flips local state.
    fn on_user_input(
        &mut self,
        input: UserInput,
        validator: &dyn Validator,
    ) -> Option<FieldChange>;

    fn phase(&self) -> FieldPhase;

    /// Focus moves a pristine field into editing.
    fn focus(&mut self);

    /// Canonical value this adapter needs resolved out of band, taken once.
    fn take_lookup(&mut self) -> Option<String> {
        None
    }

    /// Deliver the result of a lookup requested through [`take_lookup`](Self::take_lookup).
    fn apply_lookup(&mut self, _result: FormResult<ResolvedIdentity>) {}
}

// ---------------------------------------------------------------------------
// AdapterRegistry
// ---------------------------------------------------------------------------

pub type AdapterFactory =
    fn(&VariableDescriptor, Option<&str>, &AdapterContext) -> Box<dyn InputAdapter>;

/// Variable kind to adapter constructor; unregistered kinds use [`TextAdapter`].
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: HashMap<VariableKind, AdapterFactory>,
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(VariableKind::Date, DateAdapter::boxed);
        registry.register(VariableKind::DateTime, DateAdapter::boxed);
        registry.register(VariableKind::Identity, IdentityAdapter::boxed);
        registry
    }
}

impl AdapterRegistry {
    /// Registry where every kind renders as text
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: VariableKind, factory: AdapterFactory) {
        self.factories.insert(kind, factory);
    }

    /// Mount an adapter, restoring `saved_value`.
    pub fn create(
        &self,
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Box<dyn InputAdapter> {
        let factory = self
            .factories
            .get(&descriptor.kind)
            .copied()
            .unwrap_or(TextAdapter::boxed);
        factory(descriptor, saved_value, context)
    }
}

/// Join non-empty class fragments with single spaces.
pub(crate) fn join_classes<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_registry_dispatch_by_kind() {
        let registry = AdapterRegistry::default();
        let ctx = context();

        let date = registry.create(&VariableDescriptor::new("Start", VariableKind::Date), None, &ctx);
        assert_eq!(date.render().input_type, "date");

        let when = registry.create(
            &VariableDescriptor::new("When", VariableKind::DateTime),
            None,
            &ctx,
        );
        assert_eq!(when.render().input_type, "datetime-local");

        let party = registry.create(
            &VariableDescriptor::new("Party", VariableKind::Identity),
            None,
            &ctx,
        );
        assert_eq!(party.render().input_type, "email");
    }

    #[test]
    fn test_unknown_kind_falls_back_to_text() {
        let registry = AdapterRegistry::default();
        let descriptor = VariableDescriptor::new("Address", VariableKind::parse("Address"));

        let adapter = registry.create(&descriptor, Some("1 Main St"), &context());

        let view = adapter.render();
        assert_eq!(view.input_type, "text");
        assert_eq!(view.value, "1 Main St");
    }

    #[test]
    fn test_engine_validator_rejects_unknown_name() {
        let validator = StaticValidator::new(vec![VariableDescriptor::new(
            "Fee",
            VariableKind::Number,
        )]);

        assert_eq!(validator.validity("Fee", "10").unwrap(), TypedValue::Number(10.0));
        assert!(matches!(
            validator.validity("Other", "x"),
            Err(FormError::FieldValidation { .. })
        ));
    }

    #[test]
    fn test_join_classes_skips_empty() {
        assert_eq!(join_classes(["", "a", "", "b"]), "a b");
    }
}
