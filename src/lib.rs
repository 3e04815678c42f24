//! lawform - Dynamic contract forms
//!
//! Renders one input per template variable and keeps the variable list in
//! step with a template execution engine as the user types.
//!
//! ## Call chain
//! user input -> adapter -> FieldChange -> orchestrator merge -> bridge
//! recompute -> new descriptors -> form reconciles adapters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lawform::{DynamicForm, ExecutionBridge, FormOrchestrator, MarkupEngine, TemplateEngine, UserInput};
//!
//! # async fn demo() -> lawform::FormResult<()> {
//! let engine: Arc<dyn TemplateEngine> = Arc::new(MarkupEngine::new());
//! let bridge = ExecutionBridge::new(engine.clone(), "Dear [[Name]],");
//! let orchestrator = Arc::new(FormOrchestrator::new(Arc::new(bridge)));
//!
//! let mut form = DynamicForm::new(orchestrator, engine);
//! form.mount().await;
//! form.input("Name", UserInput::text("Ada")).await?;
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Environment configuration
pub mod config;

// Engine seam and the in-tree markup engine
pub mod engine;

// Recompute: compile, execute, executed variables
pub mod bridge;

// Parameter ownership and recompute sequencing
pub mod orchestrator;

// Typed input adapters and validation
pub mod adapters;

// Host-facing form component
pub mod form;

// Read-only agreement preview
pub mod preview;

// Hosted API session (login, user search)
pub mod session;

pub use adapters::{
    AdapterContext, AdapterRegistry, CalendarSelection, EngineIdentityResolver, FieldPhase,
    FieldView, IdentityResolver, InputAdapter, ResolvedIdentity, UserInput, Validator,
};
pub use bridge::{ExecutionBridge, Recompute, Recomputed};
pub use config::FormConfig;
pub use engine::{MarkupEngine, PreviewOptions, TemplateEngine};
pub use error::{FormError, FormResult};
pub use form::DynamicForm;
pub use orchestrator::{FormOrchestrator, UpdateOutcome};
pub use preview::PreviewRenderer;
pub use session::ApiSession;

pub use form_types::{
    ExecutionResult, FieldChange, FormSnapshot, ParameterMap, TypedValue, VariableDescriptor,
    VariableKind,
};
