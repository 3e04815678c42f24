//! Template engine seam.
//!
//! The form never evaluates templates itself. Everything it needs from an
//! engine goes through [`TemplateEngine`]:
//!
//! ```text
//! compile_template   source → CompiledTemplate
//! execute            CompiledTemplate + parameters → ExecutionResult (+ error message)
//! executed_variables ExecutionResult → variables reached by control flow
//! validity           (descriptor, raw) → TypedValue, used by input adapters
//! identity_*         encode / decode identity canonical values
//! agreements         ExecutionResult → renderable documents
//! render_for_preview Agreement → HTML
//! ```
//!
//! [`markup::MarkupEngine`] is a small in-tree implementation used by the demo
//! host and the tests.

pub mod markup;

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use form_types::{
    Agreement, ExecutionContext, ExecutionResult, ParameterMap, TypedValue, VariableDescriptor,
};

use crate::error::FormResult;

pub use markup::MarkupEngine;

// ---------------------------------------------------------------------------
// CompiledTemplate
// ---------------------------------------------------------------------------

/// Engine-specific compiled representation, opaque to the form.
#[derive(Clone)]
pub struct CompiledTemplate {
    inner: Arc<dyn Any + Send + Sync>,
}

impl CompiledTemplate {
    pub fn new<T: Any + Send + Sync>(compiled: T) -> Self {
        Self {
            inner: Arc::new(compiled),
        }
    }

    /// Recover the engine's own type. `None` when the template was compiled
    /// by a different engine.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ExecutionOutcome
// ---------------------------------------------------------------------------

/// Result of one execution.
///
/// An engine may produce a result *and* an error message (for example when a
/// field fails a typed constraint). Callers treat a present message as failure.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_result: ExecutionResult,
    pub error_message: Option<String>,
}

/// Options for [`TemplateEngine::render_for_preview`].
#[derive(Debug, Clone, Default)]
pub struct PreviewOptions {
    /// Leave the agreement title out of the rendered HTML
    pub hide_title: bool,
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Operations consumed from a template execution engine.
///
/// All operations are CPU-bound and synchronous.
pub trait TemplateEngine: Send + Sync {
    fn compile_template(&self, source: &str) -> FormResult<CompiledTemplate>;

    fn execute(
        &self,
        compiled: &CompiledTemplate,
        context: &ExecutionContext,
        parameters: &ParameterMap,
    ) -> ExecutionOutcome;

    /// Variables actually reached while executing, in first-reached order.
    fn executed_variables(
        &self,
        result: &ExecutionResult,
        context: &ExecutionContext,
    ) -> Vec<VariableDescriptor>;

    /// Decode `raw` according to the descriptor's kind, or reject it.
    fn validity(&self, descriptor: &VariableDescriptor, raw: &str) -> FormResult<TypedValue>;

    fn identity_email(&self, value: &TypedValue) -> FormResult<String>;

    fn create_identity_internal_value(&self, user_id: &str, email: &str) -> FormResult<String>;

    fn agreements(&self, result: &ExecutionResult) -> Vec<Agreement>;

    fn render_for_preview(
        &self,
        agreement: &Agreement,
        options: &PreviewOptions,
    ) -> FormResult<String>;
}
