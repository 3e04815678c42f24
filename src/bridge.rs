//! Execution bridge.
//!
//! Wraps the three engine calls a recompute needs behind one operation:
//!
//! ```text
//! compile_template(source)               → CompileError ends the call
//! execute(compiled, context, parameters) → error_message ends the call
//! executed_variables(result, context)    → descriptor list
//! ```
//!
//! The orchestrator only sees the async [`Recompute`] trait, so tests and
//! hosts can put a slower or remote implementation behind it.

use std::sync::Arc;

use form_types::{ExecutionContext, ExecutionResult, ParameterMap, VariableDescriptor};

use crate::engine::TemplateEngine;
use crate::error::{FormError, FormResult};

// ---------------------------------------------------------------------------
// Recompute trait
// ---------------------------------------------------------------------------

/// Variables and execution result derived from one parameter map.
#[derive(Debug, Clone)]
pub struct Recomputed {
    pub variables: Vec<VariableDescriptor>,
    pub execution_result: ExecutionResult,
}

/// Derive the variable list and execution result for a parameter map.
#[async_trait::async_trait]
pub trait Recompute: Send + Sync {
    async fn recompute(&self, parameters: &ParameterMap) -> FormResult<Recomputed>;
}

// ---------------------------------------------------------------------------
// ExecutionBridge
// ---------------------------------------------------------------------------

/// [`Recompute`] over a [`TemplateEngine`] and a fixed template source.
pub struct ExecutionBridge {
    engine: Arc<dyn TemplateEngine>,
    template_source: String,
    context: ExecutionContext,
}

impl ExecutionBridge {
    pub fn new(engine: Arc<dyn TemplateEngine>, template_source: impl Into<String>) -> Self {
        Self {
            engine,
            template_source: template_source.into(),
            context: ExecutionContext::default(),
        }
    }

    /// Compile, execute and collect executed variables, synchronously.
    pub fn recompute_now(&self, parameters: &ParameterMap) -> FormResult<Recomputed> {
        let compiled = self.engine.compile_template(&self.template_source)?;

        let outcome = self.engine.execute(&compiled, &self.context, parameters);
        if let Some(message) = outcome.error_message {
            return Err(FormError::Execution { message });
        }

        let variables = self
            .engine
            .executed_variables(&outcome.execution_result, &self.context);

        Ok(Recomputed {
            variables,
            execution_result: outcome.execution_result,
        })
    }
}

#[async_trait::async_trait]
impl Recompute for ExecutionBridge {
    async fn recompute(&self, parameters: &ParameterMap) -> FormResult<Recomputed> {
        self.recompute_now(parameters)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
