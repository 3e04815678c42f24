//! Read-only preview of the current execution result.

use std::sync::Arc;

use form_types::ExecutionResult;
use tokio::task::JoinHandle;

use crate::engine::{PreviewOptions, TemplateEngine};
use crate::error::{FormError, FormResult};

pub struct PreviewRenderer {
    engine: Arc<dyn TemplateEngine>,
    options: PreviewOptions,
}

impl PreviewRenderer {
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self {
            engine,
            options: PreviewOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PreviewOptions) -> Self {
        self.options = options;
        self
    }

    /// HTML for the first agreement of `result`.
    pub fn render(&self, result: &ExecutionResult) -> FormResult<String> {
        let agreements = self.engine.agreements(result);
        let agreement = agreements.first().ok_or_else(|| FormError::Preview {
            reason: "execution result has no agreement".into(),
        })?;
        self.engine.render_for_preview(agreement, &self.options)
    }

    /// Render on the blocking pool; the caller may drop the handle.
    pub fn render_detached(&self, result: ExecutionResult) -> JoinHandle<FormResult<String>> {
        let renderer = Self {
            engine: self.engine.clone(),
            options: self.options.clone(),
        };
        tokio::task::spawn_blocking(move || renderer.render(&result))
    }
}
