//! Identity (email) adapter and out-of-band identity resolution.
//!
//! The canonical value is engine-encoded and carries more than the email, so
//! the adapter caches what it shows separately:
//!
//! ```text
//! typed email ──create_identity_internal_value("", email)──► canonical
//!                                                              │
//!                              validator.validity(name, …) ◄───┘
//!
//! saved canonical ──IdentityResolver (spawned)──► ResolvedIdentity { email, display_name }
//! ```
//!
//! A failed resolution leaves the display empty. It is never a validation
//! error.

use std::sync::Arc;

use async_trait::async_trait;
use form_types::{FieldChange, VariableDescriptor};

use super::{
    join_classes, AdapterContext, FieldPhase, FieldView, InputAdapter, UserInput, Validator,
};
use crate::engine::TemplateEngine;
use crate::error::{FormError, FormResult};
use crate::session::ApiSession;

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Display data for a stored identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub email: String,
    pub display_name: Option<String>,
}

/// Turns a canonical identity value into something to show.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(
        &self,
        descriptor: &VariableDescriptor,
        canonical: &str,
    ) -> FormResult<ResolvedIdentity>;
}

/// Decodes through the engine, enriching the display name from the API
/// session when it is connected.
pub struct EngineIdentityResolver {
    engine: Arc<dyn TemplateEngine>,
    session: Option<Arc<ApiSession>>,
}

impl EngineIdentityResolver {
    pub fn new(engine: Arc<dyn TemplateEngine>) -> Self {
        Self {
            engine,
            session: None,
        }
    }

    pub fn with_session(mut self, session: Arc<ApiSession>) -> Self {
        self.session = Some(session);
        self
    }

    async fn display_name(&self, email: &str) -> Option<String> {
        let session = self.session.as_ref()?;
        if !session.is_connected().await {
            return None;
        }
        match session.search_users(email).await {
            Ok(users) => users
                .into_iter()
                .find(|user| user.email.eq_ignore_ascii_case(email))
                .map(|user| user.name)
                .filter(|name| !name.is_empty()),
            Err(e) => {
                tracing::debug!(error = %e, "User search failed; showing email only");
                None
            }
        }
    }
}

#[async_trait]
impl IdentityResolver for EngineIdentityResolver {
    async fn resolve(
        &self,
        descriptor: &VariableDescriptor,
        canonical: &str,
    ) -> FormResult<ResolvedIdentity> {
        let lookup_error = |e: FormError| FormError::Lookup {
            reason: e.to_string(),
        };
        let value = self
            .engine
            .validity(descriptor, canonical)
            .map_err(lookup_error)?;
        let email = self.engine.identity_email(&value).map_err(lookup_error)?;
        let display_name = self.display_name(&email).await;

        Ok(ResolvedIdentity {
            email,
            display_name,
        })
    }
}

// ---------------------------------------------------------------------------
// IdentityAdapter
// ---------------------------------------------------------------------------

pub struct IdentityAdapter {
    descriptor: VariableDescriptor,
    engine: Arc<dyn TemplateEngine>,
    input_class: String,
    email: String,
    display_name: Option<String>,
    phase: FieldPhase,
    /// Saved canonical value not yet handed out for resolution
    pending_lookup: Option<String>,
    /// Cleared once the user types, so a late lookup cannot overwrite input
    awaiting_lookup: bool,
}

impl IdentityAdapter {
    pub fn mount(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Self {
        let pending_lookup = saved_value
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        Self {
            descriptor: descriptor.clone(),
            engine: context.engine.clone(),
            input_class: context.text_like_input_class.clone(),
            email: String::new(),
            display_name: None,
            phase: FieldPhase::Pristine,
            awaiting_lookup: pending_lookup.is_some(),
            pending_lookup,
        }
    }

    pub fn boxed(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Box<dyn InputAdapter> {
        Box::new(Self::mount(descriptor, saved_value, context))
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }
}

impl InputAdapter for IdentityAdapter {
    fn descriptor(&self) -> &VariableDescriptor {
        &self.descriptor
    }

    fn render(&self) -> FieldView {
        let clean = self.descriptor.clean_name();
        let email_class = format!("{clean}-email");
        let prefixed = format!("{}{clean}", self.input_class);
        let error = if self.phase == FieldPhase::Invalid {
            "is-error"
        } else {
            ""
        };

        let mut view = FieldView::new(&self.descriptor, "email");
        view.value = self.email.clone();
        view.wrapper_class = "contract-variable identity".to_string();
        view.input_class = join_classes([prefixed.as_str(), email_class.as_str(), error]);
        view.is_error = self.phase == FieldPhase::Invalid;
        view.phase = self.phase;
        view.hint = self.display_name.clone();
        view
    }

    fn on_user_input(
        &mut self,
        input: UserInput,
        validator: &dyn Validator,
    ) -> Option<FieldChange> {
        let UserInput::Text(raw) = input else {
            tracing::debug!(field = %self.descriptor.name, "Ignoring calendar input on identity field");
            return None;
        };

        self.awaiting_lookup = false;
        self.display_name = None;
        self.phase = FieldPhase::Editing;
        self.email = raw;

        if self.email.is_empty() {
            self.phase = FieldPhase::Valid;
            return Some(FieldChange::clear(&self.descriptor.name));
        }

        let canonical = self
            .engine
            .create_identity_internal_value("", &self.email)
            .and_then(|canonical| {
                validator
                    .validity(&self.descriptor.name, &canonical)
                    .map(|_| canonical)
            });

        match canonical {
            Ok(canonical) => {
                self.phase = FieldPhase::Valid;
                Some(FieldChange::set(&self.descriptor.name, canonical))
            }
            Err(_) => {
                self.phase = FieldPhase::Invalid;
                None
            }
        }
    }

    fn phase(&self) -> FieldPhase {
        self.phase
    }

    fn focus(&mut self) {
        if self.phase == FieldPhase::Pristine {
            self.phase = FieldPhase::Editing;
        }
    }

    fn take_lookup(&mut self) -> Option<String> {
        self.pending_lookup.take()
    }

    fn apply_lookup(&mut self, result: FormResult<ResolvedIdentity>) {
        if !self.awaiting_lookup {
            return;
        }
        self.awaiting_lookup = false;

        match result {
            Ok(resolved) => {
                self.email = resolved.email;
                self.display_name = resolved.display_name;
            }
            Err(e) => {
                tracing::debug!(field = %self.descriptor.name, error = %e, "Identity lookup failed");
                self.email.clear();
                self.display_name = None;
            }
        }
    }
}
