//! Default adapter: free text, numbers, yes/no and any unregistered kind.

use form_types::{FieldChange, VariableDescriptor, VariableKind};

use super::{
    join_classes, AdapterContext, FieldPhase, FieldView, InputAdapter, UserInput, Validator,
};

pub struct TextAdapter {
    descriptor: VariableDescriptor,
    input_class: String,
    value: String,
    phase: FieldPhase,
}

impl TextAdapter {
    pub fn mount(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Self {
        Self {
            descriptor: descriptor.clone(),
            input_class: context.text_like_input_class.clone(),
            value: saved_value.unwrap_or_default().to_string(),
            phase: FieldPhase::Pristine,
        }
    }

    pub fn boxed(
        descriptor: &VariableDescriptor,
        saved_value: Option<&str>,
        context: &AdapterContext,
    ) -> Box<dyn InputAdapter> {
        Box::new(Self::mount(descriptor, saved_value, context))
    }

    fn input_type(&self) -> &'static str {
        match self.descriptor.kind {
            VariableKind::Number => "number",
            _ => "text",
        }
    }
}

impl InputAdapter for TextAdapter {
    fn descriptor(&self) -> &VariableDescriptor {
        &self.descriptor
    }

    fn render(&self) -> FieldView {
        let clean = self.descriptor.clean_name();
        let error = if self.phase == FieldPhase::Invalid {
            "is-error"
        } else {
            ""
        };

        let mut view = FieldView::new(&self.descriptor, self.input_type());
        view.value = self.value.clone();
        view.input_class = join_classes([self.input_class.as_str(), clean.as_str(), error]);
        view.is_error = self.phase == FieldPhase::Invalid;
        view.phase = self.phase;
        view
    }

    fn on_user_input(
        &mut self,
        input: UserInput,
        validator: &dyn Validator,
    ) -> Option<FieldChange> {
        let UserInput::Text(raw) = input else {
            tracing::debug!(field = %self.descriptor.name, "Ignoring calendar input on text field");
            return None;
        };

        self.phase = FieldPhase::Editing;
        self.value = raw;

        if self.value.is_empty() {
            self.phase = FieldPhase::Valid;
            return Some(FieldChange::clear(&self.descriptor.name));
        }

        match validator.validity(&self.descriptor.name, &self.value) {
            Ok(_) => {
                self.phase = FieldPhase::Valid;
                Some(FieldChange::set(&self.descriptor.name, self.value.clone()))
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
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn fee() -> VariableDescriptor {
        VariableDescriptor::new("Late Fee", VariableKind::Number).required()
    }

    #[test]
    fn test_accepted_input_is_forwarded() {
        let validator = StaticValidator::new(vec![fee()]);
        let mut adapter = TextAdapter::mount(&fee(), None, &context());

        let change = adapter.on_user_input(UserInput::text("25"), &validator);

        assert_eq!(change, Some(FieldChange::set("Late Fee", "25")));
        assert_eq!(adapter.phase(), FieldPhase::Valid);
        let view = adapter.render();
        assert_eq!(view.input_type, "number");
        assert_eq!(view.input_class, "input Late-Fee");
    }

    #[test]
    fn test_rejected_input_only_flips_local_state() {
        let validator = StaticValidator::new(vec![fee()]);
        let mut adapter = TextAdapter::mount(&fee(), Some("25"), &context());

        let change = adapter.on_user_input(UserInput::text("lots"), &validator);

        assert!(change.is_none());
        assert_eq!(adapter.phase(), FieldPhase::Invalid);
        let view = adapter.render();
        assert!(view.is_error);
        assert_eq!(view.value, "lots");
        assert!(view.input_class.ends_with("is-error"));
    }

    #[test]
    fn test_clear_resets_invalid_state() {
        let validator = StaticValidator::new(vec![fee()]);
        let mut adapter = TextAdapter::mount(&fee(), None, &context());
        adapter.on_user_input(UserInput::text("lots"), &validator);

        let change = adapter.on_user_input(UserInput::text(""), &validator);

        assert_eq!(change, Some(FieldChange::clear("Late Fee")));
        assert_eq!(adapter.phase(), FieldPhase::Valid);
        assert!(!adapter.render().is_error);
    }

    #[test]
    fn test_focus_only_leaves_pristine() {
        let validator = StaticValidator::new(vec![fee()]);
        let mut adapter = TextAdapter::mount(&fee(), None, &context());
        adapter.focus();
        assert_eq!(adapter.phase(), FieldPhase::Editing);

        adapter.on_user_input(UserInput::text("3"), &validator);
        adapter.focus();
        assert_eq!(adapter.phase(), FieldPhase::Valid);
    }
}
