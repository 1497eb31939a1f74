use ignis_core::{Action, ActionOptions, EnvironmentMode};

const PRODUCTION_CAUTION: &str = "You are connected to a PRODUCTION gateway. Mutating tools \
return previews unless the user has explicitly confirmed the change. Describe the preview, \
ask for confirmation, and only then re-issue the call with force=true.";

const TEST_CAUTION: &str = "You are connected to a test gateway. Changes are real on that \
system, so keep them scoped to what the user asked for.";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Degrade { reason_code: &'static str, user_message: String },
}

/// Environment-dependent caution applied to model-proposed actions before
/// they reach the executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub mode: EnvironmentMode,
    pub preview_unconfirmed_mutations: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self::for_mode(EnvironmentMode::Development)
    }
}

impl GuardrailPolicy {
    pub fn for_mode(mode: EnvironmentMode) -> Self {
        Self { mode, preview_unconfirmed_mutations: mode == EnvironmentMode::Production }
    }

    pub fn system_prompt(&self, base: &str) -> String {
        match self.mode {
            EnvironmentMode::Production => format!("{base}\n\n{PRODUCTION_CAUTION}"),
            EnvironmentMode::Test => format!("{base}\n\n{TEST_CAUTION}"),
            EnvironmentMode::Development => base.to_string(),
        }
    }

    pub fn evaluate(&self, action: &Action) -> GuardrailDecision {
        let options = action.options();
        if self.preview_unconfirmed_mutations
            && action.action_type().is_mutating()
            && !options.force
            && !options.dry_run
        {
            return GuardrailDecision::Degrade {
                reason_code: "production_unconfirmed_mutation",
                user_message: format!(
                    "production gateway: {} of {} `{}` was previewed only; confirm and re-issue \
                     with force=true to apply it",
                    action.action_type(),
                    action.resource_type(),
                    action.resource_path()
                ),
            };
        }
        GuardrailDecision::Allow
    }

    /// Rewrites the action according to [`Self::evaluate`].
    pub fn apply(&self, action: Action) -> (Action, GuardrailDecision) {
        let decision = self.evaluate(&action);
        match decision {
            GuardrailDecision::Allow => (action, decision),
            GuardrailDecision::Degrade { .. } => {
                let options = ActionOptions { dry_run: true, ..action.options().clone() };
                (action.with_options(options), decision)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Map;
    use uuid::Uuid;

    use ignis_core::{Action, ActionOptions, ActionType, EnvironmentMode, ResourceType};

    use super::{GuardrailDecision, GuardrailPolicy};

    fn update(options: ActionOptions) -> Action {
        let mut payload = Map::new();
        payload.insert("enabled".to_string(), false.into());
        Action::new(Uuid::new_v4(), ActionType::Update, ResourceType::Project, "Plant", payload, options)
            .unwrap()
    }

    #[test]
    fn production_previews_unforced_mutations() {
        let policy = GuardrailPolicy::for_mode(EnvironmentMode::Production);
        let (action, decision) = policy.apply(update(ActionOptions::default()));

        assert!(action.options().dry_run);
        let (reason_code, user_message) = match decision {
            GuardrailDecision::Degrade { reason_code, user_message } => (reason_code, user_message),
            GuardrailDecision::Allow => ("", String::new()),
        };
        assert_eq!(reason_code, "production_unconfirmed_mutation");
        assert!(user_message.contains("force=true"));
    }

    #[test]
    fn forced_mutations_and_other_modes_pass_through() {
        let production = GuardrailPolicy::for_mode(EnvironmentMode::Production);
        let (action, decision) = production.apply(update(ActionOptions::forced()));
        assert_eq!(decision, GuardrailDecision::Allow);
        assert!(!action.options().dry_run);

        let development = GuardrailPolicy::default();
        assert_eq!(development.evaluate(&update(ActionOptions::default())), GuardrailDecision::Allow);
    }

    #[test]
    fn system_prompt_caution_by_mode() {
        let base = "base prompt";
        assert_eq!(GuardrailPolicy::for_mode(EnvironmentMode::Development).system_prompt(base), base);
        assert!(GuardrailPolicy::for_mode(EnvironmentMode::Test)
            .system_prompt(base)
            .contains("test gateway"));
        assert!(GuardrailPolicy::for_mode(EnvironmentMode::Production)
            .system_prompt(base)
            .contains("PRODUCTION"));
    }
}
