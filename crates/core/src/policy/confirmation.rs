//! The single declared table of destructive actions.
//!
//! An action matching any rule is held at PENDING_CONFIRMATION until it is
//! re-issued with `force = true`. A dry run is answered before this table is
//! consulted.

use serde_json::Value;

use crate::domain::action::{Action, ActionType, ResourceType};

pub struct ConfirmationRule {
    pub id: &'static str,
    pub action_type: ActionType,
    /// `None` matches every resource type.
    pub resource_type: Option<ResourceType>,
    pub reason: &'static str,
    pub applies: fn(&Action) -> bool,
}

pub static CONFIRMATION_RULES: &[ConfirmationRule] = &[
    ConfirmationRule {
        id: "delete-any",
        action_type: ActionType::Delete,
        resource_type: None,
        reason: "deleting a resource cannot be undone",
        applies: always,
    },
    ConfirmationRule {
        id: "update-irreversible",
        action_type: ActionType::Update,
        resource_type: None,
        reason: "the update is flagged as irreversible",
        applies: flagged_irreversible,
    },
    ConfirmationRule {
        id: "gateway-config-update",
        action_type: ActionType::Update,
        resource_type: Some(ResourceType::GatewayConfig),
        reason: "gateway configuration changes affect every project",
        applies: always,
    },
    ConfirmationRule {
        id: "project-rename",
        action_type: ActionType::Update,
        resource_type: Some(ResourceType::Project),
        reason: "renaming a project breaks references to it",
        applies: changes_name,
    },
    ConfirmationRule {
        id: "tag-data-type-set",
        action_type: ActionType::Update,
        resource_type: Some(ResourceType::Tag),
        reason: "setting a tag's data type can discard its current value",
        applies: sets_data_type,
    },
];

/// First rule that holds `action` for confirmation, if any.
pub fn requires_confirmation(action: &Action) -> Option<&'static ConfirmationRule> {
    CONFIRMATION_RULES.iter().find(|rule| {
        rule.action_type == action.action_type()
            && rule.resource_type.map_or(true, |resource| resource == action.resource_type())
            && (rule.applies)(action)
    })
}

fn always(_: &Action) -> bool {
    true
}

fn flagged_irreversible(action: &Action) -> bool {
    action.payload().get("irreversible").and_then(Value::as_bool).unwrap_or(false)
}

fn changes_name(action: &Action) -> bool {
    action.payload_str("name").is_some_and(|name| name.trim() != action.resource_path())
}

/// Rules only see the action, not the stored tag, so restating the current
/// type is held too.
fn sets_data_type(action: &Action) -> bool {
    action.payload().get("dataType").is_some_and(|data_type| !data_type.is_null())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};
    use uuid::Uuid;

    use super::requires_confirmation;
    use crate::domain::action::{Action, ActionOptions, ActionType, ResourceType};

    fn action(action_type: ActionType, resource_type: ResourceType, payload: Value) -> Action {
        Action::new(
            Uuid::new_v4(),
            action_type,
            resource_type,
            "Plant",
            payload.as_object().cloned().unwrap_or_else(Map::new),
            ActionOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn every_delete_requires_confirmation() {
        for resource in [ResourceType::Tag, ResourceType::Script, ResourceType::NamedQuery] {
            let rule = requires_confirmation(&action(ActionType::Delete, resource, json!({})));
            assert_eq!(rule.map(|rule| rule.id), Some("delete-any"));
        }
    }

    #[test]
    fn plain_updates_do_not_require_confirmation() {
        let update = action(ActionType::Update, ResourceType::Tag, json!({ "value": 3 }));
        assert!(requires_confirmation(&update).is_none());
        let create = action(ActionType::Create, ResourceType::Tag, json!({ "dataType": "Int4" }));
        assert!(requires_confirmation(&create).is_none());
    }

    #[test]
    fn data_type_rule_only_holds_updates_that_set_a_type() {
        let cleared = action(ActionType::Update, ResourceType::Tag, json!({ "dataType": null }));
        assert!(requires_confirmation(&cleared).is_none());

        let documented =
            action(ActionType::Update, ResourceType::Tag, json!({ "documentation": "dataType" }));
        assert!(requires_confirmation(&documented).is_none());

        let project =
            action(ActionType::Update, ResourceType::Project, json!({ "dataType": "Int4" }));
        assert!(requires_confirmation(&project).is_none());

        let restated = action(ActionType::Update, ResourceType::Tag, json!({ "dataType": "Int4" }));
        let rule = requires_confirmation(&restated).expect("data type rule");
        assert_eq!(rule.id, "tag-data-type-set");
        assert!(rule.reason.contains("data type"));
    }

    #[test]
    fn conditional_update_rules_match_their_payloads() {
        let retype = action(ActionType::Update, ResourceType::Tag, json!({ "dataType": "Float8" }));
        assert_eq!(requires_confirmation(&retype).map(|rule| rule.id), Some("tag-data-type-set"));

        let rename = action(ActionType::Update, ResourceType::Project, json!({ "name": "Plant2" }));
        assert_eq!(requires_confirmation(&rename).map(|rule| rule.id), Some("project-rename"));

        let same_name = action(ActionType::Update, ResourceType::Project, json!({ "name": "Plant" }));
        assert!(requires_confirmation(&same_name).is_none());

        let flagged =
            action(ActionType::Update, ResourceType::View, json!({ "irreversible": true }));
        assert_eq!(requires_confirmation(&flagged).map(|rule| rule.id), Some("update-irreversible"));

        let gateway = action(ActionType::Update, ResourceType::GatewayConfig, json!({}));
        assert_eq!(
            requires_confirmation(&gateway).map(|rule| rule.id),
            Some("gateway-config-update")
        );
    }
}
