//! Workflow definition types.
//!
//! Definitions use a JSON document:
//!
//! ```json
//! {
//!   "name": "approval",
//!   "states": [
//!     {"id": "draft", "name": "Draft", "isInitial": true},
//!     {"id": "review", "name": "In review"},
//!     {"id": "approved", "name": "Approved", "isFinal": true}
//!   ],
//!   "actions": [
//!     {"id": "submit", "name": "Submit", "fromStates": "draft", "toState": "review"},
//!     {"id": "approve", "name": "Approve", "fromStates": ["review"], "toState": "approved"}
//!   ]
//! }
//! ```
//!
//! A definition is built once, validated, and never changed afterwards.

use crate::id::{ActionId, DefinitionId, StateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// A named state in a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub id: StateId,

    pub name: String,

    /// New instances start here. Exactly one state per definition.
    #[serde(default)]
    pub is_initial: bool,

    /// No action may leave a final state.
    #[serde(default)]
    pub is_final: bool,

    /// Disabled states cannot be entered.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl WorkflowState {
    pub fn new(id: impl Into<StateId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_initial: false,
            is_final: false,
            enabled: true,
            description: None,
        }
    }

    pub fn initial(mut self) -> Self {
        self.is_initial = true;
        self
    }

    pub fn terminal(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named, guarded transition between states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: ActionId,

    pub name: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Source state(s). Can be a single state or multiple.
    #[serde(deserialize_with = "deserialize_from_states")]
    pub from_states: Vec<StateId>,

    /// Target state.
    pub to_state: StateId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Action {
    pub fn new<I, S>(
        id: impl Into<ActionId>,
        name: impl Into<String>,
        from_states: I,
        to_state: impl Into<StateId>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            enabled: true,
            from_states: from_states.into_iter().map(Into::into).collect(),
            to_state: to_state.into(),
            description: None,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns true if this action lists `state` among its sources.
    pub fn is_available_from(&self, state: &StateId) -> bool {
        self.from_states.contains(state)
    }
}

fn deserialize_from_states<'de, D>(deserializer: D) -> Result<Vec<StateId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, Visitor};
    use std::fmt;

    struct FromStatesVisitor;

    impl<'de> Visitor<'de> for FromStatesVisitor {
        type Value = Vec<StateId>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a state id or array of state ids")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(vec![StateId::from(v)])
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut states = Vec::new();
            while let Some(s) = seq.next_element::<String>()? {
                states.push(StateId::from(s));
            }
            Ok(states)
        }
    }

    deserializer.deserialize_any(FromStatesVisitor)
}

/// Request to create a definition, before an id and timestamp are assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub states: Vec<WorkflowState>,

    pub actions: Vec<Action>,
}

impl NewDefinition {
    /// Builds an unvalidated definition.
    pub fn into_definition(self, id: DefinitionId, created_at: DateTime<Utc>) -> WorkflowDefinition {
        WorkflowDefinition {
            id,
            name: self.name,
            description: self.description,
            states: self.states,
            actions: self.actions,
            created_at,
        }
    }
}

/// A workflow: ordered states and the actions that move between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: DefinitionId,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub states: Vec<WorkflowState>,

    pub actions: Vec<Action>,

    pub created_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// Looks up a state by id. With duplicate ids the first one wins.
    pub fn state(&self, id: &StateId) -> Option<&WorkflowState> {
        self.states.iter().find(|s| &s.id == id)
    }

    /// Looks up an action by id. With duplicate ids the first one wins.
    pub fn action(&self, id: &ActionId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.id == id)
    }

    /// Returns every state flagged as initial.
    pub fn initial_states(&self) -> Vec<&WorkflowState> {
        self.states.iter().filter(|s| s.is_initial).collect()
    }

    /// Returns the initial state if there is exactly one.
    pub fn initial_state(&self) -> Option<&WorkflowState> {
        let mut initial = self.states.iter().filter(|s| s.is_initial);
        match (initial.next(), initial.next()) {
            (Some(state), None) => Some(state),
            _ => None,
        }
    }

    pub fn final_states(&self) -> Vec<&WorkflowState> {
        self.states.iter().filter(|s| s.is_final).collect()
    }

    /// Returns all actions that list `state` as a source.
    pub fn actions_from(&self, state: &StateId) -> Vec<&Action> {
        self.actions
            .iter()
            .filter(|a| a.is_available_from(state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_definition() -> serde_json::Value {
        serde_json::json!({
            "name": "approval",
            "description": "document sign-off",
            "states": [
                {"id": "draft", "name": "Draft", "isInitial": true},
                {"id": "review", "name": "In review"},
                {"id": "approved", "name": "Approved", "isFinal": true},
                {"id": "rejected", "name": "Rejected", "isFinal": true, "enabled": false}
            ],
            "actions": [
                {"id": "submit", "name": "Submit", "fromStates": "draft", "toState": "review"},
                {"id": "approve", "name": "Approve", "fromStates": ["review"], "toState": "approved"},
                {"id": "reject", "name": "Reject", "enabled": false, "fromStates": ["draft", "review"], "toState": "rejected"}
            ]
        })
    }

    fn parse() -> WorkflowDefinition {
        let new: NewDefinition = serde_json::from_value(sample_definition()).unwrap();
        new.into_definition(DefinitionId::from("d-1"), Utc::now())
    }

    #[test]
    fn test_parse_definition() {
        let def = parse();

        assert_eq!(def.name, "approval");
        assert_eq!(def.states.len(), 4);
        assert_eq!(def.actions.len(), 3);
        assert_eq!(def.initial_state().unwrap().id.as_str(), "draft");
        assert_eq!(def.final_states().len(), 2);
    }

    #[test]
    fn test_defaults_when_omitted() {
        let def = parse();

        let review = def.state(&StateId::from("review")).unwrap();
        assert!(review.enabled);
        assert!(!review.is_initial);
        assert!(!review.is_final);
        assert!(review.description.is_none());

        let rejected = def.state(&StateId::from("rejected")).unwrap();
        assert!(!rejected.enabled);
    }

    #[test]
    fn test_single_and_multi_source_actions() {
        let def = parse();

        let submit = def.action(&ActionId::from("submit")).unwrap();
        assert_eq!(submit.from_states, vec![StateId::from("draft")]);

        let reject = def.action(&ActionId::from("reject")).unwrap();
        assert!(reject.is_available_from(&StateId::from("draft")));
        assert!(reject.is_available_from(&StateId::from("review")));
        assert!(!reject.enabled);
    }

    #[test]
    fn test_actions_from_state() {
        let def = parse();

        let ids: Vec<&str> = def
            .actions_from(&StateId::from("review"))
            .iter()
            .map(|a| a.id.as_str())
            .collect();
        assert_eq!(ids, vec!["approve", "reject"]);
        assert!(def.actions_from(&StateId::from("approved")).is_empty());
    }

    #[test]
    fn test_initial_state_requires_exactly_one() {
        let mut def = parse();
        def.states[1].is_initial = true;
        assert_eq!(def.initial_states().len(), 2);
        assert!(def.initial_state().is_none());

        def.states.iter_mut().for_each(|s| s.is_initial = false);
        assert!(def.initial_state().is_none());
    }

    #[test]
    fn test_serialized_field_names() {
        let def = parse();
        let json = serde_json::to_value(&def).unwrap();

        assert_eq!(json["states"][0]["isInitial"], true);
        assert_eq!(json["actions"][0]["fromStates"], serde_json::json!(["draft"]));
        assert_eq!(json["actions"][0]["toState"], "review");
        assert!(json["createdAt"].is_string());
        assert!(json["states"][0].get("description").is_none());
    }

    #[test]
    fn test_definition_roundtrip() {
        let def = parse();
        let json = serde_json::to_string(&def).unwrap();
        let restored: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, def);
    }

    #[test]
    fn test_builders() {
        let state = WorkflowState::new("done", "Done")
            .terminal()
            .with_description("all finished");
        assert!(state.is_final);
        assert_eq!(state.description.as_deref(), Some("all finished"));

        let action = Action::new("finish", "Finish", ["a", "b"], "done").disabled();
        assert_eq!(action.from_states.len(), 2);
        assert!(!action.enabled);
    }
}
