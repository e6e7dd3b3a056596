//! Instance state management.

use crate::id::{ActionId, DefinitionId, InstanceId, StateId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Receipt for one applied transition. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub action_id: ActionId,
    pub from_state: StateId,
    pub to_state: StateId,
    pub timestamp: DateTime<Utc>,
}

/// A running workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    /// Unique instance ID. Empty until the repository assigns one.
    pub id: InstanceId,

    /// Definition this instance runs against. A reference, not ownership.
    pub definition_id: DefinitionId,

    /// Current state in the workflow.
    pub current_state: StateId,

    /// Applied transitions, oldest first.
    pub history: Vec<HistoryEntry>,

    pub created_at: DateTime<Utc>,

    pub last_updated: DateTime<Utc>,
}

impl WorkflowInstance {
    /// Creates an instance sitting in `initial_state` with no history.
    pub fn new(
        id: InstanceId,
        definition_id: DefinitionId,
        initial_state: StateId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            definition_id,
            current_state: initial_state,
            history: Vec::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Number of successful transitions.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_transition(&self) -> Option<&HistoryEntry> {
        self.history.last()
    }

    /// Returns true if no action has been applied yet.
    pub fn is_fresh(&self) -> bool {
        self.history.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_instance() -> WorkflowInstance {
        let start = Utc::now();
        let mut instance = WorkflowInstance::new(
            InstanceId::from("i-1"),
            DefinitionId::from("d-1"),
            StateId::from("review"),
            start,
        );
        instance.history.push(HistoryEntry {
            action_id: ActionId::from("submit"),
            from_state: StateId::from("draft"),
            to_state: StateId::from("review"),
            timestamp: start + Duration::seconds(1),
        });
        instance.history.push(HistoryEntry {
            action_id: ActionId::from("rework"),
            from_state: StateId::from("review"),
            to_state: StateId::from("review"),
            timestamp: start + Duration::seconds(2),
        });
        instance
    }

    #[test]
    fn test_instance_creation() {
        let now = Utc::now();
        let instance = WorkflowInstance::new(
            InstanceId::from("i-1"),
            DefinitionId::from("d-1"),
            StateId::from("draft"),
            now,
        );

        assert_eq!(instance.current_state.as_str(), "draft");
        assert!(instance.is_fresh());
        assert!(instance.last_transition().is_none());
        assert_eq!(instance.created_at, instance.last_updated);
    }

    #[test]
    fn test_roundtrip_preserves_history_order() {
        let instance = sample_instance();
        let json = serde_json::to_string(&instance).unwrap();
        let restored: WorkflowInstance = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, instance);
        assert_eq!(restored.history_len(), 2);
        assert_eq!(restored.history[0].action_id.as_str(), "submit");
        assert_eq!(restored.last_transition().unwrap().action_id.as_str(), "rework");
    }

    #[test]
    fn test_serialized_field_names() {
        let json = serde_json::to_value(sample_instance()).unwrap();
        assert_eq!(json["definitionId"], "d-1");
        assert_eq!(json["currentState"], "review");
        assert_eq!(json["history"][0]["fromState"], "draft");
        assert_eq!(json["history"][0]["actionId"], "submit");
        assert!(json["lastUpdated"].is_string());
    }
}
