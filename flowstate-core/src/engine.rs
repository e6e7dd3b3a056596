//! Transition engine - starts instances and applies actions to them.
//!
//! These functions never persist anything. The caller stores the instance
//! they return; that store is the single commit point for a transition, so
//! state and history can never drift apart.

use crate::definition::{Action, WorkflowDefinition};
use crate::error::CoreError;
use crate::id::{ActionId, InstanceId};
use crate::instance::{HistoryEntry, WorkflowInstance};
use crate::validation::validate_action_execution;
use chrono::{DateTime, Utc};

/// Creates a fresh instance in the definition's initial state.
pub fn start_instance(definition: &WorkflowDefinition) -> Result<WorkflowInstance, CoreError> {
    start_instance_at(definition, Utc::now())
}

/// Same as [`start_instance`] with an explicit clock reading.
///
/// The definition may have been loaded from storage long after it was
/// validated, so a missing or ambiguous initial state is reported rather
/// than assumed away.
pub fn start_instance_at(
    definition: &WorkflowDefinition,
    now: DateTime<Utc>,
) -> Result<WorkflowInstance, CoreError> {
    let initial = match definition.initial_states().as_slice() {
        [] => {
            return Err(CoreError::structural(format!(
                "workflow definition '{}' has no initial state",
                definition.id
            )))
        }
        [only] => only.id.clone(),
        many => {
            return Err(CoreError::structural(format!(
                "workflow definition '{}' has {} initial states",
                definition.id,
                many.len()
            )))
        }
    };

    Ok(WorkflowInstance::new(
        InstanceId::default(),
        definition.id.clone(),
        initial,
        now,
    ))
}

/// Applies `action` to `instance`, returning the advanced instance and the
/// history entry that was appended to it.
///
/// The caller must already hold a valid result from
/// [`validate_action_execution`]. The input instance is left untouched.
pub fn apply_action(instance: &WorkflowInstance, action: &Action) -> (WorkflowInstance, HistoryEntry) {
    apply_action_at(instance, action, Utc::now())
}

/// Same as [`apply_action`] with an explicit clock reading.
pub fn apply_action_at(
    instance: &WorkflowInstance,
    action: &Action,
    now: DateTime<Utc>,
) -> (WorkflowInstance, HistoryEntry) {
    let entry = HistoryEntry {
        action_id: action.id.clone(),
        from_state: instance.current_state.clone(),
        to_state: action.to_state.clone(),
        timestamp: now,
    };

    let mut next = instance.clone();
    next.current_state = action.to_state.clone();
    next.history.push(entry.clone());
    next.last_updated = now;

    (next, entry)
}

/// Validates and applies `action_id` in one step.
pub fn execute_action(
    definition: &WorkflowDefinition,
    instance: &WorkflowInstance,
    action_id: &ActionId,
) -> Result<(WorkflowInstance, HistoryEntry), CoreError> {
    validate_action_execution(definition, instance, action_id).into_result()?;

    let action = definition.action(action_id).ok_or_else(|| {
        CoreError::structural(format!("action '{}' vanished after validation", action_id))
    })?;

    let (next, entry) = apply_action(instance, action);
    tracing::debug!(
        "Applied '{}' to instance {}: {} -> {}",
        action_id,
        instance.id,
        entry.from_state,
        entry.to_state
    );
    Ok((next, entry))
}

/// Returns the actions that would currently pass execution checks.
pub fn available_actions<'a>(
    definition: &'a WorkflowDefinition,
    instance: &WorkflowInstance,
) -> Vec<&'a Action> {
    definition
        .actions_from(&instance.current_state)
        .into_iter()
        .filter(|a| validate_action_execution(definition, instance, &a.id).is_valid())
        .collect()
}
