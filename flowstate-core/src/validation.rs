//! Definition and action-execution validation.
//!
//! Both checks are pure functions that accumulate every violation they find.
//! Each violation carries an [`IssueKind`] for callers and a human-readable
//! message for API clients.

use crate::definition::{Action, WorkflowDefinition};
use crate::error::CoreError;
use crate::id::ActionId;
use crate::instance::WorkflowInstance;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    DuplicateState,
    DuplicateAction,
    NoInitialState,
    MultipleInitialStates,
    UnknownFromState,
    UnknownToState,
    EmptyFromStates,
    ActionNotFound,
    ActionDisabled,
    WrongCurrentState,
    FinalStateTransition,
    TargetStateDisabled,
}

/// A single violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub kind: IssueKind,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of a validation pass. Valid when no issues were recorded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: IssueKind, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(kind, message));
    }

    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Returns all messages in the order they were found.
    pub fn errors(&self) -> Vec<String> {
        self.issues.iter().map(|i| i.message.clone()).collect()
    }

    pub fn has(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    pub fn count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }

    /// Converts an invalid result into [`CoreError::Validation`].
    pub fn into_result(self) -> Result<(), CoreError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(CoreError::Validation(self))
        }
    }
}

impl Serialize for ValidationResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ValidationResult", 2)?;
        s.serialize_field("isValid", &self.is_valid())?;
        s.serialize_field("errors", &self.errors())?;
        s.end()
    }
}

/// Returns every id that occurs more than once, in order of first appearance.
fn duplicates<'a, T, I>(ids: I) -> Vec<&'a T>
where
    T: Eq + Hash + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let mut counts: HashMap<&T, usize> = HashMap::new();
    let mut order = Vec::new();
    for id in ids {
        let count = counts.entry(id).or_insert(0);
        if *count == 0 {
            order.push(id);
        }
        *count += 1;
    }
    order.into_iter().filter(|id| counts[id] > 1).collect()
}

/// Checks the structural integrity of a definition.
pub fn validate_definition(definition: &WorkflowDefinition) -> ValidationResult {
    let mut result = ValidationResult::new();

    for id in duplicates(definition.states.iter().map(|s| &s.id)) {
        result.push(IssueKind::DuplicateState, format!("Duplicate state ID: {}", id));
    }

    for id in duplicates(definition.actions.iter().map(|a| &a.id)) {
        result.push(
            IssueKind::DuplicateAction,
            format!("Duplicate action ID: {}", id),
        );
    }

    let initial_count = definition.initial_states().len();
    if initial_count == 0 {
        result.push(
            IssueKind::NoInitialState,
            "Workflow must have exactly one initial state",
        );
    } else if initial_count > 1 {
        result.push(
            IssueKind::MultipleInitialStates,
            format!(
                "Workflow must have exactly one initial state, found {}",
                initial_count
            ),
        );
    }

    let state_ids: HashSet<_> = definition.states.iter().map(|s| &s.id).collect();
    for action in &definition.actions {
        for from in &action.from_states {
            if !state_ids.contains(from) {
                result.push(
                    IssueKind::UnknownFromState,
                    format!(
                        "Action '{}' references unknown fromState: {}",
                        action.id, from
                    ),
                );
            }
        }

        if !state_ids.contains(&action.to_state) {
            result.push(
                IssueKind::UnknownToState,
                format!(
                    "Action '{}' references unknown toState: {}",
                    action.id, action.to_state
                ),
            );
        }

        if action.from_states.is_empty() {
            result.push(
                IssueKind::EmptyFromStates,
                format!("Action '{}' must have at least one fromState", action.id),
            );
        }
    }

    result
}

/// Checks whether `action_id` may run on `instance` right now.
///
/// A missing action is reported alone. Every other check runs independently.
pub fn validate_action_execution(
    definition: &WorkflowDefinition,
    instance: &WorkflowInstance,
    action_id: &ActionId,
) -> ValidationResult {
    let mut result = ValidationResult::new();

    let Some(action) = definition.action(action_id) else {
        result.push(
            IssueKind::ActionNotFound,
            format!("Action '{}' not found in workflow definition", action_id),
        );
        return result;
    };

    check_action(definition, instance, action, &mut result);
    result
}

fn check_action(
    definition: &WorkflowDefinition,
    instance: &WorkflowInstance,
    action: &Action,
    result: &mut ValidationResult,
) {
    let current = &instance.current_state;

    if !action.enabled {
        result.push(
            IssueKind::ActionDisabled,
            format!("Action '{}' is disabled", action.id),
        );
    }

    if !action.is_available_from(current) {
        result.push(
            IssueKind::WrongCurrentState,
            format!(
                "Action '{}' cannot be executed from current state '{}'",
                action.id, current
            ),
        );
    }

    if definition.state(current).is_some_and(|s| s.is_final) {
        result.push(
            IssueKind::FinalStateTransition,
            format!("Cannot execute actions from final state '{}'", current),
        );
    }

    match definition.state(&action.to_state) {
        None => result.push(
            IssueKind::UnknownToState,
            format!("Target state '{}' not found", action.to_state),
        ),
        Some(target) if !target.enabled => result.push(
            IssueKind::TargetStateDisabled,
            format!("Target state '{}' is disabled", action.to_state),
        ),
        Some(_) => {}
    }
}
