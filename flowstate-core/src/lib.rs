//! # flowstate-core
//!
//! Workflow engine for flowstate.
//!
//! This crate provides:
//! - Workflow definition and instance models
//! - Structural validation of definitions
//! - Action execution checks and the transition engine
//!
//! Nothing in here touches storage or the network; every function is a pure
//! computation over the values it is given.

pub mod definition;
pub mod engine;
pub mod error;
pub mod id;
pub mod instance;
pub mod validation;

pub use definition::{Action, NewDefinition, WorkflowDefinition, WorkflowState};
pub use engine::{apply_action, available_actions, execute_action, start_instance};
pub use error::CoreError;
pub use id::{ActionId, DefinitionId, InstanceId, StateId};
pub use instance::{HistoryEntry, WorkflowInstance};
pub use validation::{
    validate_action_execution, validate_definition, IssueKind, ValidationIssue, ValidationResult,
};
