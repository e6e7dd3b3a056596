//! Repository abstraction.

use crate::error::StorageError;
use flowstate_core::{DefinitionId, InstanceId, WorkflowDefinition, WorkflowInstance};
use std::sync::Arc;

/// Keyed store for definitions and instances.
///
/// Implementations only guarantee that each single save is atomic. Callers
/// that read, modify and write back an instance must serialize on the
/// instance id themselves (see [`crate::InstanceLocks`]).
///
/// List operations return records ordered by creation time, then id.
pub trait Repository: Send + Sync {
    fn get_definition(
        &self,
        id: &DefinitionId,
    ) -> Result<Option<Arc<WorkflowDefinition>>, StorageError>;

    /// Stores a definition, assigning a fresh id when it has none.
    fn save_definition(&self, definition: WorkflowDefinition) -> Result<DefinitionId, StorageError>;

    fn list_definitions(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StorageError>;

    fn get_instance(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, StorageError>;

    /// Stores an instance, assigning a fresh id when it has none.
    fn save_instance(&self, instance: WorkflowInstance) -> Result<InstanceId, StorageError>;

    fn list_instances(&self) -> Result<Vec<WorkflowInstance>, StorageError>;

    /// Returns the instances running against one definition.
    fn instances_for_definition(
        &self,
        definition_id: &DefinitionId,
    ) -> Result<Vec<WorkflowInstance>, StorageError> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter(|i| &i.definition_id == definition_id)
            .collect())
    }
}

pub(crate) fn sort_definitions(definitions: &mut [Arc<WorkflowDefinition>]) {
    definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}

pub(crate) fn sort_instances(instances: &mut [WorkflowInstance]) {
    instances.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
}
