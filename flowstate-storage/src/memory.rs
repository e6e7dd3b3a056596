//! In-memory repository.

use crate::error::StorageError;
use crate::repository::{sort_definitions, sort_instances, Repository};
use dashmap::DashMap;
use flowstate_core::{DefinitionId, InstanceId, WorkflowDefinition, WorkflowInstance};
use std::sync::Arc;

/// Repository backed by concurrent maps keyed by id.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    /// Definitions are immutable once stored, so readers share them.
    definitions: DashMap<DefinitionId, Arc<WorkflowDefinition>>,

    instances: DashMap<InstanceId, WorkflowInstance>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn definition_count(&self) -> usize {
        self.definitions.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

impl Repository for InMemoryRepository {
    fn get_definition(
        &self,
        id: &DefinitionId,
    ) -> Result<Option<Arc<WorkflowDefinition>>, StorageError> {
        Ok(self.definitions.get(id).map(|r| r.clone()))
    }

    fn save_definition(
        &self,
        mut definition: WorkflowDefinition,
    ) -> Result<DefinitionId, StorageError> {
        if definition.id.is_empty() {
            definition.id = DefinitionId::generate();
        }
        let id = definition.id.clone();
        self.definitions.insert(id.clone(), Arc::new(definition));
        Ok(id)
    }

    fn list_definitions(&self) -> Result<Vec<Arc<WorkflowDefinition>>, StorageError> {
        let mut definitions: Vec<_> = self.definitions.iter().map(|r| r.value().clone()).collect();
        sort_definitions(&mut definitions);
        Ok(definitions)
    }

    fn get_instance(&self, id: &InstanceId) -> Result<Option<WorkflowInstance>, StorageError> {
        Ok(self.instances.get(id).map(|r| r.clone()))
    }

    fn save_instance(&self, mut instance: WorkflowInstance) -> Result<InstanceId, StorageError> {
        if instance.id.is_empty() {
            instance.id = InstanceId::generate();
        }
        let id = instance.id.clone();
        self.instances.insert(id.clone(), instance);
        Ok(id)
    }

    fn list_instances(&self) -> Result<Vec<WorkflowInstance>, StorageError> {
        let mut instances: Vec<_> = self.instances.iter().map(|r| r.value().clone()).collect();
        sort_instances(&mut instances);
        Ok(instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use flowstate_core::{Action, StateId, WorkflowState};

    fn definition(name: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: DefinitionId::default(),
            name: name.to_string(),
            description: None,
            states: vec![
                WorkflowState::new("open", "Open").initial(),
                WorkflowState::new("closed", "Closed").terminal(),
            ],
            actions: vec![Action::new("close", "Close", ["open"], "closed")],
            created_at: Utc::now(),
        }
    }

    fn instance(definition_id: &DefinitionId) -> WorkflowInstance {
        WorkflowInstance::new(
            InstanceId::default(),
            definition_id.clone(),
            StateId::from("open"),
            Utc::now(),
        )
    }

    #[test]
    fn test_save_assigns_ids() {
        let repo = InMemoryRepository::new();

        let def_id = repo.save_definition(definition("ticket")).unwrap();
        assert!(!def_id.is_empty());

        let stored = repo.get_definition(&def_id).unwrap().unwrap();
        assert_eq!(stored.id, def_id);
        assert_eq!(stored.name, "ticket");

        let inst_id = repo.save_instance(instance(&def_id)).unwrap();
        let stored = repo.get_instance(&inst_id).unwrap().unwrap();
        assert_eq!(stored.id, inst_id);
        assert_eq!(stored.definition_id, def_id);
    }

    #[test]
    fn test_save_keeps_existing_id() {
        let repo = InMemoryRepository::new();
        let mut def = definition("ticket");
        def.id = DefinitionId::from("fixed");

        assert_eq!(repo.save_definition(def).unwrap().as_str(), "fixed");
        assert_eq!(repo.definition_count(), 1);
    }

    #[test]
    fn test_missing_records() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_definition(&DefinitionId::from("nope")).unwrap().is_none());
        assert!(repo.get_instance(&InstanceId::from("nope")).unwrap().is_none());
        assert!(repo.list_definitions().unwrap().is_empty());
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let repo = InMemoryRepository::new();
        let def_id = repo.save_definition(definition("ticket")).unwrap();
        let inst_id = repo.save_instance(instance(&def_id)).unwrap();

        assert_eq!(
            repo.get_definition(&def_id).unwrap(),
            repo.get_definition(&def_id).unwrap()
        );
        assert_eq!(
            repo.get_instance(&inst_id).unwrap(),
            repo.get_instance(&inst_id).unwrap()
        );
    }

    #[test]
    fn test_lists_are_ordered_by_creation() {
        let repo = InMemoryRepository::new();
        let base = Utc::now();
        for (i, name) in ["c", "a", "b"].iter().enumerate() {
            let mut def = definition(name);
            def.created_at = base + Duration::seconds(i as i64);
            repo.save_definition(def).unwrap();
        }

        let names: Vec<String> = repo
            .list_definitions()
            .unwrap()
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
        assert_eq!(repo.list_definitions().unwrap(), repo.list_definitions().unwrap());
    }

    #[test]
    fn test_instances_for_definition() {
        let repo = InMemoryRepository::new();
        let first = repo.save_definition(definition("one")).unwrap();
        let second = repo.save_definition(definition("two")).unwrap();

        repo.save_instance(instance(&first)).unwrap();
        repo.save_instance(instance(&first)).unwrap();
        repo.save_instance(instance(&second)).unwrap();

        assert_eq!(repo.instances_for_definition(&first).unwrap().len(), 2);
        assert_eq!(repo.instances_for_definition(&second).unwrap().len(), 1);
        assert_eq!(repo.instance_count(), 3);
    }
}
