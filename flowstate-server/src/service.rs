//! Workflow service - the operations the gateway exposes.
//!
//! Every call is synchronous and talks to the [`Repository`] directly. The
//! only multi-step write is [`WorkflowService::execute_action`], which holds
//! the instance lock from the read until the save so two requests against
//! the same instance can never both commit from the same starting state.

use crate::error::ServiceError;
use crate::metrics::Metrics;
use chrono::Utc;
use flowstate_core::{
    engine, validate_definition, Action, ActionId, CoreError, DefinitionId, InstanceId,
    NewDefinition, WorkflowDefinition, WorkflowInstance,
};
use flowstate_storage::{InstanceLocks, Repository};
use std::sync::Arc;

pub struct WorkflowService {
    repository: Arc<dyn Repository>,
    locks: InstanceLocks,
    metrics: Option<Arc<Metrics>>,
}

impl WorkflowService {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            locks: InstanceLocks::new(),
            metrics: None,
        }
    }

    /// Sets the metrics instance and seeds the record gauges.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        match self.repository.list_definitions() {
            Ok(definitions) => metrics.definitions_total.set(definitions.len() as f64),
            Err(e) => tracing::warn!("Cannot count definitions for metrics: {}", e),
        }
        match self.repository.list_instances() {
            Ok(instances) => metrics.instances_total.set(instances.len() as f64),
            Err(e) => tracing::warn!("Cannot count instances for metrics: {}", e),
        }
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Validates and stores a new definition.
    pub fn create_definition(
        &self,
        request: NewDefinition,
    ) -> Result<WorkflowDefinition, ServiceError> {
        let mut definition = request.into_definition(DefinitionId::default(), Utc::now());

        let result = validate_definition(&definition);
        if !result.is_valid() {
            tracing::debug!(
                "Rejected definition '{}': {}",
                definition.name,
                result.errors().join("; ")
            );
            return Err(ServiceError::Validation(result.errors()));
        }

        definition.id = self.repository.save_definition(definition.clone())?;
        tracing::info!(
            "Created workflow definition {} ('{}', {} states, {} actions)",
            definition.id,
            definition.name,
            definition.states.len(),
            definition.actions.len()
        );

        if let Some(ref metrics) = self.metrics {
            metrics.definitions_total.inc();
        }
        Ok(definition)
    }

    pub fn get_definition(&self, id: &DefinitionId) -> Result<Arc<WorkflowDefinition>, ServiceError> {
        self.repository
            .get_definition(id)?
            .ok_or_else(|| ServiceError::DefinitionNotFound(id.clone()))
    }

    pub fn list_definitions(&self) -> Result<Vec<Arc<WorkflowDefinition>>, ServiceError> {
        Ok(self.repository.list_definitions()?)
    }

    /// Creates an instance in the definition's initial state.
    pub fn start_instance(&self, definition_id: &DefinitionId) -> Result<WorkflowInstance, ServiceError> {
        if definition_id.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "definitionId is required".to_string(),
            ));
        }

        let definition = self.get_definition(definition_id)?;
        let mut instance = engine::start_instance(&definition).map_err(|e| {
            tracing::error!("Cannot start instance of {}: {}", definition_id, e);
            ServiceError::from(e)
        })?;

        instance.id = self.repository.save_instance(instance.clone())?;
        tracing::info!(
            "Started workflow instance {} from definition {} in state '{}'",
            instance.id,
            definition_id,
            instance.current_state
        );

        if let Some(ref metrics) = self.metrics {
            metrics.instances_total.inc();
        }
        Ok(instance)
    }

    /// Validates and applies one action, then persists the result.
    ///
    /// On any failure the stored instance is left exactly as it was.
    pub fn execute_action(
        &self,
        instance_id: &InstanceId,
        action_id: &ActionId,
    ) -> Result<WorkflowInstance, ServiceError> {
        if action_id.is_empty() {
            return Err(ServiceError::InvalidRequest("actionId is required".to_string()));
        }

        // Unknown ids never reach the lock table.
        self.get_instance(instance_id)?;
        let _guard = self.locks.lock(instance_id);

        let instance = self.get_instance(instance_id)?;
        let definition = self.definition_for(&instance)?;

        let (next, entry) = match engine::execute_action(&definition, &instance, action_id) {
            Ok(applied) => applied,
            Err(CoreError::Validation(result)) => {
                tracing::debug!(
                    "Rejected action '{}' on instance {} in state '{}': {}",
                    action_id,
                    instance_id,
                    instance.current_state,
                    result.errors().join("; ")
                );
                if let Some(ref metrics) = self.metrics {
                    metrics.transitions_rejected_total.inc();
                }
                return Err(ServiceError::Validation(result.errors()));
            }
            Err(e) => return Err(e.into()),
        };

        self.repository.save_instance(next.clone())?;
        tracing::info!(
            "Executed action '{}' on instance {}: {} -> {}",
            action_id,
            instance_id,
            entry.from_state,
            entry.to_state
        );

        if let Some(ref metrics) = self.metrics {
            metrics.transitions_total.inc();
        }
        Ok(next)
    }

    pub fn get_instance(&self, id: &InstanceId) -> Result<WorkflowInstance, ServiceError> {
        self.repository
            .get_instance(id)?
            .ok_or_else(|| ServiceError::InstanceNotFound(id.clone()))
    }

    /// Lists instances, optionally only those of one definition.
    pub fn list_instances(
        &self,
        definition_id: Option<&DefinitionId>,
    ) -> Result<Vec<WorkflowInstance>, ServiceError> {
        let instances = match definition_id {
            Some(id) => self.repository.instances_for_definition(id)?,
            None => self.repository.list_instances()?,
        };
        Ok(instances)
    }

    /// Returns the actions the instance could take right now.
    pub fn available_actions(&self, instance_id: &InstanceId) -> Result<Vec<Action>, ServiceError> {
        let instance = self.get_instance(instance_id)?;
        let definition = self.definition_for(&instance)?;
        Ok(engine::available_actions(&definition, &instance)
            .into_iter()
            .cloned()
            .collect())
    }

    fn definition_for(
        &self,
        instance: &WorkflowInstance,
    ) -> Result<Arc<WorkflowDefinition>, ServiceError> {
        match self.repository.get_definition(&instance.definition_id)? {
            Some(definition) => Ok(definition),
            None => {
                tracing::error!(
                    "Instance {} references missing definition {}",
                    instance.id,
                    instance.definition_id
                );
                Err(ServiceError::Structural(format!(
                    "Workflow definition '{}' not found for instance '{}'",
                    instance.definition_id, instance.id
                )))
            }
        }
    }
}
