use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::Collaborators;
use aideon_axia_core::{
    AssignmentMeta, AttributeMeta, AxiaError, AxiaResult, Id, MetadataProvider,
    OwnerEntityProvider, PartitionId, check_assignment,
};

type Key = (PartitionId, Id);

#[derive(Clone, Copy, Debug)]
struct EntityEntry {
    class_id: Id,
    active: bool,
}

/// Process-local metadata and entity catalog for embedders without a schema service.
/// Assignments are checked against their attribute when registered.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    attributes: RwLock<HashMap<Key, AttributeMeta>>,
    assignments: RwLock<HashMap<Key, AssignmentMeta>>,
    entities: RwLock<HashMap<Key, EntityEntry>>,
}

fn poisoned<T>(_: T) -> AxiaError {
    AxiaError::storage("catalog lock poisoned")
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collaborators(self: &Arc<Self>) -> Collaborators {
        Collaborators::new(self.clone(), self.clone())
    }

    pub fn register_attribute(
        &self,
        partition: PartitionId,
        attribute: AttributeMeta,
    ) -> AxiaResult<()> {
        let mut attributes = self.attributes.write().map_err(poisoned)?;
        attributes.insert((partition, attribute.attribute_id), attribute);
        Ok(())
    }

    /// Rejects overlays that widen the attribute's rules and defaults that break them.
    pub fn register_assignment(
        &self,
        partition: PartitionId,
        assignment: AssignmentMeta,
    ) -> AxiaResult<()> {
        let attribute = self
            .attributes
            .read()
            .map_err(poisoned)?
            .get(&(partition, assignment.attribute_id))
            .cloned()
            .ok_or_else(|| {
                AxiaError::not_found(format!("attribute {} not found", assignment.attribute_id))
            })?;
        check_assignment(&attribute, &assignment)?;
        let mut assignments = self.assignments.write().map_err(poisoned)?;
        assignments.insert((partition, assignment.assignment_id), assignment);
        Ok(())
    }

    pub fn upsert_entity(&self, partition: PartitionId, entity_id: Id, class_id: Id) -> AxiaResult<()> {
        let mut entities = self.entities.write().map_err(poisoned)?;
        entities.insert(
            (partition, entity_id),
            EntityEntry {
                class_id,
                active: true,
            },
        );
        Ok(())
    }

    /// Marks the entity inactive. Returns false when it was unknown or already deleted.
    pub fn delete_entity(&self, partition: PartitionId, entity_id: Id) -> AxiaResult<bool> {
        let mut entities = self.entities.write().map_err(poisoned)?;
        match entities.get_mut(&(partition, entity_id)) {
            Some(entry) if entry.active => {
                entry.active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl MetadataProvider for InMemoryCatalog {
    async fn get_attribute(
        &self,
        partition: PartitionId,
        attribute_id: Id,
    ) -> AxiaResult<Option<AttributeMeta>> {
        let attributes = self.attributes.read().map_err(poisoned)?;
        Ok(attributes.get(&(partition, attribute_id)).cloned())
    }

    async fn get_assignment(
        &self,
        partition: PartitionId,
        assignment_id: Id,
    ) -> AxiaResult<Option<AssignmentMeta>> {
        let assignments = self.assignments.read().map_err(poisoned)?;
        Ok(assignments.get(&(partition, assignment_id)).cloned())
    }
}

#[async_trait]
impl OwnerEntityProvider for InMemoryCatalog {
    async fn exists(&self, partition: PartitionId, entity_id: Id) -> AxiaResult<bool> {
        let entities = self.entities.read().map_err(poisoned)?;
        Ok(entities
            .get(&(partition, entity_id))
            .is_some_and(|entry| entry.active))
    }

    async fn get_class(&self, partition: PartitionId, entity_id: Id) -> AxiaResult<Option<Id>> {
        let entities = self.entities.read().map_err(poisoned)?;
        Ok(entities
            .get(&(partition, entity_id))
            .filter(|entry| entry.active)
            .map(|entry| entry.class_id))
    }
}
