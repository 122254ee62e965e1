use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{AxiaResult, DataType, Id, PartitionId, ValidationRules};

/// Attribute template: declared data type plus base rules.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeMeta {
    pub attribute_id: Id,
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub base_rules: ValidationRules,
}

/// Binding of an attribute to an owner class, with overlay rules and an optional default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssignmentMeta {
    pub assignment_id: Id,
    pub owner_class_id: Id,
    pub attribute_id: Id,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub overlay_rules: ValidationRules,
    #[serde(default)]
    pub default_value: Option<JsonValue>,
}

/// Read-only view of the schema subsystem. Implementations may cache; the store never writes.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    async fn get_attribute(
        &self,
        partition: PartitionId,
        attribute_id: Id,
    ) -> AxiaResult<Option<AttributeMeta>>;

    async fn get_assignment(
        &self,
        partition: PartitionId,
        assignment_id: Id,
    ) -> AxiaResult<Option<AssignmentMeta>>;
}

#[async_trait]
pub trait OwnerEntityProvider: Send + Sync {
    /// True only for entities that exist and are active.
    async fn exists(&self, partition: PartitionId, entity_id: Id) -> AxiaResult<bool>;

    async fn get_class(&self, partition: PartitionId, entity_id: Id) -> AxiaResult<Option<Id>>;
}
