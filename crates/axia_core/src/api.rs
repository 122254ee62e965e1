use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::{
    ActorId, AxiaResult, ChangeFeedEntry, ChangeKind, FieldError, HistoryInput, HistoryPage, Id,
    ListValuesInput, NewValue, PartitionId, ValidationOutcome, ValuePage, ValuePair, ValueRecord,
    WriteOutcome,
};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteValueInput {
    pub partition: PartitionId,
    pub actor: ActorId,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub raw: JsonValue,
}

impl WriteValueInput {
    pub fn pair(&self) -> ValuePair {
        ValuePair {
            partition: self.partition,
            owner_entity_id: self.owner_entity_id,
            attribute_id: self.attribute_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteValueInput {
    pub partition: PartitionId,
    pub actor: ActorId,
    pub owner_entity_id: Id,
    pub attribute_id: Id,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestoreValueInput {
    pub partition: PartitionId,
    pub actor: ActorId,
    /// Any historic row of the chain; its content becomes a new current version.
    pub value_id: Id,
}

/// Dry-run input. Without an owner the class and reference checks that need one are skipped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidateValueInput {
    pub partition: PartitionId,
    pub owner_entity_id: Option<Id>,
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub raw: JsonValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkItem {
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub raw: JsonValue,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkUpsertInput {
    pub partition: PartitionId,
    pub actor: ActorId,
    pub owner_entity_id: Id,
    pub items: Vec<BulkItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BulkItemStatus {
    Applied {
        value: Box<ValueRecord>,
        change: ChangeKind,
    },
    /// Valid, but not applied because another item failed.
    Valid,
    Invalid {
        errors: Vec<FieldError>,
    },
    /// Failed a precondition (unknown assignment, class mismatch) rather than validation.
    Rejected {
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkItemOutcome {
    pub attribute_id: Id,
    pub status: BulkItemStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BulkResult {
    pub committed: bool,
    pub items: Vec<BulkItemOutcome>,
}

/// Transactional persistence boundary. Callers hand in already-validated values.
#[async_trait]
pub trait ValueStoreApi {
    /// Fails with `Conflict` when the pair already has a current row.
    async fn create(&self, value: NewValue) -> AxiaResult<ValueRecord>;

    /// Fails with `Conflict` when `previous_value_id` is no longer the current row.
    async fn create_with_supersede(
        &self,
        value: NewValue,
        previous_value_id: Id,
    ) -> AxiaResult<ValueRecord>;

    async fn get_current(&self, pair: ValuePair) -> AxiaResult<Option<ValueRecord>>;

    async fn get_history(&self, input: HistoryInput) -> AxiaResult<HistoryPage>;

    async fn get_by_id(
        &self,
        partition: PartitionId,
        value_id: Id,
    ) -> AxiaResult<Option<ValueRecord>>;

    async fn list(&self, input: ListValuesInput) -> AxiaResult<ValuePage>;

    /// Plans and applies every value in one transaction; all or nothing.
    async fn bulk_create_or_update(&self, values: Vec<NewValue>)
    -> AxiaResult<Vec<WriteOutcome>>;

    /// Deletes the current row of a chain; superseded rows are `Invalid`. Repeats are no-ops.
    async fn soft_delete(
        &self,
        partition: PartitionId,
        actor: ActorId,
        value_id: Id,
    ) -> AxiaResult<ValueRecord>;
}

#[async_trait]
pub trait ValueWriteApi {
    /// Initial write for a pair; `Conflict` when a current value exists.
    async fn create_value(&self, input: WriteValueInput) -> AxiaResult<WriteOutcome>;
    /// Successor write for a pair; `NotFound` when there is no current value.
    async fn update_value(&self, input: WriteValueInput) -> AxiaResult<WriteOutcome>;
    async fn bulk_upsert_values(&self, input: BulkUpsertInput) -> AxiaResult<BulkResult>;
    async fn delete_value(&self, input: DeleteValueInput) -> AxiaResult<ValueRecord>;
    async fn restore_value(&self, input: RestoreValueInput) -> AxiaResult<WriteOutcome>;
}

#[async_trait]
pub trait ValueReadApi {
    async fn get_current_value(&self, pair: ValuePair) -> AxiaResult<Option<ValueRecord>>;
    async fn get_value(
        &self,
        partition: PartitionId,
        value_id: Id,
    ) -> AxiaResult<Option<ValueRecord>>;
    async fn list_values(&self, input: ListValuesInput) -> AxiaResult<ValuePage>;
    async fn get_value_history(&self, input: HistoryInput) -> AxiaResult<HistoryPage>;
}

#[async_trait]
pub trait ValidationApi {
    async fn validate_value(&self, input: ValidateValueInput) -> AxiaResult<ValidationOutcome>;
    /// Assignment-time rule check; widening overlays surface as `Configuration`.
    async fn check_assignment(&self, partition: PartitionId, assignment_id: Id)
    -> AxiaResult<()>;
}

#[async_trait]
pub trait ReferenceApi {
    /// Applies the configured delete policy to values referencing `entity_id`.
    /// Returns the rows written by the cascade.
    async fn on_owner_entity_deleted(
        &self,
        partition: PartitionId,
        actor: ActorId,
        entity_id: Id,
    ) -> AxiaResult<Vec<ValueRecord>>;
}

#[async_trait]
pub trait ChangeFeedApi {
    async fn get_changes_since(
        &self,
        partition: PartitionId,
        from_sequence: Option<i64>,
        limit: u32,
    ) -> AxiaResult<Vec<ChangeFeedEntry>>;
    async fn subscribe(
        &self,
        partition: PartitionId,
        from_sequence: Option<i64>,
    ) -> AxiaResult<tokio::sync::mpsc::Receiver<ChangeFeedEntry>>;
}
