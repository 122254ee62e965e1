use async_trait::async_trait;
use sea_orm::TransactionTrait;

use crate::AxiaStore;
use crate::store::Attempt;
use aideon_axia_core::validation::check_assignment as check_assignment_rules;
use aideon_axia_core::{
    ActorId, AssignmentMeta, AttributeMeta, AxiaError, AxiaResult, BulkResult, BulkUpsertInput,
    DeleteValueInput, FieldError, HistoryInput, HistoryPage, Id, ListValuesInput, NewValue,
    PartitionId, RestoreValueInput, TypedValue, ValidateValueInput, ValidationApi, ValidationCode,
    ValidationMode, ValidationOutcome, ValuePage, ValuePair, ValueReadApi, ValueRecord, ValueSlot,
    ValueStoreApi, ValueWriteApi, WriteOutcome, WriteValueInput, plan_write, validate,
};
use serde_json::Value as JsonValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WriteIntent {
    Create,
    Update,
    Upsert,
}

/// A raw input that passed the metadata and parse stages; reference checks still pending.
#[derive(Clone, Debug)]
pub(crate) struct PreparedWrite {
    pub field: String,
    pub attribute_id: Id,
    pub assignment_id: Id,
    pub outcome: ValidationOutcome,
}

impl AxiaStore {
    async fn resolve_metadata(
        &self,
        partition: PartitionId,
        attribute_id: Id,
        assignment_id: Id,
    ) -> AxiaResult<(AttributeMeta, AssignmentMeta)> {
        let metadata = &self.collaborators.metadata;
        let attribute = metadata
            .get_attribute(partition, attribute_id)
            .await?
            .ok_or_else(|| AxiaError::not_found(format!("attribute {attribute_id} not found")))?;
        let assignment = metadata
            .get_assignment(partition, assignment_id)
            .await?
            .ok_or_else(|| {
                AxiaError::not_found(format!("assignment {assignment_id} not found"))
            })?;
        if assignment.attribute_id != attribute_id {
            return Err(AxiaError::precondition(format!(
                "assignment {assignment_id} does not bind attribute {attribute_id}"
            )));
        }
        Ok((attribute, assignment))
    }

    pub(crate) async fn ensure_owner_exists(
        &self,
        partition: PartitionId,
        owner_entity_id: Id,
    ) -> AxiaResult<()> {
        if self
            .collaborators
            .owners
            .exists(partition, owner_entity_id)
            .await?
        {
            Ok(())
        } else {
            Err(AxiaError::not_found(format!(
                "owner entity {owner_entity_id} not found"
            )))
        }
    }

    async fn ensure_owner_class(
        &self,
        partition: PartitionId,
        owner_entity_id: Id,
        assignment: &AssignmentMeta,
    ) -> AxiaResult<()> {
        let class = self
            .collaborators
            .owners
            .get_class(partition, owner_entity_id)
            .await?
            .ok_or_else(|| {
                AxiaError::not_found(format!("owner entity {owner_entity_id} not found"))
            })?;
        if class != assignment.owner_class_id {
            return Err(AxiaError::precondition(format!(
                "owner entity {owner_entity_id} has class {class}; assignment {} targets class {}",
                assignment.assignment_id, assignment.owner_class_id
            )));
        }
        Ok(())
    }

    fn check_limits(&self, field: &str, value: &TypedValue) -> AxiaResult<()> {
        match value {
            TypedValue::String(text) if text.len() > self.limits.max_string_bytes => {
                Err(AxiaError::invalid(format!(
                    "{field}: string of {} bytes exceeds limit {}",
                    text.len(),
                    self.limits.max_string_bytes
                )))
            }
            TypedValue::Document(doc) => {
                let size = serde_json::to_vec(doc)
                    .map_err(|err| AxiaError::invalid(format!("{field}: {err}")))?
                    .len();
                if size > self.limits.max_document_bytes {
                    return Err(AxiaError::invalid(format!(
                        "{field}: document of {size} bytes exceeds limit {}",
                        self.limits.max_document_bytes
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Metadata lookup, owner checks, parse and rule evaluation. Field failures stay in the
    /// outcome; `Err` means the request itself cannot proceed.
    pub(crate) async fn prepare_write(
        &self,
        partition: PartitionId,
        owner_entity_id: Option<Id>,
        attribute_id: Id,
        assignment_id: Id,
        raw: &JsonValue,
    ) -> AxiaResult<PreparedWrite> {
        let (attribute, assignment) = self
            .resolve_metadata(partition, attribute_id, assignment_id)
            .await?;
        if let Some(owner) = owner_entity_id {
            self.ensure_owner_exists(partition, owner).await?;
            self.ensure_owner_class(partition, owner, &assignment).await?;
        }
        let outcome = validate(&attribute, &assignment, raw, self.validation_mode)?;
        if let Some(value) = &outcome.value {
            self.check_limits(&attribute.name, value)?;
        }
        Ok(PreparedWrite {
            field: attribute.name,
            attribute_id,
            assignment_id,
            outcome,
        })
    }

    /// Target existence, plus the class restriction unless validation is off.
    pub(crate) async fn reference_errors(
        &self,
        partition: PartitionId,
        prepared: &PreparedWrite,
    ) -> AxiaResult<Vec<FieldError>> {
        let Some(target) = prepared.outcome.reference_target() else {
            return Ok(Vec::new());
        };
        let owners = &self.collaborators.owners;
        if !owners.exists(partition, target).await? {
            return Ok(vec![FieldError::new(
                prepared.field.as_str(),
                ValidationCode::ReferenceNotFound,
                format!("referenced entity {target} does not exist"),
            )]);
        }
        let expected = match (self.validation_mode, prepared.outcome.reference_class) {
            (ValidationMode::Off, _) | (_, None) => return Ok(Vec::new()),
            (_, Some(expected)) => expected,
        };
        match owners.get_class(partition, target).await? {
            Some(class) if class == expected => Ok(Vec::new()),
            _ => Ok(vec![FieldError::new(
                prepared.field.as_str(),
                ValidationCode::ConstraintViolation,
                format!("referenced entity {target} is not of class {expected}"),
            )]),
        }
    }

    /// Folds reference findings into the outcome and builds the row candidate, or returns
    /// the errors that block persistence under the configured mode.
    pub(crate) fn candidate(
        &self,
        partition: PartitionId,
        actor: ActorId,
        owner_entity_id: Id,
        prepared: &PreparedWrite,
        reference_errors: Vec<FieldError>,
    ) -> Result<NewValue, Vec<FieldError>> {
        let mut outcome = prepared.outcome.clone();
        outcome.errors.extend(reference_errors);
        if !outcome.is_persistable(self.validation_mode) {
            return Err(outcome.errors);
        }
        let Some(value) = outcome.value else {
            return Err(outcome.errors);
        };
        if !outcome.errors.is_empty() {
            log::warn!(
                "storing {} for owner {owner_entity_id} with {} rule violations",
                prepared.field,
                outcome.errors.len()
            );
        }
        Ok(NewValue {
            partition,
            owner_entity_id,
            attribute_id: prepared.attribute_id,
            assignment_id: prepared.assignment_id,
            slot: ValueSlot::set(value),
            is_valid: outcome.errors.is_empty(),
            validation_errors: outcome.errors,
            actor,
        })
    }

    pub(crate) async fn write_value(
        &self,
        input: WriteValueInput,
        intent: WriteIntent,
    ) -> AxiaResult<WriteOutcome> {
        let prepared = self
            .prepare_write(
                input.partition,
                Some(input.owner_entity_id),
                input.attribute_id,
                input.assignment_id,
                &input.raw,
            )
            .await?;
        if !prepared.outcome.is_persistable(self.validation_mode) {
            return Err(AxiaError::validation(prepared.outcome.errors));
        }
        let input = &input;
        let prepared = &prepared;
        self.retrying("value write", || async move {
            let pair = input.pair();
            let tx = self.conn.begin().await?;
            let head = self.load_head(&tx, pair).await?;
            match (intent, &head.current) {
                (WriteIntent::Create, Some(current)) => {
                    return Ok(Attempt::Rejected(AxiaError::conflict(format!(
                        "value {} is already current for owner {} attribute {}",
                        current.value_id, pair.owner_entity_id, pair.attribute_id
                    ))));
                }
                (WriteIntent::Update, None) => {
                    return Ok(Attempt::Rejected(AxiaError::not_found(format!(
                        "no current value for owner {} attribute {}",
                        pair.owner_entity_id, pair.attribute_id
                    ))));
                }
                _ => {}
            }
            let reference_errors = self.reference_errors(input.partition, prepared).await?;
            let candidate = match self.candidate(
                input.partition,
                input.actor,
                input.owner_entity_id,
                prepared,
                reference_errors,
            ) {
                Ok(candidate) => candidate,
                Err(errors) => return Ok(Attempt::Rejected(AxiaError::validation(errors))),
            };
            let plan = plan_write(&head, &candidate);
            let Some(applied) = self.apply_plan(&tx, candidate, plan).await? else {
                return Ok(Attempt::LostRace);
            };
            self.maybe_failpoint("value_write.before_commit")?;
            tx.commit().await?;
            self.publish(applied.event.as_slice());
            Ok(Attempt::Committed(applied.outcome))
        })
        .await
    }
}

#[async_trait]
impl ValueWriteApi for AxiaStore {
    async fn create_value(&self, input: WriteValueInput) -> AxiaResult<WriteOutcome> {
        self.write_value(input, WriteIntent::Create).await
    }

    async fn update_value(&self, input: WriteValueInput) -> AxiaResult<WriteOutcome> {
        self.write_value(input, WriteIntent::Update).await
    }

    async fn bulk_upsert_values(&self, input: BulkUpsertInput) -> AxiaResult<BulkResult> {
        self.bulk_upsert(input).await
    }

    async fn delete_value(&self, input: DeleteValueInput) -> AxiaResult<ValueRecord> {
        let pair = ValuePair {
            partition: input.partition,
            owner_entity_id: input.owner_entity_id,
            attribute_id: input.attribute_id,
        };
        let actor = input.actor;
        self.retrying("value delete", || async move {
            let tx = self.conn.begin().await?;
            let head = self.load_head(&tx, pair).await?;
            let Some(current) = head.current else {
                return Ok(Attempt::Rejected(AxiaError::not_found(format!(
                    "no current value for owner {} attribute {}",
                    pair.owner_entity_id, pair.attribute_id
                ))));
            };
            let (record, event) = match self
                .soft_delete_in(&tx, pair.partition, actor, current.value_id)
                .await?
            {
                Attempt::Committed(deleted) => deleted,
                Attempt::LostRace => return Ok(Attempt::LostRace),
                Attempt::Rejected(err) => return Ok(Attempt::Rejected(err)),
            };
            self.maybe_failpoint("value_delete.before_commit")?;
            tx.commit().await?;
            self.publish(event.as_slice());
            Ok(Attempt::Committed(record))
        })
        .await
    }

    async fn restore_value(&self, input: RestoreValueInput) -> AxiaResult<WriteOutcome> {
        let source = self
            .fetch_record(&self.conn, input.partition, input.value_id)
            .await?
            .ok_or_else(|| AxiaError::not_found(format!("value {} not found", input.value_id)))?;
        let Some(value) = source.value() else {
            return Err(AxiaError::invalid(format!(
                "value {} is a cleared reference and cannot be restored",
                input.value_id
            )));
        };
        log::debug!(
            "restoring value {} (version {}) as a new version",
            source.value_id,
            source.version
        );
        let write = WriteValueInput {
            partition: input.partition,
            actor: input.actor,
            owner_entity_id: source.owner_entity_id,
            attribute_id: source.attribute_id,
            assignment_id: source.assignment_id,
            raw: value.to_raw(),
        };
        self.write_value(write, WriteIntent::Upsert).await
    }
}

#[async_trait]
impl ValueReadApi for AxiaStore {
    async fn get_current_value(&self, pair: ValuePair) -> AxiaResult<Option<ValueRecord>> {
        self.get_current(pair).await
    }

    async fn get_value(
        &self,
        partition: PartitionId,
        value_id: Id,
    ) -> AxiaResult<Option<ValueRecord>> {
        self.get_by_id(partition, value_id).await
    }

    async fn list_values(&self, input: ListValuesInput) -> AxiaResult<ValuePage> {
        self.list(input).await
    }

    async fn get_value_history(&self, input: HistoryInput) -> AxiaResult<HistoryPage> {
        self.get_history(input).await
    }
}

#[async_trait]
impl ValidationApi for AxiaStore {
    async fn validate_value(&self, input: ValidateValueInput) -> AxiaResult<ValidationOutcome> {
        let prepared = self
            .prepare_write(
                input.partition,
                input.owner_entity_id,
                input.attribute_id,
                input.assignment_id,
                &input.raw,
            )
            .await?;
        let reference_errors = self.reference_errors(input.partition, &prepared).await?;
        let mut outcome = prepared.outcome;
        outcome.errors.extend(reference_errors);
        Ok(outcome)
    }

    async fn check_assignment(&self, partition: PartitionId, assignment_id: Id) -> AxiaResult<()> {
        let metadata = &self.collaborators.metadata;
        let assignment = metadata
            .get_assignment(partition, assignment_id)
            .await?
            .ok_or_else(|| {
                AxiaError::not_found(format!("assignment {assignment_id} not found"))
            })?;
        let attribute = metadata
            .get_attribute(partition, assignment.attribute_id)
            .await?
            .ok_or_else(|| {
                AxiaError::not_found(format!("attribute {} not found", assignment.attribute_id))
            })?;
        check_assignment_rules(&attribute, &assignment)?;
        Ok(())
    }
}
