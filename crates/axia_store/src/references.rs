use async_trait::async_trait;
use sea_orm::TransactionTrait;

use crate::store::Attempt;
use crate::{AxiaStore, ReferenceDeletePolicy};
use aideon_axia_core::{
    ActorId, AxiaError, AxiaResult, FieldError, Id, NewValue, PartitionId, ReferenceApi,
    ValidationCode, ValueRecord, ValueSlot, WritePlan, check_assignment,
};

impl AxiaStore {
    /// Attribute name and effective requiredness for the row's assignment. Missing metadata
    /// degrades to "optional" so a stale catalog cannot block an entity delete.
    async fn requiredness(&self, partition: PartitionId, row: &ValueRecord) -> AxiaResult<(String, bool)> {
        let metadata = &self.collaborators.metadata;
        let attribute = metadata.get_attribute(partition, row.attribute_id).await?;
        let assignment = metadata.get_assignment(partition, row.assignment_id).await?;
        match (attribute, assignment) {
            (Some(attribute), Some(assignment)) => {
                let required = match check_assignment(&attribute, &assignment) {
                    Ok(rules) => rules.is_required(),
                    Err(err) => {
                        log::warn!(
                            "assignment {} no longer checks out ({err}); using its flag",
                            assignment.assignment_id
                        );
                        assignment.is_required || attribute.base_rules.required
                    }
                };
                Ok((attribute.name, required))
            }
            _ => {
                log::warn!(
                    "metadata for attribute {} / assignment {} is gone; clearing as optional",
                    row.attribute_id,
                    row.assignment_id
                );
                Ok((row.attribute_id.to_string(), false))
            }
        }
    }

    async fn cascade_attempt(
        &self,
        partition: PartitionId,
        actor: ActorId,
        entity_id: Id,
    ) -> AxiaResult<Attempt<Vec<ValueRecord>>> {
        let tx = self.conn.begin().await?;
        let rows = self.current_references_to(&tx, partition, entity_id).await?;
        if rows.is_empty() {
            return Ok(Attempt::Committed(Vec::new()));
        }
        let mut written = Vec::with_capacity(rows.len());
        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let head = self.load_head(&tx, row.pair()).await?;
            if head.current.as_ref().map(|current| current.value_id) != Some(row.value_id) {
                return Ok(Attempt::LostRace);
            }
            let (field, required) = self.requiredness(partition, &row).await?;
            let validation_errors = if required {
                vec![FieldError::new(
                    field,
                    ValidationCode::RequiredMissing,
                    format!("referenced entity {entity_id} was deleted"),
                )]
            } else {
                Vec::new()
            };
            let candidate = NewValue {
                partition,
                owner_entity_id: row.owner_entity_id,
                attribute_id: row.attribute_id,
                assignment_id: row.assignment_id,
                slot: ValueSlot::ClearedReference,
                is_valid: !required,
                validation_errors,
                actor,
            };
            let version = head.last_version.max(row.version) + 1;
            let plan = WritePlan::Supersede {
                previous: row,
                version,
            };
            let Some(applied) = self.apply_plan(&tx, candidate, plan).await? else {
                return Ok(Attempt::LostRace);
            };
            events.extend(applied.event);
            written.push(applied.outcome.value);
        }
        self.maybe_failpoint("reference_cascade.before_commit")?;
        tx.commit().await?;
        self.publish(&events);
        log::debug!(
            "cleared {} references to deleted entity {entity_id}",
            written.len()
        );
        Ok(Attempt::Committed(written))
    }
}

#[async_trait]
impl ReferenceApi for AxiaStore {
    async fn on_owner_entity_deleted(
        &self,
        partition: PartitionId,
        actor: ActorId,
        entity_id: Id,
    ) -> AxiaResult<Vec<ValueRecord>> {
        match self.delete_policy {
            ReferenceDeletePolicy::Restrict => {
                let referencing = self
                    .current_references_to(&self.conn, partition, entity_id)
                    .await?;
                if referencing.is_empty() {
                    Ok(Vec::new())
                } else {
                    Err(AxiaError::precondition(format!(
                        "entity {entity_id} is referenced by {} current values",
                        referencing.len()
                    )))
                }
            }
            ReferenceDeletePolicy::Cascade => {
                self.retrying("reference cascade", || {
                    self.cascade_attempt(partition, actor, entity_id)
                })
                .await
            }
        }
    }
}
