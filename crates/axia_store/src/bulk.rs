use std::collections::HashSet;

use sea_orm::TransactionTrait;

use crate::AxiaStore;
use crate::store::Attempt;
use aideon_axia_core::{
    AxiaError, AxiaResult, BulkItemOutcome, BulkItemStatus, BulkResult, BulkUpsertInput,
};

impl AxiaStore {
    /// Validates every item, then applies all of them in one transaction or none of them.
    /// Per-item statuses report which items blocked the batch.
    pub(crate) async fn bulk_upsert(&self, input: BulkUpsertInput) -> AxiaResult<BulkResult> {
        if input.items.is_empty() {
            return Ok(BulkResult {
                committed: true,
                items: Vec::new(),
            });
        }
        if input.items.len() > self.limits.max_bulk_items {
            return Err(AxiaError::invalid(format!(
                "bulk upsert of {} items exceeds limit {}",
                input.items.len(),
                self.limits.max_bulk_items
            )));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = input
            .items
            .iter()
            .find(|item| !seen.insert(item.attribute_id))
        {
            return Err(AxiaError::invalid(format!(
                "attribute {} appears more than once",
                duplicate.attribute_id
            )));
        }
        self.ensure_owner_exists(input.partition, input.owner_entity_id)
            .await?;

        let mut prepared = Vec::with_capacity(input.items.len());
        let mut statuses = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let result = self
                .prepare_write(
                    input.partition,
                    Some(input.owner_entity_id),
                    item.attribute_id,
                    item.assignment_id,
                    &item.raw,
                )
                .await;
            match result {
                Ok(write) if write.outcome.is_persistable(self.validation_mode) => {
                    statuses.push(None);
                    prepared.push(write);
                }
                Ok(write) => statuses.push(Some(BulkItemStatus::Invalid {
                    errors: write.outcome.errors,
                })),
                Err(err) if err.is_retryable() => return Err(err),
                Err(err) => statuses.push(Some(BulkItemStatus::Rejected {
                    message: err.to_string(),
                })),
            }
        }
        if statuses.iter().any(Option::is_some) {
            log::debug!(
                "bulk upsert for owner {} rejected before write",
                input.owner_entity_id
            );
            return Ok(uncommitted(&input, statuses));
        }

        let input = &input;
        let prepared = &prepared;
        self.retrying("bulk upsert", || async move {
            let tx = self.conn.begin().await?;
            let mut candidates = Vec::with_capacity(prepared.len());
            let mut statuses = Vec::with_capacity(prepared.len());
            for write in prepared {
                let reference_errors = self.reference_errors(input.partition, write).await?;
                match self.candidate(
                    input.partition,
                    input.actor,
                    input.owner_entity_id,
                    write,
                    reference_errors,
                ) {
                    Ok(candidate) => {
                        candidates.push(candidate);
                        statuses.push(None);
                    }
                    Err(errors) => statuses.push(Some(BulkItemStatus::Invalid { errors })),
                }
            }
            if statuses.iter().any(Option::is_some) {
                return Ok(Attempt::Committed(uncommitted(input, statuses)));
            }
            let Some(applied) = self.apply_batch(&tx, &candidates).await? else {
                return Ok(Attempt::LostRace);
            };
            self.maybe_failpoint("bulk_upsert.before_commit")?;
            tx.commit().await?;
            let events = applied
                .iter()
                .filter_map(|item| item.event.clone())
                .collect::<Vec<_>>();
            self.publish(&events);
            let items = prepared
                .iter()
                .zip(applied)
                .map(|(write, item)| BulkItemOutcome {
                    attribute_id: write.attribute_id,
                    status: BulkItemStatus::Applied {
                        value: Box::new(item.outcome.value),
                        change: item.outcome.change,
                    },
                })
                .collect();
            Ok(Attempt::Committed(BulkResult {
                committed: true,
                items,
            }))
        })
        .await
    }
}

/// Items without a failure are reported `Valid`: they passed but were not applied.
fn uncommitted(input: &BulkUpsertInput, statuses: Vec<Option<BulkItemStatus>>) -> BulkResult {
    let items = input
        .items
        .iter()
        .zip(statuses)
        .map(|(item, status)| BulkItemOutcome {
            attribute_id: item.attribute_id,
            status: status.unwrap_or(BulkItemStatus::Valid),
        })
        .collect();
    BulkResult {
        committed: false,
        items,
    }
}
