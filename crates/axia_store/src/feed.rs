use std::time::Duration;

use async_trait::async_trait;
use sea_orm::ConnectionTrait;
use sea_orm::sea_query::{Expr, Order, Query};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::AxiaStore;
use crate::db::*;
use aideon_axia_core::{
    AxiaError, AxiaResult, ChangeFeedApi, ChangeFeedEntry, ChangeOperation, PartitionId,
    Timestamp, ValueChangeEvent,
};

const SUBSCRIPTION_POLL_INTERVAL_MS: u64 = 250;
const SUBSCRIPTION_POLL_LIMIT: u32 = 250;

impl AxiaStore {
    /// Appends `event` to the feed inside the writer's transaction, so the feed never records
    /// a change that was rolled back. Sequences come from the table's identity column: they
    /// increase within a partition but are not contiguous.
    pub(crate) async fn append_change<C: ConnectionTrait>(
        &self,
        conn: &C,
        event: &ValueChangeEvent,
    ) -> AxiaResult<()> {
        let insert = Query::insert()
            .into_table(AxiaChangeFeed::Table)
            .columns([
                AxiaChangeFeed::PartitionId,
                AxiaChangeFeed::Operation,
                AxiaChangeFeed::OwnerEntityId,
                AxiaChangeFeed::AttributeId,
                AxiaChangeFeed::ValueId,
                AxiaChangeFeed::PreviousValueId,
                AxiaChangeFeed::EmittedAt,
            ])
            .values_panic([
                id_value(self.backend, event.partition.0).into(),
                event.operation.as_i16().into(),
                id_value(self.backend, event.owner_entity_id).into(),
                id_value(self.backend, event.attribute_id).into(),
                id_value(self.backend, event.value_id).into(),
                opt_id_value(self.backend, event.previous_value_id).into(),
                event.timestamp.as_micros().into(),
            ])
            .to_owned();
        exec(conn, &insert).await?;
        Ok(())
    }
}

#[async_trait]
impl ChangeFeedApi for AxiaStore {
    async fn get_changes_since(
        &self,
        partition: PartitionId,
        from_sequence: Option<i64>,
        limit: u32,
    ) -> AxiaResult<Vec<ChangeFeedEntry>> {
        let mut select = Query::select()
            .from(AxiaChangeFeed::Table)
            .columns([
                AxiaChangeFeed::Sequence,
                AxiaChangeFeed::Operation,
                AxiaChangeFeed::OwnerEntityId,
                AxiaChangeFeed::AttributeId,
                AxiaChangeFeed::ValueId,
                AxiaChangeFeed::PreviousValueId,
                AxiaChangeFeed::EmittedAt,
            ])
            .and_where(Expr::col(AxiaChangeFeed::PartitionId).eq(id_value(self.backend, partition.0)))
            .order_by(AxiaChangeFeed::Sequence, Order::Asc)
            .limit(u64::from(limit.min(self.limits.max_page_size)))
            .to_owned();
        if let Some(from_sequence) = from_sequence {
            select.and_where(Expr::col(AxiaChangeFeed::Sequence).gt(from_sequence));
        }
        let rows = query_all(&self.conn, &select).await?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let sequence: i64 = row.try_get("", &col_name(AxiaChangeFeed::Sequence))?;
            let raw_operation: i16 = row.try_get("", &col_name(AxiaChangeFeed::Operation))?;
            let operation = ChangeOperation::from_i16(raw_operation).ok_or_else(|| {
                AxiaError::storage(format!("unknown change operation {raw_operation}"))
            })?;
            let emitted_at: i64 = row.try_get("", &col_name(AxiaChangeFeed::EmittedAt))?;
            entries.push(ChangeFeedEntry {
                sequence,
                event: ValueChangeEvent {
                    partition,
                    operation,
                    owner_entity_id: read_id(&row, AxiaChangeFeed::OwnerEntityId)?,
                    attribute_id: read_id(&row, AxiaChangeFeed::AttributeId)?,
                    value_id: read_id(&row, AxiaChangeFeed::ValueId)?,
                    previous_value_id: read_opt_id(&row, AxiaChangeFeed::PreviousValueId)?,
                    timestamp: Timestamp(emitted_at),
                },
            });
        }
        Ok(entries)
    }

    async fn subscribe(
        &self,
        partition: PartitionId,
        from_sequence: Option<i64>,
    ) -> AxiaResult<mpsc::Receiver<ChangeFeedEntry>> {
        let (tx, rx) = mpsc::channel(256);
        let mut cursor = from_sequence;
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                if tx.is_closed() {
                    break;
                }
                let changes = match store
                    .get_changes_since(partition, cursor, SUBSCRIPTION_POLL_LIMIT)
                    .await
                {
                    Ok(changes) => changes,
                    Err(err) => {
                        log::warn!("change feed poll failed: {err}");
                        Vec::new()
                    }
                };
                if changes.is_empty() {
                    sleep(Duration::from_millis(SUBSCRIPTION_POLL_INTERVAL_MS)).await;
                    continue;
                }
                cursor = changes.last().map(|entry| entry.sequence).or(cursor);
                for change in changes {
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}
