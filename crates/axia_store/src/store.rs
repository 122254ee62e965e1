use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Alias, Expr, Order, Query, SelectStatement, SimpleExpr};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, QueryResult,
    TransactionTrait, TryGetable,
};
use sea_orm_migration::MigratorTrait;
use serde_json::Value as JsonValue;
use tokio::time::sleep;

use crate::config::{AxiaLimits, RetryPolicy};
use crate::db::*;
use crate::migration::Migrator;
use crate::{AxiaConfig, ReferenceDeletePolicy};
use aideon_axia_core::{
    ActorId, AxiaError, AxiaResult, ChainHead, ChangeKind, ChangeNotifier, ChangeOperation,
    DataType, FieldError, HistoryInput, HistoryPage, Id, ListValuesInput, MetadataProvider,
    NewValue, NoopNotifier, OrderField, OwnerEntityProvider, PartitionId, SortDirection,
    Timestamp, TypedValue, ValidationMode, ValueChangeEvent, ValuePage, ValuePair, ValueRecord,
    ValueSlot, ValueStoreApi, WriteOutcome, WritePlan, check_predicates, decode_history_cursor,
    encode_history_cursor, plan_write, record_matches,
};

/// External collaborators the store consults; none of them take part in its transactions.
#[derive(Clone)]
pub struct Collaborators {
    pub metadata: Arc<dyn MetadataProvider>,
    pub owners: Arc<dyn OwnerEntityProvider>,
    pub notifier: Arc<dyn ChangeNotifier>,
}

impl Collaborators {
    pub fn new(metadata: Arc<dyn MetadataProvider>, owners: Arc<dyn OwnerEntityProvider>) -> Self {
        Self {
            metadata,
            owners,
            notifier: Arc::new(NoopNotifier),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

#[derive(Clone)]
pub struct AxiaStore {
    pub(crate) conn: DatabaseConnection,
    pub(crate) backend: DatabaseBackend,
    pub(crate) limits: AxiaLimits,
    retry: RetryPolicy,
    pub(crate) validation_mode: ValidationMode,
    pub(crate) delete_policy: ReferenceDeletePolicy,
    failpoints: HashSet<String>,
    pub(crate) collaborators: Collaborators,
}

#[derive(Clone, Copy, Debug)]
pub struct BackendCapabilities {
    pub transactional_ddl: bool,
    pub partial_indexes: bool,
    pub json_types: bool,
}

/// Result of one optimistic attempt. `LostRace` is retried; `Rejected` is final.
pub(crate) enum Attempt<T> {
    Committed(T),
    LostRace,
    Rejected(AxiaError),
}

pub(crate) struct Applied {
    pub outcome: WriteOutcome,
    pub event: Option<ValueChangeEvent>,
}

const VALUE_COLUMNS: [AxiaValues; 28] = [
    AxiaValues::PartitionId,
    AxiaValues::ValueId,
    AxiaValues::OwnerEntityId,
    AxiaValues::AttributeId,
    AxiaValues::AssignmentId,
    AxiaValues::DataType,
    AxiaValues::ValueString,
    AxiaValues::ValueInteger,
    AxiaValues::ValueDecimal,
    AxiaValues::ValueBoolean,
    AxiaValues::ValueDate,
    AxiaValues::ValueDatetime,
    AxiaValues::ValueDocument,
    AxiaValues::ValueReference,
    AxiaValues::ReferenceCleared,
    AxiaValues::IsValid,
    AxiaValues::ValidationErrors,
    AxiaValues::Version,
    AxiaValues::IsCurrent,
    AxiaValues::EffectiveFrom,
    AxiaValues::EffectiveTo,
    AxiaValues::SupersededBy,
    AxiaValues::ValueHash,
    AxiaValues::IsActive,
    AxiaValues::CreatedAt,
    AxiaValues::UpdatedAt,
    AxiaValues::CreatedBy,
    AxiaValues::UpdatedBy,
];

impl AxiaStore {
    pub async fn connect(
        config: &AxiaConfig,
        base_dir: &Path,
        collaborators: Collaborators,
    ) -> AxiaResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await.map_err(AxiaError::from)?;
        let backend = conn.get_database_backend();
        let failpoints = config
            .failpoints
            .clone()
            .unwrap_or_default()
            .into_iter()
            .collect::<HashSet<_>>();
        let store = Self {
            conn,
            backend,
            limits: AxiaLimits::from_config(config),
            retry: RetryPolicy::from_config(config),
            validation_mode: config.validation_mode.unwrap_or_default(),
            delete_policy: config.reference_delete_policy.unwrap_or_default(),
            failpoints,
            collaborators,
        };
        Migrator::up(&store.conn, None)
            .await
            .map_err(AxiaError::from)?;
        log::debug!(
            "axia store connected ({}, validation mode {:?})",
            config.backend_name(),
            store.validation_mode
        );
        Ok(store)
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn validation_mode(&self) -> ValidationMode {
        self.validation_mode
    }

    pub fn reference_delete_policy(&self) -> ReferenceDeletePolicy {
        self.delete_policy
    }

    pub fn capabilities(&self) -> BackendCapabilities {
        match self.backend {
            DatabaseBackend::Sqlite => BackendCapabilities {
                transactional_ddl: false,
                partial_indexes: true,
                json_types: false,
            },
            DatabaseBackend::Postgres => BackendCapabilities {
                transactional_ddl: true,
                partial_indexes: true,
                json_types: true,
            },
            DatabaseBackend::MySql => BackendCapabilities {
                transactional_ddl: false,
                partial_indexes: false,
                json_types: true,
            },
        }
    }

    pub(crate) fn maybe_failpoint(&self, key: &str) -> AxiaResult<()> {
        if self.failpoints.contains(key) {
            Err(AxiaError::storage(format!("failpoint {key}")))
        } else {
            Ok(())
        }
    }

    pub(crate) fn publish(&self, events: &[ValueChangeEvent]) {
        for event in events {
            self.collaborators.notifier.notify(event);
        }
    }

    /// Runs `attempt` until it commits, is rejected, or the conflict budget is spent.
    /// Conflicts raised by the database (unique violations, lock contention) count as lost races.
    pub(crate) async fn retrying<T, F, Fut>(&self, label: &str, mut attempt: F) -> AxiaResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AxiaResult<Attempt<T>>>,
    {
        let mut retries = 0;
        loop {
            let reason = match attempt().await {
                Ok(Attempt::Committed(value)) => return Ok(value),
                Ok(Attempt::Rejected(err)) => return Err(err),
                Ok(Attempt::LostRace) => "stale chain head".to_string(),
                Err(err) if err.is_conflict() => err.to_string(),
                Err(err) => return Err(err),
            };
            if retries >= self.retry.max_retries {
                return Err(AxiaError::conflict(format!(
                    "{label} lost {} concurrent write races: {reason}",
                    retries + 1
                )));
            }
            retries += 1;
            log::warn!("{label}: retrying after conflict ({retries}): {reason}");
            sleep(self.retry.delay(retries)).await;
        }
    }

    pub(crate) async fn fetch_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        partition: PartitionId,
        value_id: Id,
    ) -> AxiaResult<Option<ValueRecord>> {
        let select = self
            .value_select(partition)
            .and_where(Expr::col(AxiaValues::ValueId).eq(id_value(self.backend, value_id)))
            .limit(1)
            .to_owned();
        query_one(conn, &select)
            .await?
            .map(|row| read_record(&row))
            .transpose()
    }

    /// Reads the chain head and the row it points at. The head is the compare-and-set anchor
    /// for every write to the pair.
    pub(crate) async fn load_head<C: ConnectionTrait>(
        &self,
        conn: &C,
        pair: ValuePair,
    ) -> AxiaResult<ChainHead> {
        let select = Query::select()
            .from(AxiaValueHeads::Table)
            .columns([AxiaValueHeads::CurrentValueId, AxiaValueHeads::LastVersion])
            .and_where(self.head_key(pair))
            .limit(1)
            .to_owned();
        let Some(row) = query_one(conn, &select).await? else {
            return Ok(ChainHead::default());
        };
        let current_id = read_opt_id(&row, AxiaValueHeads::CurrentValueId)?;
        let last_version: i64 = get(&row, AxiaValueHeads::LastVersion)?;
        let current = match current_id {
            Some(value_id) => {
                let record = self
                    .fetch_record(conn, pair.partition, value_id)
                    .await?
                    .ok_or_else(|| {
                        AxiaError::storage(format!("chain head points at missing value {value_id}"))
                    })?;
                if !(record.is_current && record.is_active) {
                    return Err(AxiaError::storage(format!(
                        "chain head points at non-current value {value_id}"
                    )));
                }
                Some(record)
            }
            None => None,
        };
        Ok(ChainHead {
            current,
            last_version,
        })
    }

    /// Executes a version plan inside `conn`. `Ok(None)` means another writer moved the
    /// chain head first and the caller must re-plan.
    pub(crate) async fn apply_plan<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidate: NewValue,
        plan: WritePlan,
    ) -> AxiaResult<Option<Applied>> {
        let pair = candidate.pair();
        let actor = candidate.actor;
        match plan {
            WritePlan::Unchanged(record) => {
                log::debug!(
                    "value {} unchanged for attribute {}",
                    record.value_id,
                    record.attribute_id
                );
                Ok(Some(Applied {
                    outcome: WriteOutcome {
                        value: record,
                        change: ChangeKind::NoOp,
                    },
                    event: None,
                }))
            }
            WritePlan::Insert { version } => {
                let now = Timestamp::now();
                let record = candidate.into_record(version, now);
                if !self
                    .claim_head(conn, pair, version - 1, record.value_id, version, now)
                    .await?
                {
                    return Ok(None);
                }
                self.insert_record(conn, &record).await?;
                let event = change_event(&record, ChangeOperation::Created, None);
                self.append_change(conn, &event).await?;
                log::debug!(
                    "created value {} version {} for attribute {}",
                    record.value_id,
                    record.version,
                    record.attribute_id
                );
                Ok(Some(Applied {
                    outcome: WriteOutcome {
                        value: record,
                        change: ChangeKind::InitialVersion,
                    },
                    event: Some(event),
                }))
            }
            WritePlan::Supersede { previous, version } => {
                let now = Timestamp::now_at_least(previous.effective_from);
                let record = candidate.into_record(version, now);
                if !self
                    .advance_head(conn, pair, previous.value_id, record.value_id, version, now)
                    .await?
                {
                    return Ok(None);
                }
                if !self
                    .demote_record(conn, &previous, record.value_id, now, actor)
                    .await?
                {
                    return Ok(None);
                }
                self.insert_record(conn, &record).await?;
                let event = change_event(
                    &record,
                    ChangeOperation::Superseded,
                    Some(previous.value_id),
                );
                self.append_change(conn, &event).await?;
                log::debug!(
                    "superseded value {} with {} (version {})",
                    previous.value_id,
                    record.value_id,
                    record.version
                );
                Ok(Some(Applied {
                    outcome: WriteOutcome {
                        value: record,
                        change: ChangeKind::NewVersion,
                    },
                    event: Some(event),
                }))
            }
        }
    }

    /// Plans and applies every candidate against its own chain inside one transaction scope.
    pub(crate) async fn apply_batch<C: ConnectionTrait>(
        &self,
        conn: &C,
        candidates: &[NewValue],
    ) -> AxiaResult<Option<Vec<Applied>>> {
        let mut applied = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let head = self.load_head(conn, candidate.pair()).await?;
            let plan = plan_write(&head, candidate);
            match self.apply_plan(conn, candidate.clone(), plan).await? {
                Some(item) => applied.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(applied))
    }

    /// Soft-deletes the current row of a chain inside `conn` and releases the chain head.
    pub(crate) async fn soft_delete_in<C: ConnectionTrait>(
        &self,
        conn: &C,
        partition: PartitionId,
        actor: ActorId,
        value_id: Id,
    ) -> AxiaResult<Attempt<(ValueRecord, Option<ValueChangeEvent>)>> {
        let Some(mut record) = self.fetch_record(conn, partition, value_id).await? else {
            return Ok(Attempt::Rejected(AxiaError::not_found(format!(
                "value {value_id} not found"
            ))));
        };
        if !record.is_active {
            return Ok(Attempt::Committed((record, None)));
        }
        // Soft-deleted rows keep `is_current`, so only superseded history lands here.
        if !record.is_current {
            return Ok(Attempt::Rejected(AxiaError::invalid(format!(
                "value {value_id} is superseded history and cannot be deleted"
            ))));
        }
        let now = Timestamp::now_at_least(record.effective_from);
        if !self.release_head(conn, record.pair(), value_id, now).await? {
            return Ok(Attempt::LostRace);
        }
        let update = Query::update()
            .table(AxiaValues::Table)
            .values([
                (AxiaValues::IsActive, false.into()),
                (AxiaValues::UpdatedAt, now.as_micros().into()),
                (AxiaValues::UpdatedBy, id_value(self.backend, actor.0).into()),
            ])
            .and_where(self.value_key(partition, value_id))
            .and_where(Expr::col(AxiaValues::IsActive).eq(true))
            .to_owned();
        if exec_count(conn, &update).await? != 1 {
            return Ok(Attempt::LostRace);
        }
        record.is_active = false;
        record.updated_at = now;
        record.updated_by = actor;
        let event = ValueChangeEvent {
            partition,
            operation: ChangeOperation::Deleted,
            owner_entity_id: record.owner_entity_id,
            attribute_id: record.attribute_id,
            value_id,
            previous_value_id: None,
            timestamp: now,
        };
        self.append_change(conn, &event).await?;
        log::debug!("soft-deleted value {value_id}");
        Ok(Attempt::Committed((record, Some(event))))
    }

    /// Current, active rows whose reference slot points at `entity_id`.
    pub(crate) async fn current_references_to<C: ConnectionTrait>(
        &self,
        conn: &C,
        partition: PartitionId,
        entity_id: Id,
    ) -> AxiaResult<Vec<ValueRecord>> {
        let select = self
            .value_select(partition)
            .and_where(Expr::col(AxiaValues::ValueReference).eq(id_value(self.backend, entity_id)))
            .and_where(Expr::col(AxiaValues::IsCurrent).eq(true))
            .and_where(Expr::col(AxiaValues::IsActive).eq(true))
            .order_by(AxiaValues::CreatedAt, Order::Asc)
            .to_owned();
        query_all(conn, &select)
            .await?
            .iter()
            .map(read_record)
            .collect()
    }

    fn value_select(&self, partition: PartitionId) -> SelectStatement {
        Query::select()
            .from(AxiaValues::Table)
            .columns(VALUE_COLUMNS)
            .and_where(Expr::col(AxiaValues::PartitionId).eq(id_value(self.backend, partition.0)))
            .to_owned()
    }

    fn value_key(&self, partition: PartitionId, value_id: Id) -> SimpleExpr {
        Expr::col(AxiaValues::PartitionId)
            .eq(id_value(self.backend, partition.0))
            .and(Expr::col(AxiaValues::ValueId).eq(id_value(self.backend, value_id)))
    }

    fn head_key(&self, pair: ValuePair) -> SimpleExpr {
        Expr::col(AxiaValueHeads::PartitionId)
            .eq(id_value(self.backend, pair.partition.0))
            .and(
                Expr::col(AxiaValueHeads::OwnerEntityId)
                    .eq(id_value(self.backend, pair.owner_entity_id)),
            )
            .and(Expr::col(AxiaValueHeads::AttributeId).eq(id_value(self.backend, pair.attribute_id)))
    }

    async fn claim_head<C: ConnectionTrait>(
        &self,
        conn: &C,
        pair: ValuePair,
        expected_last: i64,
        value_id: Id,
        version: i64,
        now: Timestamp,
    ) -> AxiaResult<bool> {
        if expected_last == 0 {
            // A concurrent first write for the pair fails on the primary key.
            let insert = Query::insert()
                .into_table(AxiaValueHeads::Table)
                .columns([
                    AxiaValueHeads::PartitionId,
                    AxiaValueHeads::OwnerEntityId,
                    AxiaValueHeads::AttributeId,
                    AxiaValueHeads::CurrentValueId,
                    AxiaValueHeads::LastVersion,
                    AxiaValueHeads::UpdatedAt,
                ])
                .values_panic([
                    id_value(self.backend, pair.partition.0).into(),
                    id_value(self.backend, pair.owner_entity_id).into(),
                    id_value(self.backend, pair.attribute_id).into(),
                    id_value(self.backend, value_id).into(),
                    version.into(),
                    now.as_micros().into(),
                ])
                .to_owned();
            exec(conn, &insert).await?;
            return Ok(true);
        }
        let update = Query::update()
            .table(AxiaValueHeads::Table)
            .values([
                (
                    AxiaValueHeads::CurrentValueId,
                    id_value(self.backend, value_id).into(),
                ),
                (AxiaValueHeads::LastVersion, version.into()),
                (AxiaValueHeads::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(self.head_key(pair))
            .and_where(Expr::col(AxiaValueHeads::CurrentValueId).is_null())
            .and_where(Expr::col(AxiaValueHeads::LastVersion).eq(expected_last))
            .to_owned();
        Ok(exec_count(conn, &update).await? == 1)
    }

    async fn advance_head<C: ConnectionTrait>(
        &self,
        conn: &C,
        pair: ValuePair,
        previous: Id,
        value_id: Id,
        version: i64,
        now: Timestamp,
    ) -> AxiaResult<bool> {
        let update = Query::update()
            .table(AxiaValueHeads::Table)
            .values([
                (
                    AxiaValueHeads::CurrentValueId,
                    id_value(self.backend, value_id).into(),
                ),
                (AxiaValueHeads::LastVersion, version.into()),
                (AxiaValueHeads::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(self.head_key(pair))
            .and_where(Expr::col(AxiaValueHeads::CurrentValueId).eq(id_value(self.backend, previous)))
            .to_owned();
        Ok(exec_count(conn, &update).await? == 1)
    }

    async fn release_head<C: ConnectionTrait>(
        &self,
        conn: &C,
        pair: ValuePair,
        value_id: Id,
        now: Timestamp,
    ) -> AxiaResult<bool> {
        let update = Query::update()
            .table(AxiaValueHeads::Table)
            .values([
                (
                    AxiaValueHeads::CurrentValueId,
                    none_id_value(self.backend).into(),
                ),
                (AxiaValueHeads::UpdatedAt, now.as_micros().into()),
            ])
            .and_where(self.head_key(pair))
            .and_where(Expr::col(AxiaValueHeads::CurrentValueId).eq(id_value(self.backend, value_id)))
            .to_owned();
        Ok(exec_count(conn, &update).await? == 1)
    }

    /// Closes the replaced row: `is_current`, `effective_to` and `superseded_by` change together.
    async fn demote_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        previous: &ValueRecord,
        successor: Id,
        now: Timestamp,
        actor: ActorId,
    ) -> AxiaResult<bool> {
        let update = Query::update()
            .table(AxiaValues::Table)
            .values([
                (AxiaValues::IsCurrent, false.into()),
                (AxiaValues::EffectiveTo, now.as_micros().into()),
                (
                    AxiaValues::SupersededBy,
                    id_value(self.backend, successor).into(),
                ),
                (AxiaValues::UpdatedAt, now.as_micros().into()),
                (AxiaValues::UpdatedBy, id_value(self.backend, actor.0).into()),
            ])
            .and_where(self.value_key(previous.partition, previous.value_id))
            .and_where(Expr::col(AxiaValues::IsCurrent).eq(true))
            .and_where(Expr::col(AxiaValues::IsActive).eq(true))
            .to_owned();
        Ok(exec_count(conn, &update).await? == 1)
    }

    async fn insert_record<C: ConnectionTrait>(
        &self,
        conn: &C,
        record: &ValueRecord,
    ) -> AxiaResult<()> {
        let insert = Query::insert()
            .into_table(AxiaValues::Table)
            .columns(VALUE_COLUMNS)
            .values_panic(record_values(self.backend, record)?)
            .to_owned();
        exec(conn, &insert).await
    }

    async fn list_page(&self, input: ListValuesInput) -> AxiaResult<ValuePage> {
        if input.limit == 0 {
            return Err(AxiaError::invalid("limit must be positive"));
        }
        check_predicates(&input.filter.predicates)?;
        let limit = input.limit.min(self.limits.max_page_size);
        let filter = &input.filter;
        let mut select = self.value_select(input.partition);
        if let Some(owner) = filter.owner_entity_id {
            select.and_where(Expr::col(AxiaValues::OwnerEntityId).eq(id_value(self.backend, owner)));
        }
        if let Some(attribute) = filter.attribute_id {
            select.and_where(Expr::col(AxiaValues::AttributeId).eq(id_value(self.backend, attribute)));
        }
        if let Some(data_type) = filter.data_type {
            select.and_where(Expr::col(AxiaValues::DataType).eq(data_type.as_i16()));
        }
        if let Some(is_valid) = filter.is_valid {
            select.and_where(Expr::col(AxiaValues::IsValid).eq(is_valid));
        }
        if filter.current_only {
            select.and_where(Expr::col(AxiaValues::IsCurrent).eq(true));
        }
        if !filter.include_inactive {
            select.and_where(Expr::col(AxiaValues::IsActive).eq(true));
        }

        if filter.predicates.is_empty() {
            let mut count = select.clone();
            count.clear_selects();
            count.expr_as(Expr::col(AxiaValues::ValueId).count(), Alias::new("total"));
            let total: i64 = match query_one(&self.conn, &count).await? {
                Some(row) => row.try_get("", "total")?,
                None => 0,
            };
            order_values(&mut select, input.ordering.field, input.ordering.direction);
            select.limit(u64::from(limit)).offset(input.offset);
            let items = query_all(&self.conn, &select)
                .await?
                .iter()
                .map(read_record)
                .collect::<AxiaResult<Vec<_>>>()?;
            return Ok(ValuePage {
                items,
                total_count: total.max(0) as u64,
            });
        }

        // Typed predicates are evaluated over parsed slots, then paged in memory.
        order_values(&mut select, input.ordering.field, input.ordering.direction);
        let max_scan_rows = self.limits.max_scan_rows;
        select.limit(u64::try_from(max_scan_rows).unwrap_or(u64::MAX).saturating_add(1));
        let rows = query_all(&self.conn, &select).await?;
        if rows.len() > max_scan_rows {
            return Err(AxiaError::invalid(format!(
                "predicate query would scan more than {max_scan_rows} rows; narrow the filter"
            )));
        }
        let mut matched = Vec::new();
        for row in rows {
            let record = read_record(&row)?;
            if record_matches(&record, &filter.predicates) {
                matched.push(record);
            }
        }
        let total_count = matched.len() as u64;
        let offset = usize::try_from(input.offset).unwrap_or(usize::MAX);
        let items = matched
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .collect();
        Ok(ValuePage { items, total_count })
    }
}

#[async_trait]
impl ValueStoreApi for AxiaStore {
    async fn create(&self, value: NewValue) -> AxiaResult<ValueRecord> {
        let pair = value.pair();
        let tx = self.conn.begin().await?;
        let head = self.load_head(&tx, pair).await?;
        if let Some(current) = &head.current {
            return Err(AxiaError::conflict(format!(
                "value {} is already current for owner {} attribute {}",
                current.value_id, pair.owner_entity_id, pair.attribute_id
            )));
        }
        let plan = WritePlan::Insert {
            version: head.last_version + 1,
        };
        let applied = self
            .apply_plan(&tx, value, plan)
            .await?
            .ok_or_else(|| AxiaError::conflict("chain head moved during create"))?;
        self.maybe_failpoint("value_store.create")?;
        tx.commit().await?;
        self.publish(applied.event.as_slice());
        Ok(applied.outcome.value)
    }

    async fn create_with_supersede(
        &self,
        value: NewValue,
        previous_value_id: Id,
    ) -> AxiaResult<ValueRecord> {
        let pair = value.pair();
        let tx = self.conn.begin().await?;
        let head = self.load_head(&tx, pair).await?;
        let Some(current) = head
            .current
            .filter(|current| current.value_id == previous_value_id)
        else {
            return Err(AxiaError::conflict(format!(
                "value {previous_value_id} is no longer current"
            )));
        };
        if current.data_type != value.slot.data_type() {
            return Err(AxiaError::invalid(format!(
                "cannot supersede a {} value with a {} value",
                current.data_type.as_str(),
                value.slot.data_type().as_str()
            )));
        }
        let version = head.last_version.max(current.version) + 1;
        let plan = WritePlan::Supersede {
            previous: current,
            version,
        };
        let applied = self
            .apply_plan(&tx, value, plan)
            .await?
            .ok_or_else(|| {
                AxiaError::conflict(format!("value {previous_value_id} is no longer current"))
            })?;
        self.maybe_failpoint("value_store.supersede")?;
        tx.commit().await?;
        self.publish(applied.event.as_slice());
        Ok(applied.outcome.value)
    }

    async fn get_current(&self, pair: ValuePair) -> AxiaResult<Option<ValueRecord>> {
        let select = self
            .value_select(pair.partition)
            .and_where(
                Expr::col(AxiaValues::OwnerEntityId)
                    .eq(id_value(self.backend, pair.owner_entity_id)),
            )
            .and_where(Expr::col(AxiaValues::AttributeId).eq(id_value(self.backend, pair.attribute_id)))
            .and_where(Expr::col(AxiaValues::IsCurrent).eq(true))
            .and_where(Expr::col(AxiaValues::IsActive).eq(true))
            .limit(1)
            .to_owned();
        query_one(&self.conn, &select)
            .await?
            .map(|row| read_record(&row))
            .transpose()
    }

    async fn get_history(&self, input: HistoryInput) -> AxiaResult<HistoryPage> {
        if input.limit == 0 {
            return Err(AxiaError::invalid("limit must be positive"));
        }
        let limit = input.limit.min(self.limits.max_page_size);
        let pair = input.pair;
        let mut select = self
            .value_select(pair.partition)
            .and_where(
                Expr::col(AxiaValues::OwnerEntityId)
                    .eq(id_value(self.backend, pair.owner_entity_id)),
            )
            .and_where(Expr::col(AxiaValues::AttributeId).eq(id_value(self.backend, pair.attribute_id)))
            .order_by(AxiaValues::Version, Order::Desc)
            .limit(u64::from(limit) + 1)
            .to_owned();
        if let Some(cursor) = input.cursor.as_deref() {
            let before = decode_history_cursor(cursor)?;
            select.and_where(Expr::col(AxiaValues::Version).lt(before));
        }
        let mut items = query_all(&self.conn, &select)
            .await?
            .iter()
            .map(read_record)
            .collect::<AxiaResult<Vec<_>>>()?;
        let next_cursor = if items.len() > limit as usize {
            items.truncate(limit as usize);
            match items.last() {
                Some(last) => Some(encode_history_cursor(last.version)?),
                None => None,
            }
        } else {
            None
        };
        Ok(HistoryPage { items, next_cursor })
    }

    async fn get_by_id(
        &self,
        partition: PartitionId,
        value_id: Id,
    ) -> AxiaResult<Option<ValueRecord>> {
        self.fetch_record(&self.conn, partition, value_id).await
    }

    async fn list(&self, input: ListValuesInput) -> AxiaResult<ValuePage> {
        self.list_page(input).await
    }

    async fn bulk_create_or_update(
        &self,
        values: Vec<NewValue>,
    ) -> AxiaResult<Vec<WriteOutcome>> {
        if values.len() > self.limits.max_bulk_items {
            return Err(AxiaError::invalid(format!(
                "bulk write of {} items exceeds limit {}",
                values.len(),
                self.limits.max_bulk_items
            )));
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = values.iter().find(|value| !seen.insert(value.pair())) {
            return Err(AxiaError::invalid(format!(
                "attribute {} appears more than once for owner {}",
                duplicate.attribute_id, duplicate.owner_entity_id
            )));
        }
        let values = &values;
        self.retrying("bulk write", || async move {
            let tx = self.conn.begin().await?;
            let Some(applied) = self.apply_batch(&tx, values).await? else {
                return Ok(Attempt::LostRace);
            };
            self.maybe_failpoint("value_store.bulk")?;
            tx.commit().await?;
            let events = applied
                .iter()
                .filter_map(|item| item.event.clone())
                .collect::<Vec<_>>();
            self.publish(&events);
            Ok(Attempt::Committed(
                applied.into_iter().map(|item| item.outcome).collect(),
            ))
        })
        .await
    }

    async fn soft_delete(
        &self,
        partition: PartitionId,
        actor: ActorId,
        value_id: Id,
    ) -> AxiaResult<ValueRecord> {
        self.retrying("soft delete", || async move {
            let tx = self.conn.begin().await?;
            let (record, event) = match self.soft_delete_in(&tx, partition, actor, value_id).await? {
                Attempt::Committed(deleted) => deleted,
                Attempt::LostRace => return Ok(Attempt::LostRace),
                Attempt::Rejected(err) => return Ok(Attempt::Rejected(err)),
            };
            self.maybe_failpoint("value_store.soft_delete")?;
            tx.commit().await?;
            self.publish(event.as_slice());
            Ok(Attempt::Committed(record))
        })
        .await
    }
}

pub(crate) fn change_event(
    record: &ValueRecord,
    operation: ChangeOperation,
    previous_value_id: Option<Id>,
) -> ValueChangeEvent {
    ValueChangeEvent {
        partition: record.partition,
        operation,
        owner_entity_id: record.owner_entity_id,
        attribute_id: record.attribute_id,
        value_id: record.value_id,
        previous_value_id,
        timestamp: record.created_at,
    }
}

fn order_values(select: &mut SelectStatement, field: OrderField, direction: SortDirection) {
    let order = match direction {
        SortDirection::Asc => Order::Asc,
        SortDirection::Desc => Order::Desc,
    };
    let column = match field {
        OrderField::CreatedAt => AxiaValues::CreatedAt,
        OrderField::Version => AxiaValues::Version,
        OrderField::EffectiveFrom => AxiaValues::EffectiveFrom,
    };
    select
        .order_by(column, order.clone())
        .order_by(AxiaValues::Version, order)
        .order_by(AxiaValues::ValueId, Order::Asc);
}

fn get<T: TryGetable>(row: &QueryResult, column: impl sea_orm::sea_query::Iden) -> AxiaResult<T> {
    Ok(row.try_get("", &col_name(column))?)
}

/// One nullable column per data type; at most one is ever non-null.
#[derive(Default)]
struct SlotColumns {
    string: Option<String>,
    integer: Option<i64>,
    decimal: Option<String>,
    boolean: Option<bool>,
    date: Option<String>,
    datetime: Option<String>,
    document: Option<String>,
    reference: Option<Id>,
}

impl SlotColumns {
    fn from_slot(slot: &ValueSlot) -> AxiaResult<Self> {
        let Some(value) = slot.value() else {
            return Ok(Self::default());
        };
        let text = || value.to_raw().as_str().map(str::to_string);
        let columns = match value {
            TypedValue::String(text) => Self {
                string: Some(text.clone()),
                ..Self::default()
            },
            TypedValue::Integer(number) => Self {
                integer: Some(*number),
                ..Self::default()
            },
            TypedValue::Decimal(_) => Self {
                decimal: text(),
                ..Self::default()
            },
            TypedValue::Boolean(flag) => Self {
                boolean: Some(*flag),
                ..Self::default()
            },
            TypedValue::Date(_) => Self {
                date: text(),
                ..Self::default()
            },
            TypedValue::DateTime(_) => Self {
                datetime: text(),
                ..Self::default()
            },
            TypedValue::Document(doc) => Self {
                document: Some(
                    serde_json::to_string(doc)
                        .map_err(|err| AxiaError::storage(format!("encode document: {err}")))?,
                ),
                ..Self::default()
            },
            TypedValue::Reference(id) => Self {
                reference: Some(*id),
                ..Self::default()
            },
        };
        Ok(columns)
    }

    fn read(row: &QueryResult) -> AxiaResult<Self> {
        Ok(Self {
            string: get(row, AxiaValues::ValueString)?,
            integer: get(row, AxiaValues::ValueInteger)?,
            decimal: get(row, AxiaValues::ValueDecimal)?,
            boolean: get(row, AxiaValues::ValueBoolean)?,
            date: get(row, AxiaValues::ValueDate)?,
            datetime: get(row, AxiaValues::ValueDatetime)?,
            document: get(row, AxiaValues::ValueDocument)?,
            reference: read_opt_id(row, AxiaValues::ValueReference)?,
        })
    }

    fn populated(&self) -> usize {
        [
            self.string.is_some(),
            self.integer.is_some(),
            self.decimal.is_some(),
            self.boolean.is_some(),
            self.date.is_some(),
            self.datetime.is_some(),
            self.document.is_some(),
            self.reference.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count()
    }

    /// Rebuilds the typed slot, refusing rows that break the one-slot rule.
    fn into_slot(self, data_type: DataType, cleared: bool) -> AxiaResult<ValueSlot> {
        let populated = self.populated();
        if cleared {
            if data_type == DataType::Reference && populated == 0 {
                return Ok(ValueSlot::ClearedReference);
            }
            return Err(AxiaError::storage("cleared reference row carries a value"));
        }
        if populated != 1 {
            return Err(AxiaError::storage(format!(
                "{} row has {populated} populated slots",
                data_type.as_str()
            )));
        }
        let missing = || {
            AxiaError::storage(format!(
                "{} row populates the wrong slot",
                data_type.as_str()
            ))
        };
        let parse_text = |text: Option<String>| -> AxiaResult<TypedValue> {
            let text = text.ok_or_else(missing)?;
            data_type
                .parse_raw(&JsonValue::String(text))
                .map_err(AxiaError::storage)
        };
        let value = match data_type {
            DataType::String => TypedValue::String(self.string.ok_or_else(missing)?),
            DataType::Integer => TypedValue::Integer(self.integer.ok_or_else(missing)?),
            DataType::Decimal => parse_text(self.decimal)?,
            DataType::Boolean => TypedValue::Boolean(self.boolean.ok_or_else(missing)?),
            DataType::Date => parse_text(self.date)?,
            DataType::DateTime => parse_text(self.datetime)?,
            DataType::Document => {
                let raw = self.document.ok_or_else(missing)?;
                TypedValue::Document(
                    serde_json::from_str(&raw)
                        .map_err(|err| AxiaError::storage(format!("decode document: {err}")))?,
                )
            }
            DataType::Reference => TypedValue::Reference(self.reference.ok_or_else(missing)?),
        };
        Ok(ValueSlot::set(value))
    }
}

fn record_values(backend: DatabaseBackend, record: &ValueRecord) -> AxiaResult<Vec<SimpleExpr>> {
    let slot = SlotColumns::from_slot(&record.slot)?;
    let errors = serde_json::to_string(&record.validation_errors)
        .map_err(|err| AxiaError::storage(format!("encode validation errors: {err}")))?;
    Ok(vec![
        id_value(backend, record.partition.0).into(),
        id_value(backend, record.value_id).into(),
        id_value(backend, record.owner_entity_id).into(),
        id_value(backend, record.attribute_id).into(),
        id_value(backend, record.assignment_id).into(),
        record.data_type.as_i16().into(),
        slot.string.into(),
        slot.integer.into(),
        slot.decimal.into(),
        slot.boolean.into(),
        slot.date.into(),
        slot.datetime.into(),
        slot.document.into(),
        opt_id_value(backend, slot.reference).into(),
        matches!(record.slot, ValueSlot::ClearedReference).into(),
        record.is_valid.into(),
        errors.into(),
        record.version.into(),
        record.is_current.into(),
        record.effective_from.as_micros().into(),
        record.effective_to.map(Timestamp::as_micros).into(),
        opt_id_value(backend, record.superseded_by).into(),
        record.value_hash.clone().into(),
        record.is_active.into(),
        record.created_at.as_micros().into(),
        record.updated_at.as_micros().into(),
        id_value(backend, record.created_by.0).into(),
        id_value(backend, record.updated_by.0).into(),
    ])
}

fn read_record(row: &QueryResult) -> AxiaResult<ValueRecord> {
    let raw_type: i16 = get(row, AxiaValues::DataType)?;
    let data_type = DataType::from_i16(raw_type)
        .ok_or_else(|| AxiaError::storage(format!("unknown data type code {raw_type}")))?;
    let cleared: bool = get(row, AxiaValues::ReferenceCleared)?;
    let slot = SlotColumns::read(row)?.into_slot(data_type, cleared)?;
    let errors_json: String = get(row, AxiaValues::ValidationErrors)?;
    let validation_errors: Vec<FieldError> = serde_json::from_str(&errors_json)
        .map_err(|err| AxiaError::storage(format!("decode validation errors: {err}")))?;
    let effective_to: Option<i64> = get(row, AxiaValues::EffectiveTo)?;
    Ok(ValueRecord {
        value_id: read_id(row, AxiaValues::ValueId)?,
        partition: PartitionId(read_id(row, AxiaValues::PartitionId)?),
        owner_entity_id: read_id(row, AxiaValues::OwnerEntityId)?,
        attribute_id: read_id(row, AxiaValues::AttributeId)?,
        assignment_id: read_id(row, AxiaValues::AssignmentId)?,
        data_type,
        slot,
        is_valid: get(row, AxiaValues::IsValid)?,
        validation_errors,
        version: get(row, AxiaValues::Version)?,
        is_current: get(row, AxiaValues::IsCurrent)?,
        effective_from: Timestamp(get(row, AxiaValues::EffectiveFrom)?),
        effective_to: effective_to.map(Timestamp),
        superseded_by: read_opt_id(row, AxiaValues::SupersededBy)?,
        value_hash: get(row, AxiaValues::ValueHash)?,
        is_active: get(row, AxiaValues::IsActive)?,
        created_at: Timestamp(get(row, AxiaValues::CreatedAt)?),
        updated_at: Timestamp(get(row, AxiaValues::UpdatedAt)?),
        created_by: ActorId(read_id(row, AxiaValues::CreatedBy)?),
        updated_by: ActorId(read_id(row, AxiaValues::UpdatedBy)?),
    })
}
