use sea_orm::sea_query;
use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder,
    Value as SeaValue,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, QueryResult, Statement};
use sea_orm_migration::prelude::Iden;
use uuid::Uuid;

use aideon_axia_core::{AxiaError, AxiaResult, Id};

#[derive(Iden, Clone, Copy)]
pub enum AxiaSchemaVersion {
    Table,
    Version,
    AppliedAt,
    Checksum,
    AppVersion,
}

#[derive(Iden, Clone, Copy)]
pub enum AxiaValues {
    Table,
    PartitionId,
    ValueId,
    OwnerEntityId,
    AttributeId,
    AssignmentId,
    DataType,
    ValueString,
    ValueInteger,
    ValueDecimal,
    ValueBoolean,
    ValueDate,
    ValueDatetime,
    ValueDocument,
    ValueReference,
    ReferenceCleared,
    IsValid,
    ValidationErrors,
    Version,
    IsCurrent,
    EffectiveFrom,
    EffectiveTo,
    SupersededBy,
    ValueHash,
    IsActive,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    UpdatedBy,
}

#[derive(Iden, Clone, Copy)]
pub enum AxiaValueHeads {
    Table,
    PartitionId,
    OwnerEntityId,
    AttributeId,
    CurrentValueId,
    LastVersion,
    UpdatedAt,
}

#[derive(Iden, Clone, Copy)]
pub enum AxiaChangeFeed {
    Table,
    PartitionId,
    Sequence,
    Operation,
    OwnerEntityId,
    AttributeId,
    ValueId,
    PreviousValueId,
    EmittedAt,
}

pub fn id_value(backend: DatabaseBackend, id: Id) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => Uuid::from_bytes(id.as_bytes()).into(),
        DatabaseBackend::MySql => id.as_vec().into(),
        DatabaseBackend::Sqlite => id.to_uuid_string().into(),
    }
}

pub fn none_id_value(backend: DatabaseBackend) -> SeaValue {
    match backend {
        DatabaseBackend::Postgres => Option::<Uuid>::None.into(),
        DatabaseBackend::MySql => Option::<Vec<u8>>::None.into(),
        DatabaseBackend::Sqlite => Option::<String>::None.into(),
    }
}

pub fn opt_id_value(backend: DatabaseBackend, id: Option<Id>) -> SeaValue {
    match id {
        Some(id) => id_value(backend, id),
        None => none_id_value(backend),
    }
}

fn bytes_to_id(bytes: Vec<u8>) -> Option<Id> {
    let buf: [u8; 16] = bytes.try_into().ok()?;
    Some(Id::from_bytes(buf))
}

pub fn read_id(row: &QueryResult, column: impl sea_query::Iden) -> AxiaResult<Id> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<String>("", &name) {
        return Id::from_uuid_str(&value);
    }
    if let Ok(value) = row.try_get::<Uuid>("", &name) {
        return Ok(Id::from_bytes(*value.as_bytes()));
    }
    if let Ok(value) = row.try_get::<Vec<u8>>("", &name) {
        return bytes_to_id(value).ok_or_else(|| AxiaError::storage("invalid id length"));
    }
    Err(AxiaError::storage(format!("unsupported id format in {name}")))
}

pub fn read_opt_id(row: &QueryResult, column: impl sea_query::Iden) -> AxiaResult<Option<Id>> {
    let name = col_name(column);
    if let Ok(value) = row.try_get::<Option<String>>("", &name) {
        return value.map(|value| Id::from_uuid_str(&value)).transpose();
    }
    if let Ok(value) = row.try_get::<Option<Uuid>>("", &name) {
        return Ok(value.map(|value| Id::from_bytes(*value.as_bytes())));
    }
    if let Ok(value) = row.try_get::<Option<Vec<u8>>>("", &name) {
        return Ok(value.and_then(bytes_to_id));
    }
    Ok(None)
}

pub fn col_name(column: impl sea_query::Iden) -> String {
    column.to_string()
}

pub fn build_stmt<S: QueryStatementWriter>(
    backend: DatabaseBackend,
    stmt: &S,
) -> (String, sea_query::Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
    }
}

pub async fn exec<C, S>(conn: &C, stmt: &S) -> AxiaResult<()>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    exec_count(conn, stmt).await.map(|_| ())
}

/// Executes and reports affected rows; compare-and-set updates read zero as a lost race.
pub async fn exec_count<C, S>(conn: &C, stmt: &S) -> AxiaResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub async fn query_all<C, S>(conn: &C, stmt: &S) -> AxiaResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(rows)
}

pub async fn query_one<C, S>(conn: &C, stmt: &S) -> AxiaResult<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(row)
}
