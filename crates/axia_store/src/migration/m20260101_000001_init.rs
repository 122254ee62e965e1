use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

use crate::db::*;
use aideon_axia_core::Timestamp;

#[derive(DeriveMigrationName)]
pub struct Migration;

const CURRENT_VALUE_INDEX: &str = "axia_values_current_uniq";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();

        manager
            .create_table(
                Table::create()
                    .table(AxiaSchemaVersion::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AxiaSchemaVersion::Version)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AxiaSchemaVersion::AppliedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AxiaSchemaVersion::Checksum)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AxiaSchemaVersion::AppVersion).string())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AxiaValues::Table)
                    .if_not_exists()
                    .col(id_col(backend, AxiaValues::PartitionId, false))
                    .col(id_col(backend, AxiaValues::ValueId, false))
                    .col(id_col(backend, AxiaValues::OwnerEntityId, false))
                    .col(id_col(backend, AxiaValues::AttributeId, false))
                    .col(id_col(backend, AxiaValues::AssignmentId, false))
                    .col(
                        ColumnDef::new(AxiaValues::DataType)
                            .small_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AxiaValues::ValueString).text().null())
                    .col(ColumnDef::new(AxiaValues::ValueInteger).big_integer().null())
                    .col(ColumnDef::new(AxiaValues::ValueDecimal).string_len(64).null())
                    .col(ColumnDef::new(AxiaValues::ValueBoolean).boolean().null())
                    .col(ColumnDef::new(AxiaValues::ValueDate).string_len(10).null())
                    .col(ColumnDef::new(AxiaValues::ValueDatetime).string_len(40).null())
                    .col(ColumnDef::new(AxiaValues::ValueDocument).text().null())
                    .col(id_col(backend, AxiaValues::ValueReference, true))
                    .col(
                        ColumnDef::new(AxiaValues::ReferenceCleared)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(AxiaValues::IsValid).boolean().not_null())
                    .col(
                        ColumnDef::new(AxiaValues::ValidationErrors)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AxiaValues::Version).big_integer().not_null())
                    .col(ColumnDef::new(AxiaValues::IsCurrent).boolean().not_null())
                    .col(
                        ColumnDef::new(AxiaValues::EffectiveFrom)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AxiaValues::EffectiveTo).big_integer().null())
                    .col(id_col(backend, AxiaValues::SupersededBy, true))
                    .col(
                        ColumnDef::new(AxiaValues::ValueHash)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(AxiaValues::IsActive).boolean().not_null())
                    .col(ColumnDef::new(AxiaValues::CreatedAt).big_integer().not_null())
                    .col(ColumnDef::new(AxiaValues::UpdatedAt).big_integer().not_null())
                    .col(id_col(backend, AxiaValues::CreatedBy, false))
                    .col(id_col(backend, AxiaValues::UpdatedBy, false))
                    .primary_key(
                        Index::create()
                            .name("pk_axia_values")
                            .col(AxiaValues::PartitionId)
                            .col(AxiaValues::ValueId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AxiaValueHeads::Table)
                    .if_not_exists()
                    .col(id_col(backend, AxiaValueHeads::PartitionId, false))
                    .col(id_col(backend, AxiaValueHeads::OwnerEntityId, false))
                    .col(id_col(backend, AxiaValueHeads::AttributeId, false))
                    .col(id_col(backend, AxiaValueHeads::CurrentValueId, true))
                    .col(
                        ColumnDef::new(AxiaValueHeads::LastVersion)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AxiaValueHeads::UpdatedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_axia_value_heads")
                            .col(AxiaValueHeads::PartitionId)
                            .col(AxiaValueHeads::OwnerEntityId)
                            .col(AxiaValueHeads::AttributeId),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AxiaChangeFeed::Table)
                    .if_not_exists()
                    .col(sequence_col(backend))
                    .col(id_col(backend, AxiaChangeFeed::PartitionId, false))
                    .col(
                        ColumnDef::new(AxiaChangeFeed::Operation)
                            .small_integer()
                            .not_null(),
                    )
                    .col(id_col(backend, AxiaChangeFeed::OwnerEntityId, false))
                    .col(id_col(backend, AxiaChangeFeed::AttributeId, false))
                    .col(id_col(backend, AxiaChangeFeed::ValueId, false))
                    .col(id_col(backend, AxiaChangeFeed::PreviousValueId, true))
                    .col(
                        ColumnDef::new(AxiaChangeFeed::EmittedAt)
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        create_indexes(manager).await?;

        let checksum = blake3::hash(self.name().as_bytes()).to_hex().to_string();
        let insert = Query::insert()
            .into_table(AxiaSchemaVersion::Table)
            .columns([
                AxiaSchemaVersion::Version,
                AxiaSchemaVersion::AppliedAt,
                AxiaSchemaVersion::Checksum,
                AxiaSchemaVersion::AppVersion,
            ])
            .values_panic([
                self.name().to_string().into(),
                Timestamp::now().as_micros().into(),
                checksum.into(),
                Some(env!("CARGO_PKG_VERSION").to_string()).into(),
            ])
            .to_owned();
        let (sql, values) = build_stmt(backend, &insert);
        manager
            .get_connection()
            .execute(Statement::from_sql_and_values(backend, sql, values))
            .await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            AxiaChangeFeed::Table.into_iden(),
            AxiaValueHeads::Table.into_iden(),
            AxiaValues::Table.into_iden(),
            AxiaSchemaVersion::Table.into_iden(),
        ] {
            manager
                .drop_table(Table::drop().table(table).if_exists().to_owned())
                .await?;
        }
        Ok(())
    }
}

async fn create_indexes(manager: &SchemaManager<'_>) -> Result<(), DbErr> {
    manager
        .create_index(
            Index::create()
                .name("axia_values_chain_version_uniq")
                .table(AxiaValues::Table)
                .col(AxiaValues::PartitionId)
                .col(AxiaValues::OwnerEntityId)
                .col(AxiaValues::AttributeId)
                .col(AxiaValues::Version)
                .unique()
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("axia_values_owner_idx")
                .table(AxiaValues::Table)
                .col(AxiaValues::PartitionId)
                .col(AxiaValues::OwnerEntityId)
                .col(AxiaValues::IsCurrent)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("axia_values_attribute_idx")
                .table(AxiaValues::Table)
                .col(AxiaValues::PartitionId)
                .col(AxiaValues::AttributeId)
                .col(AxiaValues::IsCurrent)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("axia_values_reference_idx")
                .table(AxiaValues::Table)
                .col(AxiaValues::PartitionId)
                .col(AxiaValues::ValueReference)
                .to_owned(),
        )
        .await?;

    manager
        .create_index(
            Index::create()
                .name("axia_change_feed_partition_idx")
                .table(AxiaChangeFeed::Table)
                .col(AxiaChangeFeed::PartitionId)
                .col(AxiaChangeFeed::Sequence)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("axia_change_feed_value_idx")
                .table(AxiaChangeFeed::Table)
                .col(AxiaChangeFeed::PartitionId)
                .col(AxiaChangeFeed::ValueId)
                .to_owned(),
        )
        .await?;

    // Second line of defence behind the head compare-and-set; MySQL has no partial indexes.
    let partial = match manager.get_database_backend() {
        DatabaseBackend::Sqlite => Some(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {CURRENT_VALUE_INDEX} ON axia_values \
             (partition_id, owner_entity_id, attribute_id) \
             WHERE is_current = 1 AND is_active = 1"
        )),
        DatabaseBackend::Postgres => Some(format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {CURRENT_VALUE_INDEX} ON axia_values \
             (partition_id, owner_entity_id, attribute_id) \
             WHERE is_current AND is_active"
        )),
        DatabaseBackend::MySql => None,
    };
    if let Some(sql) = partial {
        manager.get_connection().execute_unprepared(&sql).await?;
    }
    Ok(())
}

/// Feed order comes from the backend's identity column so concurrent writers never contend on it.
fn sequence_col(backend: DatabaseBackend) -> ColumnDef {
    let mut col_def = ColumnDef::new(AxiaChangeFeed::Sequence);
    match backend {
        // AUTOINCREMENT is only accepted on an INTEGER PRIMARY KEY.
        DatabaseBackend::Sqlite => {
            col_def.integer();
        }
        DatabaseBackend::Postgres | DatabaseBackend::MySql => {
            col_def.big_integer();
        }
    }
    col_def.not_null().auto_increment().primary_key().to_owned()
}

fn id_col(backend: DatabaseBackend, col: impl IntoIden, nullable: bool) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Postgres => {
            col_def.uuid();
        }
        DatabaseBackend::MySql => {
            col_def.binary_len(16);
        }
        DatabaseBackend::Sqlite => {
            col_def.string_len(36);
        }
    }
    if nullable {
        col_def.null();
    } else {
        col_def.not_null();
    }
    col_def.to_owned()
}
