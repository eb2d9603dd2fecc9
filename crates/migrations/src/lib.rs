pub mod sql;

use indoc::formatdoc;
use sql::ALBUMLIST_MIGRATIONS;
use sqlx::{query, query_as, Acquire, Error as SqlxError, FromRow, PgExecutor, Postgres};
use thiserror::Error;
use tracing::{info, warn};

/// Postgres error code for `undefined_table`
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Database is at album store schema revision {latest_migration}, but this worker only knows revisions up to {highest_migration}")]
    UnknownRevision {
        latest_migration: i32,
        highest_migration: u32,
    },
    #[error("Error occured while migrate: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// Creates the schema and its bookkeeping table.
async fn install_schema<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres>,
{
    info!(schema = escaped_schema, "Installing album store schema");

    let create_schema_query = formatdoc!(
        r#"
            create schema if not exists {escaped_schema};
        "#
    );

    let create_migration_table_query = formatdoc!(
        r#"
            create table if not exists {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz default now() not null
            );
        "#
    );

    let mut tx = executor.begin().await?;
    query(&create_schema_query).execute(tx.as_mut()).await?;
    query(&create_migration_table_query)
        .execute(tx.as_mut())
        .await?;
    tx.commit().await?;

    Ok(())
}

#[derive(FromRow, Default)]
struct LastMigration {
    id: Option<i32>,
}

impl LastMigration {
    fn is_before_number(&self, migration_number: u32) -> bool {
        match self.id.and_then(|id| u32::try_from(id).ok()) {
            Some(id) => migration_number > id,
            None => true,
        }
    }
}

/// Returns the last migration applied to the database, installing the
/// schema first when it does not exist yet.
async fn get_last_migration<'e, E>(
    executor: &E,
    escaped_schema: &str,
) -> Result<LastMigration, MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let migrations_status_query = formatdoc!(
        r#"
            select id from {escaped_schema}.migrations order by id desc limit 1;
        "#
    );
    let last_migration = query_as::<_, LastMigration>(&migrations_status_query)
        .fetch_optional(executor.clone())
        .await;

    match last_migration {
        Ok(row) => Ok(row.unwrap_or_default()),
        Err(SqlxError::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => {
            install_schema(executor.clone(), escaped_schema).await?;
            Ok(LastMigration::default())
        }
        Err(e) => Err(MigrateError::SqlError(e)),
    }
}

/// Brings the album store schema up to date.
///
/// Each migration runs in its own transaction together with the insert into
/// the `migrations` table, so a failure leaves the database at the last
/// fully applied revision.
pub async fn migrate<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let last_migration = get_last_migration(&executor, escaped_schema).await?;
    let highest_migration = ALBUMLIST_MIGRATIONS.len() as u32;

    let mut migrated = false;
    for (index, migration) in ALBUMLIST_MIGRATIONS.iter().enumerate() {
        let migration_number = (index + 1) as u32;

        if last_migration.is_before_number(migration_number) {
            migrated = true;
            info!(
                migration_number,
                migration_name = migration.name(),
                "Running migration"
            );
            let mut tx = executor.clone().begin().await?;
            migration.execute(&mut tx, escaped_schema).await?;
            let sql = format!("insert into {escaped_schema}.migrations (id) values ($1)");
            query(&sql)
                .bind(migration_number as i32)
                .execute(tx.as_mut())
                .await?;

            tx.commit().await?;
        }
    }

    if migrated {
        info!("Migrations complete");
    }

    if let Some(latest_migration) = last_migration.id {
        if highest_migration < latest_migration as u32 {
            warn!(
                latest_migration,
                highest_migration, "Database schema is newer than this worker"
            );
            return Err(MigrateError::UnknownRevision {
                latest_migration,
                highest_migration,
            });
        }
    }

    Ok(())
}
