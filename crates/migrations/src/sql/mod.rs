use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;
pub mod m000003;

pub struct AlbumlistMigration {
    name: &'static str,
    pub(crate) stmts: &'static [&'static str],
}

impl AlbumlistMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.stmts {
            let stmt = stmt.replace(":ALBUMLIST_SCHEMA", escaped_schema);
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const ALBUMLIST_MIGRATIONS: &[AlbumlistMigration] = &[
    m000001::M000001_MIGRATION,
    m000002::M000002_MIGRATION,
    m000003::M000003_MIGRATION,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_names_are_ordered() {
        let names: Vec<_> = ALBUMLIST_MIGRATIONS.iter().map(|m| m.name()).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.first(), Some(&"m000001"));
    }

    #[test]
    fn test_every_statement_is_schema_qualified() {
        for migration in ALBUMLIST_MIGRATIONS {
            for stmt in migration.stmts {
                assert!(
                    stmt.contains(":ALBUMLIST_SCHEMA."),
                    "{} has an unqualified statement: {stmt}",
                    migration.name()
                );
            }
        }
    }
}
