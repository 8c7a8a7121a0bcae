//! Gateway-backed persistence for the migration engine: DDL execution and `__model_trackers` rows.

use crate::error::{DbError, MigrationError};
use crate::gateway::{Command, Each, Gateway, Statement};
use crate::migration::{decode_fields, encode_fields, ensure_tracker_table, tracker_definition, SchemaStore, TrackerRecord};
use crate::model::Field;
use async_trait::async_trait;
use sqlx::mysql::MySqlRow;
use sqlx::Row;

/// Statements over the tracker table, prepared once the table is known to exist.
#[derive(Debug)]
pub struct TrackerState {
    fetch: Statement,
    save: Command,
}

impl TrackerState {
    async fn init(gateway: &Gateway) -> Result<Self, MigrationError> {
        ensure_tracker_table(gateway).await?;
        let def = tracker_definition();
        let tracker_err = |source| MigrationError::Tracker {
            table: def.table_name.clone(),
            source,
        };
        let fetch = gateway
            .prepare_stmt("SELECT %FIELDS% FROM %TABLE% WHERE name = ? LIMIT 1", &def)
            .await
            .map_err(tracker_err)?;
        let save = gateway.make_cmd(
            "INSERT INTO %TABLE% (name, fields) VALUES (?, ?) ON DUPLICATE KEY UPDATE fields = VALUES(fields)",
            &def,
        );
        Ok(TrackerState { fetch, save })
    }
}

impl Gateway {
    /// Tracker statements, creating the tracker table on first use.
    pub async fn tracker_state(&self) -> Result<&TrackerState, MigrationError> {
        self.tracker.get_or_try_init(|| TrackerState::init(self)).await
    }
}

fn tracker_failure(err: MigrationError) -> DbError {
    match err {
        MigrationError::Tracker { source, .. } | MigrationError::Statement { source, .. } => source,
        MigrationError::Schema(e) => DbError::Schema(e),
    }
}

#[async_trait]
impl SchemaStore for Gateway {
    async fn table_exists(&self, table: &str) -> Result<bool, DbError> {
        Gateway::table_exists(self, table).await
    }

    async fn execute(&self, ddl: &str) -> Result<(), DbError> {
        let scope = self.scope();
        scope
            .run(async {
                sqlx::query(ddl).execute(self.pool()).await?;
                Ok::<_, DbError>(())
            })
            .await
    }

    async fn load_tracker(&self, name: &str) -> Result<Option<TrackerRecord>, DbError> {
        let state = self.tracker_state().await.map_err(tracker_failure)?;
        let mut found: Option<(i64, String, Vec<u8>)> = None;
        let mut acc = Each(|row: &MySqlRow| -> Result<(), sqlx::Error> {
            found = Some((row.try_get(0)?, row.try_get(1)?, row.try_get(2)?));
            Ok(())
        });
        state.fetch.call(&mut acc, &[name.into()]).await?;
        drop(acc);
        match found {
            Some((id, name, raw)) => Ok(Some(TrackerRecord {
                id,
                name,
                fields: decode_fields(&raw)?,
            })),
            None => Ok(None),
        }
    }

    async fn save_tracker(&self, name: &str, fields: &[Field]) -> Result<(), DbError> {
        let state = self.tracker_state().await.map_err(tracker_failure)?;
        let encoded = encode_fields(fields)?;
        state.save.call(&[name.into(), encoded.into()]).await?;
        tracing::debug!(model = %name, "tracker saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::Migrator;
    use crate::model::{Definition, FieldType};

    /// Needs a disposable MySQL database, e.g. `mysql://root:pw@localhost:3306/webapp_test`.
    #[tokio::test]
    #[ignore]
    async fn migrates_against_live_mysql() {
        let url = std::env::var("WEBAPP_TEST_DATABASE_URL").expect("WEBAPP_TEST_DATABASE_URL");
        let gateway = Gateway::connect_url(&url).await.unwrap();
        let table = format!("migr_{}", std::process::id());
        let def = Definition::new(
            table.clone(),
            vec![Field::new("name", FieldType::Varchar).length(64).unique()],
        );
        let migrator = Migrator::new(&gateway);
        assert_eq!(migrator.migrate(&def).await.unwrap().len(), 1);
        assert!(migrator.migrate(&def).await.unwrap().is_empty());

        let mut grown = def.clone();
        grown.fields.push(Field::new("age", FieldType::Int).nullable());
        assert_eq!(
            migrator.migrate(&grown).await.unwrap(),
            vec![format!("ALTER TABLE {} ADD COLUMN age INT", table)]
        );
        let record = gateway.load_tracker(&table).await.unwrap().unwrap();
        assert_eq!(record.fields, grown.fields);

        gateway.execute(&format!("DROP TABLE {}", table)).await.unwrap();
        gateway.close().await;
    }

    #[tokio::test]
    #[ignore]
    async fn underscore_names_do_not_match_neighbours() {
        let url = std::env::var("WEBAPP_TEST_DATABASE_URL").expect("WEBAPP_TEST_DATABASE_URL");
        let gateway = Gateway::connect_url(&url).await.unwrap();
        let pid = std::process::id();
        let neighbour = format!("log{pid}11");
        let table = format!("log{pid}_1");
        gateway
            .execute(&format!("CREATE TABLE {neighbour} (id BIGINT PRIMARY KEY)"))
            .await
            .unwrap();
        assert!(!gateway.table_exists(&table).await.unwrap());

        let def = Definition::new(table.clone(), vec![Field::new("msg", FieldType::Text)]);
        let applied = Migrator::new(&gateway).migrate(&def).await.unwrap();
        assert_eq!(applied.len(), 1);
        assert!(applied[0].starts_with(&format!("CREATE TABLE {table}")), "{applied:?}");
        assert!(gateway.table_exists(&table).await.unwrap());

        for t in [&table, &neighbour] {
            gateway.execute(&format!("DROP TABLE {t}")).await.unwrap();
        }
        gateway.close().await;
    }
}
