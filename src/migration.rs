//! Reconcile declared model definitions with the database.
//! The last applied shape of every model lives in `__model_trackers`; tables are created
//! when missing, otherwise altered field by field. Columns are never dropped.

use crate::error::{DbError, MigrationError, SchemaError};
use crate::model::{Definition, Field, FieldType};
use async_trait::async_trait;

pub const TRACKER_TABLE: &str = "__model_trackers";

/// Definition of the tracker table itself.
pub fn tracker_definition() -> Definition {
    Definition::new(
        TRACKER_TABLE,
        vec![
            Field::new("name", FieldType::Varchar).length(64).unique(),
            Field::new("fields", FieldType::Blob),
        ],
    )
}

/// One row of `__model_trackers`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerRecord {
    pub id: i64,
    pub name: String,
    pub fields: Vec<Field>,
}

/// Portable encoding of a field list, as stored in the `fields` column.
pub fn encode_fields(fields: &[Field]) -> Result<Vec<u8>, DbError> {
    Ok(serde_json::to_vec(fields)?)
}

pub fn decode_fields(raw: &[u8]) -> Result<Vec<Field>, DbError> {
    Ok(serde_json::from_slice(raw)?)
}

/// What the engine needs from the database.
#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool, DbError>;

    async fn execute(&self, ddl: &str) -> Result<(), DbError>;

    async fn load_tracker(&self, name: &str) -> Result<Option<TrackerRecord>, DbError>;

    /// Insert the tracker row for `name`, or overwrite its fields if one exists.
    async fn save_tracker(&self, name: &str, fields: &[Field]) -> Result<(), DbError>;
}

/// Create the tracker table if absent. Returns the statement issued, if any.
pub async fn ensure_tracker_table<S>(store: &S) -> Result<Option<String>, MigrationError>
where
    S: SchemaStore + ?Sized,
{
    let def = tracker_definition();
    let exists = store
        .table_exists(TRACKER_TABLE)
        .await
        .map_err(|source| MigrationError::Tracker {
            table: TRACKER_TABLE.into(),
            source,
        })?;
    if exists {
        return Ok(None);
    }
    let ddl = def.schema()?;
    run(store, TRACKER_TABLE, &ddl).await?;
    tracing::info!(table = TRACKER_TABLE, "created model tracker table");
    Ok(Some(ddl))
}

/// Column statements turning `stored` into `def`, in declaration order.
pub fn plan(def: &Definition, stored: &[Field]) -> Result<Vec<String>, SchemaError> {
    let mut out = Vec::new();
    for field in &def.fields {
        let verb = match stored.iter().find(|s| s.name == field.name) {
            None => "ADD",
            Some(prev) if prev != field => "MODIFY",
            Some(_) => continue,
        };
        out.push(format!(
            "ALTER TABLE {} {} COLUMN {}",
            def.table_name,
            verb,
            field.to_schema()?
        ));
    }
    Ok(out)
}

async fn run<S>(store: &S, table: &str, ddl: &str) -> Result<(), MigrationError>
where
    S: SchemaStore + ?Sized,
{
    tracing::info!(table = %table, sql = %ddl, "migration");
    store.execute(ddl).await.map_err(|source| MigrationError::Statement {
        table: table.to_string(),
        statement: ddl.to_string(),
        source,
    })
}

pub struct Migrator<'a, S: SchemaStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: SchemaStore + ?Sized> Migrator<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Migrator { store }
    }

    /// Reconcile one definition. Returns the DDL issued, in order.
    /// The tracker row is written only after every statement succeeded.
    pub async fn migrate(&self, def: &Definition) -> Result<Vec<String>, MigrationError> {
        let table = def.table_name.as_str();
        let create = def.schema()?;
        let tracker_err = |source| MigrationError::Tracker {
            table: table.to_string(),
            source,
        };

        let exists = self.store.table_exists(table).await.map_err(tracker_err)?;
        let issued = if !exists {
            run(self.store, table, &create).await?;
            vec![create]
        } else {
            match self.store.load_tracker(table).await.map_err(tracker_err)? {
                Some(record) => {
                    let stmts = plan(def, &record.fields)?;
                    if stmts.is_empty() {
                        tracing::debug!(table = %table, "schema up to date");
                        return Ok(stmts);
                    }
                    for ddl in &stmts {
                        run(self.store, table, ddl).await?;
                    }
                    stmts
                }
                None => {
                    tracing::warn!(table = %table, "table exists without tracker row; adopting declared shape");
                    Vec::new()
                }
            }
        };

        self.store
            .save_tracker(table, &def.fields)
            .await
            .map_err(tracker_err)?;
        Ok(issued)
    }

    /// Reconcile every definition in order, stopping at the first failure.
    pub async fn migrate_all(&self, defs: &[Definition]) -> Result<Vec<String>, MigrationError> {
        let mut issued = Vec::new();
        for def in defs {
            issued.extend(self.migrate(def).await?);
        }
        Ok(issued)
    }
}
