//! Model definitions: a table name, its ordered fields and an initializer run after migration.

use crate::error::{AppError, SchemaError};
use crate::gateway::Gateway;
use crate::model::field::{validate_identifier, Field, IDENTITY_NAME};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Column fragment of the implicit identity column, always first.
pub const IDENTITY_COLUMN: &str = "id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY";

/// Called once the table behind a definition has been reconciled. Typically prepares statements.
pub type InitFn = Arc<dyn for<'a> Fn(&'a Gateway) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync>;

#[derive(Clone)]
pub struct Definition {
    pub table_name: String,
    pub fields: Vec<Field>,
    init: Option<InitFn>,
}

impl Definition {
    pub fn new(table_name: impl Into<String>, fields: Vec<Field>) -> Self {
        Definition {
            table_name: table_name.into(),
            fields,
            init: None,
        }
    }

    /// Attach the initializer. Example: `.with_init(|gw| Box::pin(async move { .. }))`.
    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: for<'a> Fn(&'a Gateway) -> BoxFuture<'a, Result<(), AppError>> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    pub fn has_init(&self) -> bool {
        self.init.is_some()
    }

    pub async fn run_init(&self, gateway: &Gateway) -> Result<(), AppError> {
        match &self.init {
            Some(init) => init(gateway).await,
            None => Ok(()),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Identity column followed by each declared name.
    pub fn field_names(&self) -> Vec<&str> {
        std::iter::once(IDENTITY_NAME)
            .chain(self.fields.iter().map(|f| f.name.as_str()))
            .collect()
    }

    /// `<table>.<name>` for every column, identity first.
    pub fn qualified_field_names(&self) -> Vec<String> {
        self.field_names()
            .into_iter()
            .map(|name| format!("{}.{}", self.table_name, name))
            .collect()
    }

    /// `CREATE TABLE <name> (<identity>, <col>.., <fk>..)`.
    pub fn schema(&self) -> Result<String, SchemaError> {
        validate_identifier(&self.table_name)?;
        let mut seen = HashSet::new();
        let mut columns = Vec::with_capacity(self.fields.len() + 1);
        let mut constraints = Vec::new();
        columns.push(IDENTITY_COLUMN.to_string());
        for field in &self.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: self.table_name.clone(),
                    field: field.name.clone(),
                });
            }
            columns.push(field.to_schema()?);
            if let Some(fk) = field.foreign_key()? {
                constraints.push(fk);
            }
        }
        columns.extend(constraints);
        Ok(format!("CREATE TABLE {} ({})", self.table_name, columns.join(", ")))
    }
}

impl PartialEq for Definition {
    fn eq(&self, other: &Self) -> bool {
        self.table_name == other.table_name && self.fields == other.fields
    }
}

impl Eq for Definition {}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("table_name", &self.table_name)
            .field("fields", &self.fields)
            .field("init", &self.init.is_some())
            .finish()
    }
}
