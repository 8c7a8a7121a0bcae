//! Column descriptions and their MySQL DDL fragments.

use crate::error::SchemaError;
use regex::Regex;
use serde::{Deserialize, Serialize};

const IDENT_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Name of the implicit identity column every table carries.
pub const IDENTITY_NAME: &str = "id";

/// Check that `name` is a plain SQL identifier (letters, digits, underscore; no leading digit).
pub fn validate_identifier(name: &str) -> Result<(), SchemaError> {
    let re = Regex::new(IDENT_PATTERN).map_err(|_| SchemaError::InvalidIdentifier(name.to_string()))?;
    if re.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(name.to_string()))
    }
}

/// Column type. Serialized as its numeric code so stored definitions survive renames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum FieldType {
    Integer,
    Int,
    TinyInt,
    SmallInt,
    BigInt,
    Char,
    Varchar,
    Text,
    TinyText,
    MediumText,
    LongText,
    Blob,
    TinyBlob,
    MediumBlob,
    LongBlob,
    Datetime,
    Date,
    Time,
    Timestamp,
    /// Foreign key to another table's identity column; rendered as `BIGINT`.
    Reference,
}

impl FieldType {
    pub const BINARY: FieldType = FieldType::Blob;

    pub const ALL: [FieldType; 20] = [
        FieldType::Integer,
        FieldType::Int,
        FieldType::TinyInt,
        FieldType::SmallInt,
        FieldType::BigInt,
        FieldType::Char,
        FieldType::Varchar,
        FieldType::Text,
        FieldType::TinyText,
        FieldType::MediumText,
        FieldType::LongText,
        FieldType::Blob,
        FieldType::TinyBlob,
        FieldType::MediumBlob,
        FieldType::LongBlob,
        FieldType::Datetime,
        FieldType::Date,
        FieldType::Time,
        FieldType::Timestamp,
        FieldType::Reference,
    ];

    pub const fn code(self) -> u32 {
        match self {
            FieldType::Integer => 1,
            FieldType::Int => 1 << 1,
            FieldType::TinyInt => 1 << 2,
            FieldType::SmallInt => 1 << 3,
            FieldType::BigInt => 1 << 4,
            FieldType::Char => 1 << 5,
            FieldType::Varchar => 1 << 6,
            FieldType::Text => 1 << 7,
            FieldType::TinyText => 1 << 8,
            FieldType::MediumText => 1 << 9,
            FieldType::LongText => 1 << 10,
            FieldType::Blob => 1 << 11,
            FieldType::TinyBlob => 1 << 12,
            FieldType::MediumBlob => 1 << 13,
            FieldType::LongBlob => 1 << 14,
            FieldType::Datetime => 1 << 15,
            FieldType::Date => 1 << 16,
            FieldType::Time => 1 << 17,
            FieldType::Timestamp => 1 << 18,
            FieldType::Reference => 1 << 19,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, SchemaError> {
        FieldType::ALL
            .iter()
            .copied()
            .find(|t| t.code() == code)
            .ok_or(SchemaError::UnknownType(code))
    }

    pub const fn sql_name(self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::Int => "INT",
            FieldType::TinyInt => "TINYINT",
            FieldType::SmallInt => "SMALLINT",
            FieldType::BigInt | FieldType::Reference => "BIGINT",
            FieldType::Char => "CHAR",
            FieldType::Varchar => "VARCHAR",
            FieldType::Text => "TEXT",
            FieldType::TinyText => "TINYTEXT",
            FieldType::MediumText => "MEDIUMTEXT",
            FieldType::LongText => "LONGTEXT",
            FieldType::Blob => "BLOB",
            FieldType::TinyBlob => "TINYBLOB",
            FieldType::MediumBlob => "MEDIUMBLOB",
            FieldType::LongBlob => "LONGBLOB",
            FieldType::Datetime => "DATETIME",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::Timestamp => "TIMESTAMP",
        }
    }

    pub const fn has_length(self) -> bool {
        matches!(self, FieldType::Char | FieldType::Varchar)
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            FieldType::Integer | FieldType::Int | FieldType::TinyInt | FieldType::SmallInt | FieldType::BigInt
        )
    }
}

impl TryFrom<u32> for FieldType {
    type Error = SchemaError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        FieldType::from_code(code)
    }
}

impl From<FieldType> for u32 {
    fn from(t: FieldType) -> u32 {
        t.code()
    }
}

/// Referential action for `ON DELETE` / `ON UPDATE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnChange {
    #[default]
    Unspecified,
    Cascade,
    SetNull,
    Restrict,
    NoAction,
}

impl OnChange {
    pub const fn sql(self) -> Option<&'static str> {
        match self {
            OnChange::Unspecified => None,
            OnChange::Cascade => Some("CASCADE"),
            OnChange::SetNull => Some("SET NULL"),
            OnChange::Restrict => Some("RESTRICT"),
            OnChange::NoAction => Some("NO ACTION"),
        }
    }

    pub const fn is_set(self) -> bool {
        !matches!(self, OnChange::Unspecified)
    }
}

/// One declared column. Equality is structural over every attribute.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub length: u32,
    #[serde(default)]
    pub null: bool,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default)]
    pub on_delete: OnChange,
    #[serde(default)]
    pub on_update: OnChange,
}

impl Field {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Field {
            name: name.into(),
            kind,
            length: 0,
            null: false,
            auto_increment: false,
            unique: false,
            reference: None,
            on_delete: OnChange::Unspecified,
            on_update: OnChange::Unspecified,
        }
    }

    /// A column holding the identity of a row in `table`.
    pub fn references(name: impl Into<String>, table: impl Into<String>) -> Self {
        let mut field = Field::new(name, FieldType::Reference);
        field.reference = Some(table.into());
        field
    }

    pub fn length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.null = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn on_delete(mut self, behavior: OnChange) -> Self {
        self.on_delete = behavior;
        self
    }

    pub fn on_update(mut self, behavior: OnChange) -> Self {
        self.on_update = behavior;
        self
    }

    /// The referenced table, if any. An empty name counts as no reference.
    pub fn referenced_table(&self) -> Option<&str> {
        self.reference.as_deref().filter(|r| !r.is_empty())
    }

    /// Type actually rendered: references always use the identity width.
    pub fn effective_kind(&self) -> Result<FieldType, SchemaError> {
        match (self.referenced_table(), self.kind) {
            (Some(_), _) => Ok(FieldType::BigInt),
            (None, FieldType::Reference) => Err(SchemaError::MissingReference(self.name.clone())),
            (None, kind) => Ok(kind),
        }
    }

    /// Column fragment: `<name> <TYPE>[(<len>)] [NOT NULL] [AUTO_INCREMENT] [UNIQUE KEY]`.
    pub fn to_schema(&self) -> Result<String, SchemaError> {
        validate_identifier(&self.name)?;
        if self.name == IDENTITY_NAME {
            return Err(SchemaError::ReservedName(self.name.clone()));
        }
        let kind = self.effective_kind()?;
        if self.referenced_table().is_none() && (self.on_delete.is_set() || self.on_update.is_set()) {
            return Err(SchemaError::BehaviorWithoutReference(self.name.clone()));
        }
        let type_name = if kind.has_length() {
            if self.length == 0 {
                return Err(SchemaError::MissingLength {
                    field: self.name.clone(),
                    kind: kind.sql_name(),
                });
            }
            format!("{}({})", kind.sql_name(), self.length)
        } else {
            kind.sql_name().to_string()
        };

        let mut parts = vec![self.name.clone(), type_name];
        if !self.null {
            parts.push("NOT NULL".into());
        }
        if self.auto_increment {
            parts.push("AUTO_INCREMENT".into());
        }
        if self.unique {
            parts.push("UNIQUE KEY".into());
        }
        Ok(parts.join(" "))
    }

    /// `FOREIGN KEY (<name>) REFERENCES <ref>(id) [ON DELETE ..] [ON UPDATE ..]` for references.
    pub fn foreign_key(&self) -> Result<Option<String>, SchemaError> {
        let Some(table) = self.referenced_table() else {
            return Ok(None);
        };
        validate_identifier(table)?;
        let mut clause = format!("FOREIGN KEY ({}) REFERENCES {}({})", self.name, table, IDENTITY_NAME);
        if let Some(action) = self.on_delete.sql() {
            clause.push_str(" ON DELETE ");
            clause.push_str(action);
        }
        if let Some(action) = self.on_update.sql() {
            clause.push_str(" ON UPDATE ");
            clause.push_str(action);
        }
        Ok(Some(clause))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Field {
        Field::new("name", FieldType::Varchar).length(64).unique()
    }

    #[test]
    fn varchar_renders_length_and_constraints() {
        assert_eq!(sample().to_schema().unwrap(), "name VARCHAR(64) NOT NULL UNIQUE KEY");
    }

    #[test]
    fn nullable_int_has_no_modifiers() {
        let f = Field::new("age", FieldType::Int).nullable();
        assert_eq!(f.to_schema().unwrap(), "age INT");
    }

    #[test]
    fn length_ignored_for_unlengthed_types() {
        let f = Field::new("bio", FieldType::Text).length(300).nullable();
        assert_eq!(f.to_schema().unwrap(), "bio TEXT");
    }

    #[test]
    fn every_known_type_renders() {
        for kind in FieldType::ALL {
            let f = match kind {
                FieldType::Reference => Field::references("other_id", "others"),
                k if k.has_length() => Field::new("col", k).length(8),
                k => Field::new("col", k),
            };
            let schema = f.to_schema().unwrap();
            assert!(!schema.is_empty());
            assert!(schema.contains(f.effective_kind().unwrap().sql_name()));
        }
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(FieldType::from_code(0), Err(SchemaError::UnknownType(0)));
        assert_eq!(FieldType::from_code(3), Err(SchemaError::UnknownType(3)));
        assert!(serde_json::from_str::<Field>(r#"{"name":"x","type":0}"#).is_err());
        for kind in FieldType::ALL {
            assert_eq!(FieldType::from_code(kind.code()), Ok(kind));
        }
    }

    #[test]
    fn integer_family() {
        assert!(FieldType::SmallInt.is_integer());
        assert!(!FieldType::Varchar.is_integer());
        assert_eq!(FieldType::BINARY, FieldType::Blob);
    }

    #[test]
    fn reference_is_coerced_to_bigint() {
        let f = Field::new("employer", FieldType::Varchar)
            .nullable()
            .on_delete(OnChange::SetNull);
        let f = Field {
            reference: Some("employers".into()),
            ..f
        };
        assert_eq!(f.to_schema().unwrap(), "employer BIGINT");
        assert_eq!(
            f.foreign_key().unwrap().unwrap(),
            "FOREIGN KEY (employer) REFERENCES employers(id) ON DELETE SET NULL"
        );
    }

    #[test]
    fn foreign_key_with_both_actions() {
        let f = Field::references("owner", "users")
            .on_delete(OnChange::Cascade)
            .on_update(OnChange::NoAction);
        assert_eq!(
            f.foreign_key().unwrap().unwrap(),
            "FOREIGN KEY (owner) REFERENCES users(id) ON DELETE CASCADE ON UPDATE NO ACTION"
        );
        assert_eq!(Field::new("age", FieldType::Int).foreign_key().unwrap(), None);
    }

    #[test]
    fn empty_reference_counts_as_none() {
        let mut f = Field::new("age", FieldType::Int);
        f.reference = Some(String::new());
        assert_eq!(f.referenced_table(), None);
        assert_eq!(f.to_schema().unwrap(), "age INT NOT NULL");
    }

    #[test]
    fn cascade_requires_reference() {
        let f = Field::new("age", FieldType::Int).on_delete(OnChange::Cascade);
        assert_eq!(f.to_schema(), Err(SchemaError::BehaviorWithoutReference("age".into())));
    }

    #[test]
    fn reference_sentinel_without_table_fails() {
        let f = Field::new("owner", FieldType::Reference);
        assert_eq!(f.to_schema(), Err(SchemaError::MissingReference("owner".into())));
    }

    #[test]
    fn varchar_without_length_fails() {
        let f = Field::new("name", FieldType::Varchar);
        assert!(matches!(f.to_schema(), Err(SchemaError::MissingLength { .. })));
    }

    #[test]
    fn bad_identifiers_fail() {
        assert!(Field::new("1abc", FieldType::Int).to_schema().is_err());
        assert!(Field::new("a b", FieldType::Int).to_schema().is_err());
        assert!(Field::new("", FieldType::Int).to_schema().is_err());
        assert_eq!(
            Field::new("id", FieldType::Int).to_schema(),
            Err(SchemaError::ReservedName("id".into()))
        );
    }

    #[test]
    fn equal_until_any_attribute_changes() {
        let base = sample();
        assert_eq!(base, sample());

        let variants = [
            Field { name: "other".into(), ..sample() },
            Field { kind: FieldType::Char, ..sample() },
            Field { length: 65, ..sample() },
            Field { null: true, ..sample() },
            Field { auto_increment: true, ..sample() },
            Field { unique: false, ..sample() },
            Field { reference: Some("users".into()), ..sample() },
            Field { on_delete: OnChange::Cascade, ..sample() },
            Field { on_update: OnChange::Restrict, ..sample() },
        ];
        for v in variants {
            assert_ne!(base, v);
        }
    }

    #[test]
    fn portable_encoding_keeps_every_attribute() {
        let f = Field::references("owner", "users").nullable().on_delete(OnChange::SetNull);
        let json = serde_json::to_string(&f).unwrap();
        assert!(json.contains(&format!("\"type\":{}", FieldType::Reference.code())));
        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
