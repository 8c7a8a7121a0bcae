//! Textual `%TABLE%` / `%FIELDS%` substitution. Templates come from code authors, never from requests.

use crate::model::Definition;

pub const TABLE_PLACEHOLDER: &str = "%TABLE%";
pub const FIELDS_PLACEHOLDER: &str = "%FIELDS%";

/// Replace `%TABLE%` with the table name and `%FIELDS%` with its qualified columns, identity first.
pub fn render(template: &str, def: &Definition) -> String {
    let sql = template.replace(TABLE_PLACEHOLDER, &def.table_name);
    if sql.contains(FIELDS_PLACEHOLDER) {
        sql.replace(FIELDS_PLACEHOLDER, &def.qualified_field_names().join(", "))
    } else {
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Field, FieldType};

    fn users() -> Definition {
        Definition::new(
            "users",
            vec![
                Field::new("name", FieldType::Varchar).length(64),
                Field::new("age", FieldType::Int).nullable(),
            ],
        )
    }

    #[test]
    fn substitutes_table_and_fields() {
        let sql = render("SELECT %FIELDS% FROM %TABLE% WHERE name = ? LIMIT 1", &users());
        assert_eq!(
            sql,
            "SELECT users.id, users.name, users.age FROM users WHERE name = ? LIMIT 1"
        );
    }

    #[test]
    fn every_occurrence_is_replaced() {
        let sql = render("SELECT COUNT(%TABLE%.id) FROM %TABLE%", &users());
        assert_eq!(sql, "SELECT COUNT(users.id) FROM users");
    }

    #[test]
    fn plain_sql_is_untouched() {
        assert_eq!(render("SELECT 1", &users()), "SELECT 1");
    }
}
