//! Column records shared by tables and views.

use tokio_postgres::Row;

use crate::pgtools::quote_identifier;

/// One column of a table or view, as read from `pg_attribute`.
#[derive(Debug, Clone, Default)]
pub struct Column {
    pub number: i16,
    pub name: String,
    pub not_null: bool,
    /// Formatted type, from `format_type(atttypid, atttypmod)`.
    pub data_type: String,
    pub is_identity: bool,
    pub is_identity_always: bool,
    pub is_generated: bool,
    pub collation: Option<String>,
    pub default_def: Option<String>,
    pub comment: Option<String>,
    /// Sort key of the owning sequence, when a sequence backs this column.
    pub sequence: Option<String>,
}

impl Column {
    /// Render this column as a line of a CREATE TABLE body. Single-column
    /// primary-key/unique indexes are inlined here as column modifiers by the
    /// table renderer, which passes the flags in.
    pub fn render_def(&self, primary_key: bool, unique: bool) -> String {
        let mut def = format!("{} {}", quote_identifier(&self.name), self.data_type);
        if let Some(collation) = &self.collation {
            def.push_str(&format!(" COLLATE {}", quote_identifier(collation)));
        }
        if primary_key {
            def.push_str(" PRIMARY KEY");
        } else if unique {
            def.push_str(" UNIQUE");
        }
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        if self.is_identity {
            let identity_type = if self.is_identity_always {
                "ALWAYS"
            } else {
                "BY DEFAULT"
            };
            def.push_str(&format!(" GENERATED {identity_type} AS IDENTITY"));
        }
        let default_def = self.default_def.as_deref().unwrap_or("");
        if self.is_generated {
            // is_identity and is_generated are never both true.
            def.push_str(&format!(" GENERATED ALWAYS AS ({default_def}) STORED"));
        } else if !default_def.is_empty() {
            def.push_str(&format!(" DEFAULT {default_def}"));
        }
        def
    }
}

/// Scan the shared column-field block out of a table or view row, starting
/// at `offset`. Relations without columns come back from the catalog queries
/// as a single row with NULL column fields; those produce `None`.
pub(crate) fn scan_column(row: &Row, offset: usize) -> Option<Column> {
    let number: Option<i16> = row.get(offset);
    Some(Column {
        number: number?,
        name: row.get(offset + 1),
        not_null: row.get(offset + 2),
        data_type: row.get(offset + 3),
        is_identity: row.get(offset + 4),
        is_identity_always: row.get(offset + 5),
        is_generated: row.get(offset + 6),
        collation: row.get(offset + 7),
        default_def: row.get(offset + 8),
        comment: row.get(offset + 9),
        sequence: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_column() {
        let col = Column {
            name: "email".into(),
            data_type: "text".into(),
            not_null: true,
            ..Default::default()
        };
        assert_eq!(col.render_def(false, false), "email text NOT NULL");
    }

    #[test]
    fn test_primary_key_wins_over_unique() {
        let col = Column {
            name: "id".into(),
            data_type: "bigint".into(),
            not_null: true,
            ..Default::default()
        };
        assert_eq!(
            col.render_def(true, true),
            "id bigint PRIMARY KEY NOT NULL"
        );
    }

    #[test]
    fn test_identity_column() {
        let col = Column {
            name: "id".into(),
            data_type: "bigint".into(),
            not_null: true,
            is_identity: true,
            is_identity_always: true,
            ..Default::default()
        };
        assert_eq!(
            col.render_def(true, false),
            "id bigint PRIMARY KEY NOT NULL GENERATED ALWAYS AS IDENTITY"
        );
    }

    #[test]
    fn test_generated_column_uses_default_expression() {
        let col = Column {
            name: "full_name".into(),
            data_type: "text".into(),
            is_generated: true,
            default_def: Some("first_name || ' ' || last_name".into()),
            ..Default::default()
        };
        assert_eq!(
            col.render_def(false, false),
            "full_name text GENERATED ALWAYS AS (first_name || ' ' || last_name) STORED"
        );
    }

    #[test]
    fn test_default_expression() {
        let col = Column {
            name: "created_at".into(),
            data_type: "timestamp with time zone".into(),
            not_null: true,
            default_def: Some("now()".into()),
            ..Default::default()
        };
        assert_eq!(
            col.render_def(false, false),
            "created_at timestamp with time zone NOT NULL DEFAULT now()"
        );
    }

    #[test]
    fn test_quoted_column_name() {
        let col = Column {
            name: "user".into(),
            data_type: "text".into(),
            ..Default::default()
        };
        assert_eq!(col.render_def(false, false), "\"user\" text");
    }
}
