//! Table data dumped as INSERT statements.
//!
//! Data rules come from configuration: a table name (or `LIKE` wildcard
//! pattern), an optional explicit column list, and an optional ORDER BY
//! clause. The columns actually emitted are discovered from the result
//! metadata, never assumed from the rule.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio_postgres::types::Type;
use tokio_postgres::{GenericClient, Row};
use tracing::warn;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier, quote_literal};

/// A configured data-dump rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSpec {
    /// Schema of the table; `public` when omitted.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Table name; may contain SQL `LIKE` wildcards (`%`, `_`).
    pub name: String,
    /// Columns to dump; all columns when empty.
    #[serde(default)]
    pub columns: Vec<String>,
    /// ORDER BY clause (without the keywords) applied to the dump query.
    #[serde(default)]
    pub order_by: Option<String>,
}

fn default_schema() -> String {
    "public".to_string()
}

/// The captured rows of one table, ready to render as a multi-row INSERT.
#[derive(Debug, Clone, Default)]
pub struct Data {
    pub schema: String,
    pub name: String,
    /// Column names discovered from the query result.
    pub columns: Vec<String>,
    pub order_by: Option<String>,
    /// Row-major values, already rendered to their text form; `None` is SQL
    /// NULL.
    rows: Vec<Vec<Option<String>>>,
    dependencies: Vec<String>,
}

impl Data {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Sortable for Data {
    // Same key as the underlying table, so table dependencies can be copied
    // onto the data insert directly.
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for Data {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        if self.rows.is_empty() || self.columns.is_empty() {
            return String::new();
        }
        let column_list: Vec<String> = self
            .columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect();
        let mut out = format!(
            "INSERT INTO {} ({}) VALUES\n",
            qualified(&self.schema, &self.name),
            column_list.join(", "),
        );
        for (i, row) in self.rows.iter().enumerate() {
            let values: Vec<String> = row
                .iter()
                .map(|value| match value {
                    None => "null".to_string(),
                    Some(text) => quote_literal(text),
                })
                .collect();
            out.push_str(&format!("({})", values.join(", ")));
            if i + 1 != self.rows.len() {
                out.push_str(",\n");
            } else {
                out.push_str("\n;");
            }
        }
        out
    }
}

pub async fn load_data(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Data>> {
    let mut targets: Vec<Data> = Vec::new();
    for spec in &config.data {
        if spec.name.contains('%') {
            let rows = db
                .query(WILDCARD_QUERY, &[&config.schema_names, &spec.name])
                .await?;
            for row in rows {
                targets.push(Data {
                    schema: row.get(0),
                    name: row.get(1),
                    columns: spec.columns.clone(),
                    order_by: spec.order_by.clone(),
                    ..Default::default()
                });
            }
        } else {
            targets.push(Data {
                schema: spec.schema.clone(),
                name: spec.name.clone(),
                columns: spec.columns.clone(),
                order_by: spec.order_by.clone(),
                ..Default::default()
            });
        }
    }

    for data in &mut targets {
        let columns = if data.columns.is_empty() {
            "*".to_string()
        } else {
            data.columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut query = format!(
            "select {columns}\nfrom {}",
            qualified(&data.schema, &data.name)
        );
        if let Some(order_by) = &data.order_by {
            query.push_str("\norder by ");
            query.push_str(order_by);
        }
        // Prepare first so the column names are known even for empty tables.
        let statement = db.prepare(&query).await?;
        data.columns = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let rows = db.query(&statement, &[]).await?;
        for row in &rows {
            let mut values = Vec::with_capacity(data.columns.len());
            for idx in 0..data.columns.len() {
                values.push(value_to_text(row, idx));
            }
            data.rows.push(values);
        }
    }
    Ok(super::toposort::sort(targets))
}

const WILDCARD_QUERY: &str = r#"
select
    n.nspname::text as "schema_name",
    c.relname::text as "name"
from pg_catalog.pg_class c
join pg_catalog.pg_namespace n on n.oid = c.relnamespace
where n.nspname = ANY($1)
and c.relkind in ('r', 't', 'p', 'm', 'v')
and c.relname like $2
order by "schema_name", "name"
"#;

// From pgx's timestamptz text codec, truncated to microseconds: the offset
// is rendered with seconds (+00:00:00) and trailing fractional zeros are
// dropped.
fn format_timestamptz(value: DateTime<Utc>) -> String {
    truncate_to_micros(value)
        .format("%Y-%m-%d %H:%M:%S%.f%::z")
        .to_string()
}

fn format_timestamp(value: NaiveDateTime) -> String {
    let ns = value.nanosecond();
    let truncated = value.with_nanosecond(ns - ns % 1000).unwrap_or(value);
    truncated.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

fn truncate_to_micros(value: DateTime<Utc>) -> DateTime<Utc> {
    let ns = value.timestamp_subsec_nanos();
    value.with_nanosecond(ns - ns % 1000).unwrap_or(value)
}

/// Render one result value to its text form, or `None` for SQL NULL. The
/// scan type comes from the result metadata.
fn value_to_text(row: &Row, idx: usize) -> Option<String> {
    let column_type = row.columns()[idx].type_();
    match *column_type {
        Type::BOOL => row.get::<_, Option<bool>>(idx).map(|v| v.to_string()),
        Type::INT2 => row.get::<_, Option<i16>>(idx).map(|v| v.to_string()),
        Type::INT4 => row.get::<_, Option<i32>>(idx).map(|v| v.to_string()),
        Type::INT8 => row.get::<_, Option<i64>>(idx).map(|v| v.to_string()),
        Type::OID => row.get::<_, Option<u32>>(idx).map(|v| v.to_string()),
        Type::FLOAT4 => row.get::<_, Option<f32>>(idx).map(|v| v.to_string()),
        Type::FLOAT8 => row.get::<_, Option<f64>>(idx).map(|v| v.to_string()),
        Type::NUMERIC => row
            .get::<_, Option<rust_decimal::Decimal>>(idx)
            .map(|v| v.to_string()),
        Type::UUID => row.get::<_, Option<uuid::Uuid>>(idx).map(|v| v.to_string()),
        Type::DATE => row
            .get::<_, Option<NaiveDate>>(idx)
            .map(|v| v.format("%Y-%m-%d").to_string()),
        Type::TIME => row
            .get::<_, Option<NaiveTime>>(idx)
            .map(|v| v.format("%H:%M:%S%.f").to_string()),
        Type::TIMESTAMP => row
            .get::<_, Option<NaiveDateTime>>(idx)
            .map(format_timestamp),
        Type::TIMESTAMPTZ => row
            .get::<_, Option<DateTime<Utc>>>(idx)
            .map(format_timestamptz),
        Type::JSON | Type::JSONB => row
            .get::<_, Option<serde_json::Value>>(idx)
            .map(|v| v.to_string()),
        Type::BYTEA => row.get::<_, Option<Vec<u8>>>(idx).map(|bytes| {
            let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            format!("\\x{hex}")
        }),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            row.get::<_, Option<String>>(idx)
        }
        _ => match row.try_get::<_, Option<String>>(idx) {
            Ok(value) => value,
            Err(_) => {
                warn!(
                    column = row.columns()[idx].name(),
                    column_type = %column_type,
                    "cannot render value of this type, emitting NULL"
                );
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_with_rows(rows: Vec<Vec<Option<String>>>) -> Data {
        Data {
            schema: "public".into(),
            name: "user_states".into(),
            columns: vec!["id".into(), "name".into()],
            rows,
            ..Default::default()
        }
    }

    #[test]
    fn test_render_multi_row_insert() {
        let data = data_with_rows(vec![
            vec![Some("1".into()), Some("active".into())],
            vec![Some("2".into()), None],
        ]);
        assert_eq!(
            data.render(),
            "INSERT INTO public.user_states (id, name) VALUES\n('1', 'active'),\n('2', null)\n;"
        );
    }

    #[test]
    fn test_render_empty_data_is_empty() {
        let data = data_with_rows(Vec::new());
        assert_eq!(data.render(), "");
    }

    #[test]
    fn test_values_are_literal_quoted() {
        let data = data_with_rows(vec![vec![
            Some("1".into()),
            Some("it's complicated".into()),
        ]]);
        assert!(data.render().contains("'it''s complicated'"));
    }

    #[test]
    fn test_timestamptz_format_truncates_to_micros() {
        let value = DateTime::parse_from_rfc3339("2024-01-02T03:04:05.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            format_timestamptz(value),
            "2024-01-02 03:04:05.123456+00:00:00"
        );
    }

    #[test]
    fn test_timestamptz_format_whole_seconds() {
        let value = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamptz(value), "2024-01-02 03:04:05+00:00:00");
    }

    #[test]
    fn test_data_spec_defaults() {
        let spec: DataSpec = serde_yaml::from_str("name: user_states").unwrap();
        assert_eq!(spec.schema, "public");
        assert!(spec.columns.is_empty());
        assert!(spec.order_by.is_none());
    }
}
