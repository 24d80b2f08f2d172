//! Composite (compound) types.

use serde::Deserialize;
use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::{MigrateError, Result};
use crate::pgtools::{qualified, quote_identifier};

#[derive(Debug, Clone, Deserialize)]
pub struct CompoundTypeColumn {
    pub name: String,
    /// Formatted type for rendering.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Schema of the column's type, for dependency edges.
    pub type_schema: String,
    /// Internal name of the column's type.
    pub type_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct CompoundType {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub columns: Vec<CompoundTypeColumn>,
    pub dependencies: Vec<String>,
}

impl Sortable for CompoundType {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        for column in &self.columns {
            deps.push(qualified(&column.type_schema, &column.type_name));
        }
        deps
    }
}

impl DbObject for CompoundType {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|col| format!("  {} {}", quote_identifier(&col.name), col.data_type))
            .collect();
        format!(
            "CREATE TYPE {} AS (\n{}\n);",
            qualified(&self.schema, &self.name),
            col_defs.join(",\n"),
        )
    }
}

pub async fn load_compound_types(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<CompoundType>> {
    let rows = db
        .query(COMPOUND_TYPES_QUERY, &[&config.schema_names])
        .await?;
    let mut types = Vec::with_capacity(rows.len());
    for row in rows {
        let columns_json: serde_json::Value = row.get(3);
        let columns: Vec<CompoundTypeColumn> =
            serde_json::from_value(columns_json).map_err(|e| {
                MigrateError::Config(format!("failed to decode compound type columns: {e}"))
            })?;
        types.push(CompoundType {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            columns,
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(types))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
const COMPOUND_TYPES_QUERY: &str = r#"
with
extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
    union
    select t.typrelid as "oid"
    from pg_depend d
    join pg_type t on t.oid = d.objid
    where d.refclassid = 'pg_extension'::regclass
)
select
    t.oid as "oid",
    n.nspname::text as "schema",
    t.typname::text as "name",
    coalesce((
        select jsonb_agg(
            jsonb_build_object(
                'name', attname,
                'type', format_type(a.oid, atttypmod),
                'type_schema', tn.nspname,
                'type_name', a.typname
            )
            order by attnum
        )
        from pg_class
        join pg_attribute on (attrelid = pg_class.oid)
        join pg_type a on (atttypid = a.oid)
        join pg_namespace tn on (a.typnamespace = tn.oid)
        where pg_class.reltype = t.oid
    ), '[]'::jsonb) as "columns"
from pg_catalog.pg_type t
join pg_catalog.pg_namespace n on n.oid = t.typnamespace
left outer join extensions e on t.oid = e.oid
where
    e.oid is null
    and n.nspname = ANY($1)
    and t.typcategory = 'C'
    and (
        t.typrelid = 0
        or (
            select c.relkind = 'c'
            from pg_catalog.pg_class c
            where c.oid = t.typrelid
        )
    )
order by "schema", "name"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> CompoundType {
        CompoundType {
            schema: "public".into(),
            name: "address".into(),
            columns: vec![
                CompoundTypeColumn {
                    name: "street".into(),
                    data_type: "text".into(),
                    type_schema: "pg_catalog".into(),
                    type_name: "text".into(),
                },
                CompoundTypeColumn {
                    name: "zip".into(),
                    data_type: "character varying(10)".into(),
                    type_schema: "pg_catalog".into(),
                    type_name: "varchar".into(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_render() {
        assert_eq!(
            address().render(),
            "CREATE TYPE public.address AS (\n  street text,\n  zip character varying(10)\n);"
        );
    }

    #[test]
    fn test_column_types_are_dependencies() {
        let deps = address().depends_on();
        assert!(deps.contains(&"pg_catalog.text".to_string()));
    }

    #[test]
    fn test_columns_decode_from_json() {
        let json = serde_json::json!([
            {"name": "a", "type": "integer", "type_schema": "pg_catalog", "type_name": "int4"}
        ]);
        let columns: Vec<CompoundTypeColumn> = serde_json::from_value(json).unwrap();
        assert_eq!(columns[0].name, "a");
        assert_eq!(columns[0].data_type, "integer");
    }
}
