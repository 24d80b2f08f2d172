//! Enum types.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_literal};

#[derive(Debug, Clone, Default)]
pub struct Enum {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub description: Option<String>,
    /// Labels in `enumsortorder` order.
    pub elements: Vec<String>,
    pub dependencies: Vec<String>,
}

impl Sortable for Enum {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for Enum {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        let labels: Vec<String> = self
            .elements
            .iter()
            .map(|label| format!("\t{}", quote_literal(label)))
            .collect();
        format!(
            "CREATE TYPE {} AS ENUM (\n{}\n);",
            qualified(&self.schema, &self.name),
            labels.join(",\n"),
        )
    }
}

pub async fn load_enums(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Enum>> {
    let rows = db.query(ENUMS_QUERY, &[&config.schema_names]).await?;
    let mut enums = Vec::with_capacity(rows.len());
    for row in rows {
        enums.push(Enum {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            elements: row.get(3),
            description: row.get(4),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(enums))
}

// This query is inspired heavily by:
// - psql '\dT+ <enum>' with '\set ECHO_HIDDEN on'
// - pg_dump dumpEnumType
const ENUMS_QUERY: &str = r#"
with extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_type'::regclass
)
select
    t.oid as "oid",
    n.nspname::text as "schema",
    t.typname::text as "name",
    array(
        select e.enumlabel
        from pg_catalog.pg_enum e
        where e.enumtypid = t.oid
        order by e.enumsortorder
    )::text[] as "elements",
    pg_catalog.obj_description(t.oid, 'pg_type') as "description"
from pg_catalog.pg_type t
left join pg_catalog.pg_namespace n on n.oid = t.typnamespace
left join extensions e on t.oid = e.oid
where t.typcategory = 'E'
  and not exists (
      select 1 from pg_catalog.pg_type el
      where el.oid = t.typelem and el.typarray = t.oid
  )
  and n.nspname = ANY($1)
  and e.oid is null
order by "schema", "name"
"#;
