//! Dependency edges mined from `pg_depend`.
//!
//! The catalog records view-to-relation and view-to-function dependencies
//! through rewrite rules, so the join goes through `pg_rewrite`. The result
//! is a flat edge list; the assembler turns each edge into an extra
//! dependency on the `from` object.

use tokio_postgres::GenericClient;

use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::qualified;

/// One end of a dependency edge.
#[derive(Debug, Clone, Default)]
pub struct DependencyObject {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub kind: String,
}

impl DependencyObject {
    pub fn key(&self) -> String {
        qualified(&self.schema, &self.name)
    }
}

/// `object` cannot be created (or dropped) without `depends_on` existing
/// first. Not itself a dumped object, so not sortable.
#[derive(Debug, Clone, Default)]
pub struct Dependency {
    pub object: DependencyObject,
    pub depends_on: DependencyObject,
}

pub async fn load_dependencies(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<Dependency>> {
    let rows = db.query(DEPENDENCIES_QUERY, &[&config.schema_names]).await?;
    let mut deps = Vec::with_capacity(rows.len());
    for row in rows {
        deps.push(Dependency {
            object: DependencyObject {
                oid: row.get(0),
                schema: row.get(1),
                name: row.get(2),
                kind: row.get(3),
            },
            depends_on: DependencyObject {
                oid: row.get(4),
                schema: row.get(5),
                name: row.get(6),
                kind: row.get(7),
            },
        });
    }
    Ok(deps)
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
const DEPENDENCIES_QUERY: &str = r#"
with
-- Objects that belong to extensions are filtered out of the result.
extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
    union
    select t.typrelid as "oid"
    from pg_depend d
    join pg_type t on t.oid = d.objid
    where d.refclassid = 'pg_extension'::regclass
),
functions_tables_and_views as (
    select
        oid as "oid",
        pronamespace::regnamespace::text as "schema",
        proname::text as "name",
        prokind::text as "kind"
    from pg_proc
    -- 'f' = normal function, 'p' = procedure; aggregates and window
    -- functions are excluded.
    where pg_proc.prokind in ('f', 'p')
    union
    select
        oid as "oid",
        relnamespace::regnamespace::text as "schema",
        relname::text as "name",
        relkind::text as "kind"
    from pg_class
    -- 'r' = table, 'v' = view, 'm' = materialized view.
    where relkind in ('r', 'v', 'm')
),
filtered as (
    select o.oid, o.schema, o.name, o.kind
    from functions_tables_and_views o
    left outer join extensions e on o.oid = e.oid
    where o.schema = ANY($1) and e.oid is null
),
dependencies as (
    select distinct
        x.oid as "oid",
        x.schema as "schema",
        x.name as "name",
        x.kind as "kind",
        y.oid as "on_oid",
        y.schema as "on_schema",
        y.name as "on_name",
        y.kind as "on_kind"
    from pg_depend d
    inner join filtered y
        on d.refobjid = y.oid
    -- Views depend on their inputs through rewrite rules.
    inner join pg_rewrite rw
        on d.objid = rw.oid
        and y.oid != rw.ev_class
    inner join filtered x
        on rw.ev_class = x.oid
    -- 'n' = DEPENDENCY_NORMAL: dropping x requires dropping y first.
    where d.deptype = 'n'
)
select
    "oid", "schema", "name", "kind",
    "on_oid", "on_schema", "on_name", "on_kind"
from dependencies
order by "schema", "name", "on_schema", "on_name"
"#;
