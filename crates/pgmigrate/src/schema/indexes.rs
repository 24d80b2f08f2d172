//! Index records from `pg_index`.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::qualified;

#[derive(Debug, Clone, Default)]
pub struct Index {
    pub oid: u32,
    pub schema: String,
    pub table_name: String,
    pub name: String,
    /// Complete statement from `pg_get_indexdef`.
    pub definition: String,
    /// Indexed columns in index order.
    pub index_columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary_key: bool,
    pub is_exclusion: bool,
    /// Expression text for expression indexes.
    pub key_expressions: Option<String>,
    /// WHERE clause for partial indexes.
    pub partial_predicate: Option<String>,
    /// Access method name from `pg_am` (btree, gin, gist, ...).
    pub algorithm: String,
    pub dependencies: Vec<String>,
}

impl Index {
    pub fn table_key(&self) -> String {
        qualified(&self.schema, &self.table_name)
    }
}

impl Sortable for Index {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        deps.push(self.table_key());
        deps
    }
}

impl DbObject for Index {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        format!("{};", self.definition)
    }
}

pub async fn load_indexes(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Index>> {
    let rows = db.query(INDEXES_QUERY, &[&config.schema_names]).await?;
    let mut indexes = Vec::with_capacity(rows.len());
    for row in rows {
        indexes.push(Index {
            oid: row.get(0),
            schema: row.get(1),
            table_name: row.get(2),
            name: row.get(3),
            definition: row.get(4),
            index_columns: row.get(5),
            is_unique: row.get(6),
            is_primary_key: row.get(7),
            is_exclusion: row.get(8),
            key_expressions: row.get(9),
            partial_predicate: row.get(10),
            algorithm: row.get(11),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(indexes))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
// - psql '\di+ <index>' with '\set ECHO_HIDDEN on'
const INDEXES_QUERY: &str = r#"
with
-- Objects that belong to extensions are filtered out of the result.
extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
),
extension_relations as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_class'::regclass
)
select
    i.oid as "oid",
    n.nspname::text as "schema",
    c.relname::text as "table_name",
    i.relname::text as "name",
    pg_get_indexdef(i.oid) as "definition",
    coalesce((
        select array_agg(aa.attname::text order by ik.n)
        from unnest(x.indkey) with ordinality ik(i, n)
        join pg_attribute aa
            on aa.attrelid = x.indrelid
            and ik.i = aa.attnum
    ), '{}') as "index_columns",
    x.indisunique as "is_unique",
    x.indisprimary as "is_pk",
    x.indisexclusion as "is_exclusion",
    pg_get_expr(x.indexprs, x.indrelid) as "key_expressions",
    pg_get_expr(x.indpred, x.indrelid) as "partial_predicate",
    am.amname::text as "algorithm"
from pg_index x
join pg_class c on c.oid = x.indrelid
join pg_class i on i.oid = x.indexrelid
join pg_am am on i.relam = am.oid
left join pg_namespace n on n.oid = c.relnamespace
left join extensions e on i.oid = e.oid
left join extension_relations er on c.oid = er.oid
where
    x.indislive
    and c.relkind in ('r', 'm', 'p') and i.relkind in ('i', 'I')
    and n.nspname::text = ANY($1)
    and e.oid is null
    and er.oid is null
order by "schema", "table_name", "name"
"#;
