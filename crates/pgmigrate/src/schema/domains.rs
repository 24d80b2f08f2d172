//! Domain types.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier};

#[derive(Debug, Clone, Default)]
pub struct Domain {
    pub schema: String,
    pub name: String,
    pub underlying_type: String,
    pub not_null: bool,
    pub collation: Option<String>,
    pub default: Option<String>,
    /// Space-joined `pg_get_constraintdef` output for the domain's check
    /// constraints.
    pub check_constraints: Option<String>,
    pub dependencies: Vec<String>,
}

impl Sortable for Domain {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for Domain {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        let mut def = format!(
            "CREATE DOMAIN {} AS {}",
            qualified(&self.schema, &self.name),
            self.underlying_type,
        );
        if let Some(collation) = &self.collation {
            def.push_str(&format!("\nCOLLATE {}", quote_identifier(collation)));
        }
        if let Some(default) = &self.default {
            def.push_str(&format!("\nDEFAULT {default}"));
        }
        if let Some(checks) = &self.check_constraints {
            if !checks.is_empty() {
                def.push_str(&format!("\n{checks}"));
            }
        }
        if self.not_null {
            def.push_str("\nNOT NULL");
        }
        def.push(';');
        def
    }
}

pub async fn load_domains(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Domain>> {
    let rows = db.query(DOMAINS_QUERY, &[&config.schema_names]).await?;
    let mut domains = Vec::with_capacity(rows.len());
    for row in rows {
        domains.push(Domain {
            schema: row.get(0),
            name: row.get(1),
            underlying_type: row.get(2),
            not_null: row.get(3),
            collation: row.get(4),
            default: row.get(5),
            check_constraints: row.get(6),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(domains))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
// - psql '\dD' with '\set ECHO_HIDDEN on'
//
// The constraint subquery skips contype = 'n' rows: some server versions
// surface a domain's NOT NULL as a bogus check-constraint row, and NOT NULL
// is already emitted from typnotnull.
const DOMAINS_QUERY: &str = r#"
with extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_type'::regclass
)
select
    n.nspname::text as "schema",
    t.typname::text as "name",
    pg_catalog.format_type(t.typbasetype, t.typtypmod) as "underlying_type",
    t.typnotnull as "not_null",
    (
        select c.collname::text
        from pg_catalog.pg_collation c, pg_catalog.pg_type bt
        where c.oid = t.typcollation
          and bt.oid = t.typbasetype
          and t.typcollation <> bt.typcollation
    ) as "collation",
    t.typdefault as "default",
    pg_catalog.array_to_string(array(
        select pg_catalog.pg_get_constraintdef(r.oid, true)
        from pg_catalog.pg_constraint r
        where t.oid = r.contypid
          and r.contype != 'n'
    ), ' ') as "check_constraints"
from pg_catalog.pg_type t
left join pg_catalog.pg_namespace n
    on n.oid = t.typnamespace
left join extensions e on t.oid = e.oid
where
    t.typtype = 'd'
    and n.nspname = ANY($1)
    and e.oid is null
order by "schema", "name"
"#;
