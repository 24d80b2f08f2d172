//! Trigger records from `pg_trigger`.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::qualified;

#[derive(Debug, Clone, Default)]
pub struct Trigger {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub table_name: String,
    /// Complete statement from `pg_get_triggerdef`.
    pub definition: String,
    pub proc_schema: String,
    pub proc_name: String,
    pub enabled: String,
    pub dependencies: Vec<String>,
}

impl Trigger {
    pub fn table_key(&self) -> String {
        qualified(&self.schema, &self.table_name)
    }

    /// Sort key of the firing function.
    pub fn proc_key(&self) -> Option<String> {
        if self.proc_name.is_empty() {
            None
        } else {
            Some(qualified(&self.proc_schema, &self.proc_name))
        }
    }
}

impl Sortable for Trigger {
    // Triggers on different tables may share a name, so the owning table is
    // part of the key.
    fn sort_key(&self) -> String {
        format!("{}.{}", self.table_key(), self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        deps.push(self.table_key());
        if let Some(proc) = self.proc_key() {
            deps.push(proc);
        }
        deps
    }
}

impl DbObject for Trigger {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        format!("{};", self.definition)
    }
}

pub async fn load_triggers(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Trigger>> {
    let rows = db.query(TRIGGERS_QUERY, &[&config.schema_names]).await?;
    let mut triggers = Vec::with_capacity(rows.len());
    for row in rows {
        triggers.push(Trigger {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            table_name: row.get(3),
            definition: row.get(4),
            proc_schema: row.get(5),
            proc_name: row.get(6),
            enabled: row.get(7),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(triggers))
}

const TRIGGERS_QUERY: &str = r#"
with extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_trigger'::regclass
)
select
    tg.oid as "oid",
    cls.relnamespace::regnamespace::text as "schema",
    tg.tgname::text as "name",
    cls.relname::text as "table_name",
    pg_get_triggerdef(tg.oid) as "definition",
    proc.pronamespace::regnamespace::text as "proc_schema",
    proc.proname::text as "proc_name",
    tg.tgenabled::text as "enabled"
from pg_trigger tg
join pg_class cls on cls.oid = tg.tgrelid
join pg_proc proc on proc.oid = tg.tgfoid
left outer join extensions e on tg.oid = e.oid
where
    not tg.tgisinternal
    and cls.relnamespace::regnamespace::text = ANY($1)
    and e.oid is null
order by "schema", "table_name", "name"
"#;
