//! Constraint records from `pg_constraint`.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier};

#[derive(Debug, Clone, Default)]
pub struct Constraint {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub table_name: String,
    /// Complete clause from `pg_get_constraintdef`.
    pub definition: String,
    /// `check`, `foreign_key`, `primary_key`, `unique`, or `exclude`.
    pub constraint_type: String,
    /// Name of the backing index for unique/primary-key constraints, empty
    /// otherwise.
    pub index: String,
    pub foreign_table_schema: String,
    pub foreign_table_name: String,
    pub foreign_columns: Vec<String>,
    pub local_columns: Vec<String>,
    pub is_deferrable: bool,
    pub initially_deferred: bool,
    pub dependencies: Vec<String>,
}

impl Constraint {
    pub fn table_key(&self) -> String {
        qualified(&self.schema, &self.table_name)
    }

    /// Sort key of the referenced table, for foreign keys.
    pub fn foreign_table_key(&self) -> Option<String> {
        if self.foreign_table_name.is_empty() {
            None
        } else {
            Some(qualified(
                &self.foreign_table_schema,
                &self.foreign_table_name,
            ))
        }
    }

    /// Sort key of the backing index, when one exists.
    pub fn index_key(&self) -> Option<String> {
        if self.index.is_empty() {
            None
        } else {
            Some(qualified(&self.schema, &self.index))
        }
    }
}

impl Sortable for Constraint {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        deps.push(self.table_key());
        if let Some(foreign) = self.foreign_table_key() {
            deps.push(foreign);
        }
        if let Some(index) = self.index_key() {
            deps.push(index);
        }
        deps
    }
}

impl DbObject for Constraint {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        format!(
            "ALTER TABLE {}\nADD CONSTRAINT {}\n{};",
            qualified(&self.schema, &self.table_name),
            quote_identifier(&self.name),
            self.definition,
        )
    }
}

pub async fn load_constraints(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<Constraint>> {
    let rows = db.query(CONSTRAINTS_QUERY, &[&config.schema_names]).await?;
    let mut constraints = Vec::with_capacity(rows.len());
    for row in rows {
        constraints.push(Constraint {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            table_name: row.get(3),
            definition: row.get(4),
            constraint_type: row.get(5),
            index: row.get(6),
            foreign_table_schema: row.get(7),
            foreign_table_name: row.get(8),
            foreign_columns: row.get::<_, Option<Vec<String>>>(9).unwrap_or_default(),
            local_columns: row.get::<_, Option<Vec<String>>>(10).unwrap_or_default(),
            is_deferrable: row.get(11),
            initially_deferred: row.get(12),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(constraints))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
const CONSTRAINTS_QUERY: &str = r#"
with
extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_constraint'::regclass
),
indexes as (
    select
        schemaname as schema,
        tablename as table_name,
        indexname as name
    from pg_indexes
)
select
    pg_constraint.oid as "oid",
    nspname::text as "schema",
    conname::text as "name",
    relname::text as "table_name",
    pg_get_constraintdef(pg_constraint.oid) as "definition",
    case contype
        when 'c' then 'check'
        when 'f' then 'foreign_key'
        when 'p' then 'primary_key'
        when 'u' then 'unique'
        when 'x' then 'exclude'
    end as "type",
    coalesce(i.name, '')::text as "index",
    case when contype = 'f' then
        (
            select ns.nspname
            from pg_catalog.pg_class c
            join pg_catalog.pg_namespace ns on c.relnamespace = ns.oid
            where c.oid = confrelid::regclass
        )
        else ''
    end::text as "foreign_table_schema",
    case when contype = 'f' then
        (
            select relname
            from pg_catalog.pg_class c
            where c.oid = confrelid::regclass
        )
        else ''
    end::text as "foreign_table_name",
    (
        select array_agg(ta.attname::text order by c.rn)
        from pg_attribute ta
        join unnest(confkey) with ordinality c(cn, rn)
            on ta.attrelid = confrelid and ta.attnum = c.cn
    ) as "foreign_columns",
    (
        select array_agg(ta.attname::text order by c.rn)
        from pg_attribute ta
        join unnest(conkey) with ordinality c(cn, rn)
            on ta.attrelid = conrelid and ta.attnum = c.cn
    ) as "local_columns",
    condeferrable as "is_deferrable",
    condeferred as "initially_deferred"
from
    pg_constraint
    inner join pg_class on conrelid = pg_class.oid
    inner join pg_namespace on pg_namespace.oid = pg_class.relnamespace
    left outer join indexes i
        on nspname = i.schema
        and conname = i.name
        and relname = i.table_name
    left outer join extensions e on pg_constraint.oid = e.oid
where contype in ('c', 'f', 'p', 'u', 'x')
    and nspname = ANY($1)
    and e.oid is null
order by "schema", "table_name", "name"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn fk() -> Constraint {
        Constraint {
            schema: "public".into(),
            name: "orders_user_id_fkey".into(),
            table_name: "orders".into(),
            definition: "FOREIGN KEY (user_id) REFERENCES users(id)".into(),
            constraint_type: "foreign_key".into(),
            foreign_table_schema: "public".into(),
            foreign_table_name: "users".into(),
            foreign_columns: vec!["id".into()],
            local_columns: vec!["user_id".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_foreign_key_depends_on_both_tables() {
        let con = fk();
        let deps = con.depends_on();
        assert!(deps.contains(&"public.orders".to_string()));
        assert!(deps.contains(&"public.users".to_string()));
    }

    #[test]
    fn test_render_is_alter_table() {
        assert_eq!(
            fk().render(),
            "ALTER TABLE public.orders\nADD CONSTRAINT orders_user_id_fkey\nFOREIGN KEY (user_id) REFERENCES users(id);"
        );
    }

    #[test]
    fn test_backing_index_is_a_dependency() {
        let mut con = fk();
        con.index = "orders_pkey".into();
        assert!(con.depends_on().contains(&"public.orders_pkey".to_string()));
    }
}
