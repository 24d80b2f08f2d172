//! Sequence records from `pg_sequence`.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier};

#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub data_type: String,
    pub start_value: i64,
    pub min_value: i64,
    pub max_value: i64,
    pub increment_by: i64,
    pub cache: i64,
    pub cycle: bool,
    /// Owning table, discovered through `pg_depend`.
    pub table_name: Option<String>,
    /// Owning column, when the sequence backs one.
    pub column_name: Option<String>,
    /// The sequence exists because of a `GENERATED ... AS IDENTITY` column.
    pub is_identity: bool,
    pub is_identity_always: bool,
    pub dependencies: Vec<String>,
}

impl Sequence {
    pub fn table_key(&self) -> Option<String> {
        self.table_name
            .as_ref()
            .map(|table| qualified(&self.schema, table))
    }

    /// An `ALTER SEQUENCE ... OWNED BY` statement tying the sequence to its
    /// owning column, emitted after both exist. Identity sequences never get
    /// one; they are implicit in the column definition.
    pub fn followup(&self) -> Option<Followup> {
        match (&self.table_name, &self.column_name) {
            (Some(table), Some(column)) => {
                let owner = format!(
                    "{}.{}",
                    qualified(&self.schema, table),
                    quote_identifier(column)
                );
                Some(Followup {
                    name: self.sort_key(),
                    dependencies: vec![self.sort_key(), qualified(&self.schema, table)],
                    sql: format!(
                        "ALTER SEQUENCE {} OWNED BY {};",
                        qualified(&self.schema, &self.name),
                        owner
                    ),
                })
            }
            _ => None,
        }
    }
}

impl Sortable for Sequence {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        if let Some(table) = self.table_key() {
            deps.push(table);
        }
        deps
    }
}

impl DbObject for Sequence {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        let mut def = format!(
            "CREATE SEQUENCE {} AS {} INCREMENT BY {} MINVALUE {} MAXVALUE {} START WITH {} CACHE {}",
            qualified(&self.schema, &self.name),
            self.data_type,
            self.increment_by,
            self.min_value,
            self.max_value,
            self.start_value,
            self.cache,
        );
        if self.cycle {
            def.push_str(" CYCLE");
        }
        def.push(';');
        def
    }
}

/// A deferred statement produced while rendering another object, with its own
/// position in the dependency order.
#[derive(Debug, Clone)]
pub struct Followup {
    pub name: String,
    pub sql: String,
    pub dependencies: Vec<String>,
}

impl Sortable for Followup {
    fn sort_key(&self) -> String {
        self.name.clone()
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

pub async fn load_sequences(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<Sequence>> {
    let rows = db.query(SEQUENCES_QUERY, &[&config.schema_names]).await?;
    let mut sequences = Vec::with_capacity(rows.len());
    for row in rows {
        sequences.push(Sequence {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            data_type: row.get(3),
            start_value: row.get(4),
            min_value: row.get(5),
            max_value: row.get(6),
            increment_by: row.get(7),
            cache: row.get(8),
            cycle: row.get(9),
            table_name: row.get(10),
            column_name: row.get(11),
            is_identity: row.get(12),
            is_identity_always: row.get(13),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(sequences))
}

const SEQUENCES_QUERY: &str = r#"
with
extension_relations as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_class'::regclass
)
select
    c.oid as "oid",
    n.nspname::text as "schema",
    c.relname::text as "name",
    s.seqtypid::regtype::text as "data_type",
    s.seqstart as "start_value",
    s.seqmin as "min_value",
    s.seqmax as "max_value",
    s.seqincrement as "increment_by",
    s.seqcache as "cache",
    s.seqcycle as "cycle",
    c_ref.relname::text as "table_name",
    a.attname::text as "column_name",
    d.deptype is not distinct from 'i' as "is_identity",
    a.attidentity is not distinct from 'a' as "is_identity_always"
from
    pg_class c
    inner join pg_sequence s on c.oid = s.seqrelid
    inner join pg_catalog.pg_namespace n on n.oid = c.relnamespace
    left join pg_depend d
        on c.oid = d.objid and d.deptype in ('i', 'a')
    left join pg_class c_ref on d.refobjid = c_ref.oid
    left join pg_attribute a
        on a.attnum = d.refobjsubid
        and a.attrelid = d.refobjid
    left join extension_relations er on c.oid = er.oid
where
    c.relkind = 'S'
    and n.nspname = ANY($1)
    and er.oid is null
order by "schema", "name"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn owned_sequence() -> Sequence {
        Sequence {
            schema: "public".into(),
            name: "users_id_seq".into(),
            data_type: "bigint".into(),
            start_value: 1,
            min_value: 1,
            max_value: 9223372036854775807,
            increment_by: 1,
            cache: 1,
            table_name: Some("users".into()),
            column_name: Some("id".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_render_includes_parameters() {
        assert_eq!(
            owned_sequence().render(),
            "CREATE SEQUENCE public.users_id_seq AS bigint INCREMENT BY 1 MINVALUE 1 \
             MAXVALUE 9223372036854775807 START WITH 1 CACHE 1;"
        );
    }

    #[test]
    fn test_cycle_rendered_when_set() {
        let mut seq = owned_sequence();
        seq.cycle = true;
        assert!(seq.render().ends_with("CACHE 1 CYCLE;"));
    }

    #[test]
    fn test_owned_sequence_depends_on_table() {
        let seq = owned_sequence();
        assert_eq!(seq.depends_on(), vec!["public.users".to_string()]);
    }

    #[test]
    fn test_followup_ties_sequence_to_column() {
        let followup = owned_sequence().followup().unwrap();
        assert_eq!(
            followup.sql,
            "ALTER SEQUENCE public.users_id_seq OWNED BY public.users.id;"
        );
        assert!(followup.dependencies.contains(&"public.users".to_string()));
    }

    #[test]
    fn test_free_sequence_has_no_followup() {
        let mut seq = owned_sequence();
        seq.table_name = None;
        seq.column_name = None;
        assert!(seq.followup().is_none());
        assert!(seq.depends_on().is_empty());
    }
}
