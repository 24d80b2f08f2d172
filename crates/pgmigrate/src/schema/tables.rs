//! Table records, with their attached sub-objects, and CREATE TABLE
//! rendering.

use std::collections::HashMap;

use tokio_postgres::GenericClient;

use super::column::{scan_column, Column};
use super::constraints::Constraint;
use super::indexes::Index;
use super::object::{DbObject, Sortable};
use super::sequences::Sequence;
use super::triggers::Trigger;
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_literal};

#[derive(Debug, Clone, Default)]
pub struct Table {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub comment: Option<String>,
    pub columns: Vec<Column>,
    pub dependencies: Vec<String>,
    // Sub-objects relocated from the top-level dump during assembly.
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
    pub sequences: Vec<Sequence>,
    pub triggers: Vec<Trigger>,
}

impl Sortable for Table {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        let mut deps = self.dependencies.clone();
        // A table carrying an attached foreign key must come after the
        // referenced table; one carrying a trigger after its function.
        for constraint in &self.constraints {
            if let Some(foreign) = constraint.foreign_table_key() {
                deps.push(foreign);
            }
        }
        for trigger in &self.triggers {
            if let Some(proc) = trigger.proc_key() {
                deps.push(proc);
            }
        }
        deps
    }
}

impl DbObject for Table {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    /// Render the table with its attached sub-objects:
    ///
    /// - owned non-identity sequences come first (the column defaults
    ///   reference them);
    /// - single-column primary-key/unique indexes are inlined as column
    ///   modifiers and suppressed as standalone statements;
    /// - comments, remaining indexes, non-inlined constraints, and triggers
    ///   follow the body;
    /// - `ALTER SEQUENCE ... OWNED BY` follow-ups come last.
    fn render(&self) -> String {
        let mut pk_indexes: HashMap<String, bool> = HashMap::new();
        let mut unique_indexes: HashMap<String, bool> = HashMap::new();
        let mut implicit_sequences: HashMap<String, bool> = HashMap::new();

        let mut col_defs = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let mut is_primary_key = false;
            let mut is_unique = false;
            for index in &self.indexes {
                let single_column = index.index_columns.len() == 1
                    && index.index_columns[0] == column.name;
                if single_column && index.is_primary_key {
                    pk_indexes.insert(index.sort_key(), true);
                    unique_indexes.insert(index.sort_key(), true);
                    is_primary_key = true;
                }
                if single_column && index.is_unique {
                    unique_indexes.insert(index.sort_key(), true);
                    is_unique = true;
                }
            }
            if column.is_identity {
                if let Some(sequence_key) = &column.sequence {
                    implicit_sequences.insert(sequence_key.clone(), true);
                }
            }
            col_defs.push(column.render_def(is_primary_key, is_unique));
        }

        let mut sequence_defs = String::new();
        let mut follow_ups = String::new();
        for sequence in &self.sequences {
            if implicit_sequences.contains_key(&sequence.sort_key()) {
                continue;
            }
            sequence_defs.push_str(&sequence.render());
            sequence_defs.push_str("\n\n");
            if let Some(followup) = sequence.followup() {
                follow_ups.push_str(&followup.sql);
                follow_ups.push_str("\n\n");
            }
        }

        let mut table_def = format!(
            "CREATE TABLE {} (\n  {}\n);",
            qualified(&self.schema, &self.name),
            col_defs.join(",\n  "),
        );

        if let Some(comment) = &self.comment {
            table_def.push_str(&format!(
                "\n\nCOMMENT ON TABLE {} IS {};",
                qualified(&self.schema, &self.name),
                quote_literal(comment),
            ));
        }
        for column in &self.columns {
            if let Some(comment) = &column.comment {
                table_def.push_str(&format!(
                    "\n\nCOMMENT ON COLUMN {}.{} IS {};",
                    qualified(&self.schema, &self.name),
                    crate::pgtools::quote_identifier(&column.name),
                    quote_literal(comment),
                ));
            }
        }

        let constraints_by_key: HashMap<String, &Constraint> = self
            .constraints
            .iter()
            .map(|c| (c.sort_key(), c))
            .collect();

        for index in &self.indexes {
            let key = index.sort_key();
            if pk_indexes.contains_key(&key) || unique_indexes.contains_key(&key) {
                continue;
            }
            // Constraint-backed indexes are emitted through the constraint.
            if constraints_by_key.contains_key(&key) {
                continue;
            }
            table_def.push_str("\n\n");
            table_def.push_str(&index.render());
        }
        for constraint in &self.constraints {
            if unique_indexes.contains_key(&constraint.sort_key()) {
                continue;
            }
            table_def.push_str("\n\n");
            table_def.push_str(&constraint.render());
        }
        for trigger in &self.triggers {
            table_def.push_str("\n\n");
            table_def.push_str(&trigger.render());
        }

        let mut out = format!("{sequence_defs}{table_def}");
        if !follow_ups.is_empty() {
            out.push_str("\n\n");
            out.push_str(&follow_ups);
        }
        out.trim().to_string()
    }
}

pub async fn load_tables(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<Table>> {
    let rows = db.query(TABLES_QUERY, &[&config.schema_names]).await?;
    let mut tables: Vec<Table> = Vec::new();
    for row in rows {
        let oid: u32 = row.get(0);
        if tables.last().map(|t| t.oid) != Some(oid) {
            tables.push(Table {
                oid,
                schema: row.get(1),
                name: row.get(2),
                comment: row.get(3),
                ..Default::default()
            });
        }
        if let Some(column) = scan_column(&row, 4) {
            tables
                .last_mut()
                .expect("table row precedes column rows")
                .columns
                .push(column);
        }
    }
    Ok(super::toposort::sort(tables))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
// - psql '\d+ <table>' with '\set ECHO_HIDDEN on'
const TABLES_QUERY: &str = r#"
with
extension_relations as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_class'::regclass
),
r as (
    select
        c.oid as oid,
        c.relname as name,
        n.nspname as schema
    from
        pg_catalog.pg_class c
        inner join pg_catalog.pg_namespace n on n.oid = c.relnamespace
        left join extension_relations er on c.oid = er.oid
    where c.relkind in ('r', 't', 'p')
      and n.nspname = ANY($1)
      and er.oid is null
)
select
    r.oid as "table_oid",
    r.schema::text as "table_schema",
    r.name::text as "table_name",
    obj_description(r.oid) as "table_comment",
    a.attnum as "column_number",
    a.attname::text as "column_name",
    a.attnotnull as "not_null",
    format_type(atttypid, atttypmod) as "data_type",
    a.attidentity != '' as "is_identity",
    a.attidentity = 'a' as "is_identity_always",
    a.attgenerated != '' as "is_generated",
    (
        select col.collname::text
        from pg_catalog.pg_collation col, pg_catalog.pg_type t
        where col.oid = a.attcollation
          and t.oid = a.atttypid
          and a.attcollation <> t.typcollation
    ) as "collation",
    pg_get_expr(ad.adbin, ad.adrelid) as "default_def",
    col_description(r.oid, a.attnum) as "column_comment"
from
    r
    left join pg_catalog.pg_attribute a
        on r.oid = a.attrelid and a.attnum > 0
    left join pg_catalog.pg_attrdef ad
        on a.attrelid = ad.adrelid
        and a.attnum = ad.adnum
where a.attisdropped is not true
order by "table_schema", "table_name", "column_number"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    fn users_table() -> Table {
        Table {
            schema: "public".into(),
            name: "users".into(),
            columns: vec![
                Column {
                    number: 1,
                    name: "id".into(),
                    not_null: true,
                    data_type: "bigint".into(),
                    is_identity: true,
                    is_identity_always: true,
                    sequence: Some("public.users_id_seq".into()),
                    ..Default::default()
                },
                Column {
                    number: 2,
                    name: "email".into(),
                    not_null: true,
                    data_type: "text".into(),
                    ..Default::default()
                },
            ],
            indexes: vec![
                Index {
                    schema: "public".into(),
                    table_name: "users".into(),
                    name: "users_pkey".into(),
                    definition: "CREATE UNIQUE INDEX users_pkey ON public.users USING btree (id)"
                        .into(),
                    index_columns: vec!["id".into()],
                    is_unique: true,
                    is_primary_key: true,
                    ..Default::default()
                },
                Index {
                    schema: "public".into(),
                    table_name: "users".into(),
                    name: "users_email_key".into(),
                    definition:
                        "CREATE UNIQUE INDEX users_email_key ON public.users USING btree (email)"
                            .into(),
                    index_columns: vec!["email".into()],
                    is_unique: true,
                    ..Default::default()
                },
            ],
            sequences: vec![Sequence {
                schema: "public".into(),
                name: "users_id_seq".into(),
                data_type: "bigint".into(),
                table_name: Some("users".into()),
                column_name: Some("id".into()),
                is_identity: true,
                is_identity_always: true,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_single_column_indexes_become_modifiers() {
        let rendered = users_table().render();
        assert!(rendered.contains("id bigint PRIMARY KEY NOT NULL GENERATED ALWAYS AS IDENTITY"));
        assert!(rendered.contains("email text UNIQUE NOT NULL"));
        // The standalone index statements are suppressed.
        assert!(!rendered.contains("CREATE UNIQUE INDEX"));
    }

    #[test]
    fn test_identity_sequence_not_rendered() {
        let rendered = users_table().render();
        assert!(!rendered.contains("CREATE SEQUENCE"));
        assert!(!rendered.contains("OWNED BY"));
    }

    #[test]
    fn test_owned_serial_sequence_rendered_before_table() {
        let mut table = users_table();
        // Make it a serial-style sequence rather than an identity one.
        table.columns[0].is_identity = false;
        table.columns[0].default_def =
            Some("nextval('users_id_seq'::regclass)".into());
        table.sequences[0].is_identity = false;
        table.sequences[0].is_identity_always = false;

        let rendered = table.render();
        let seq_pos = rendered.find("CREATE SEQUENCE public.users_id_seq").unwrap();
        let table_pos = rendered.find("CREATE TABLE public.users").unwrap();
        let owned_pos = rendered.find("ALTER SEQUENCE public.users_id_seq OWNED BY").unwrap();
        assert!(seq_pos < table_pos);
        assert!(table_pos < owned_pos);
    }

    #[test]
    fn test_comments_emitted_after_body() {
        let mut table = users_table();
        table.comment = Some("application users".into());
        table.columns[1].comment = Some("unique login email".into());
        let rendered = table.render();
        assert!(rendered.contains("COMMENT ON TABLE public.users IS 'application users';"));
        assert!(rendered
            .contains("COMMENT ON COLUMN public.users.email IS 'unique login email';"));
    }

    #[test]
    fn test_multi_column_index_follows_body() {
        let mut table = users_table();
        table.indexes.push(Index {
            schema: "public".into(),
            table_name: "users".into(),
            name: "users_email_id_idx".into(),
            definition:
                "CREATE INDEX users_email_id_idx ON public.users USING btree (email, id)".into(),
            index_columns: vec!["email".into(), "id".into()],
            ..Default::default()
        });
        let rendered = table.render();
        assert!(rendered.contains(
            "CREATE INDEX users_email_id_idx ON public.users USING btree (email, id);"
        ));
    }

    #[test]
    fn test_check_constraint_follows_body() {
        let mut table = users_table();
        table.constraints.push(Constraint {
            schema: "public".into(),
            name: "users_email_check".into(),
            table_name: "users".into(),
            definition: "CHECK (email <> '')".into(),
            constraint_type: "check".into(),
            ..Default::default()
        });
        let rendered = table.render();
        assert!(rendered.contains("ADD CONSTRAINT users_email_check"));
    }
}
