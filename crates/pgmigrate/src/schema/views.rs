//! View and materialized-view records.

use tokio_postgres::GenericClient;

use super::column::{scan_column, Column};
use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier, quote_literal};

#[derive(Debug, Clone, Default)]
pub struct View {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    /// Body from `pg_get_viewdef`, semicolon included.
    pub definition: String,
    pub comment: Option<String>,
    pub is_materialized: bool,
    pub columns: Vec<Column>,
    pub dependencies: Vec<String>,
}

impl Sortable for View {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for View {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        let head = if self.is_materialized {
            format!(
                "CREATE MATERIALIZED VIEW {} AS",
                qualified(&self.schema, &self.name)
            )
        } else {
            format!("CREATE VIEW {} AS", qualified(&self.schema, &self.name))
        };
        // pg_get_viewdef is not pretty-printed; indenting the first line by
        // two spaces keeps the output just barely sane.
        let mut def = format!("{}\n  {}", head, self.definition);

        if let Some(comment) = &self.comment {
            def.push_str(&format!(
                "\n\nCOMMENT ON VIEW {} IS {};",
                qualified(&self.schema, &self.name),
                quote_literal(comment),
            ));
        }
        for column in &self.columns {
            if let Some(comment) = &column.comment {
                def.push_str(&format!(
                    "\n\nCOMMENT ON COLUMN {}.{} IS {};",
                    qualified(&self.schema, &self.name),
                    quote_identifier(&column.name),
                    quote_literal(comment),
                ));
            }
        }
        def
    }
}

pub async fn load_views(config: &DumpConfig, db: &impl GenericClient) -> Result<Vec<View>> {
    let rows = db.query(VIEWS_QUERY, &[&config.schema_names]).await?;
    let mut views: Vec<View> = Vec::new();
    for row in rows {
        let oid: u32 = row.get(0);
        if views.last().map(|v| v.oid) != Some(oid) {
            views.push(View {
                oid,
                schema: row.get(1),
                name: row.get(2),
                is_materialized: row.get(3),
                definition: row.get(4),
                comment: row.get(5),
                ..Default::default()
            });
        }
        if let Some(column) = scan_column(&row, 6) {
            views
                .last_mut()
                .expect("view row precedes column rows")
                .columns
                .push(column);
        }
    }
    Ok(super::toposort::sort(views))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
// - psql '\dv+ <view>' with '\set ECHO_HIDDEN on'
const VIEWS_QUERY: &str = r#"
with
extension_relations as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_class'::regclass
),
r as (
    select
        c.oid as "oid",
        c.relname as "name",
        n.nspname as "schema",
        c.relkind = 'm' as "is_materialized",
        pg_get_viewdef(c.oid) as "definition"
    from
        pg_catalog.pg_class c
        inner join pg_catalog.pg_namespace n on n.oid = c.relnamespace
        left join extension_relations er on c.oid = er.oid
    where c.relkind in ('m', 'v')
      and n.nspname = ANY($1)
      and er.oid is null
)
select
    r.oid as "view_oid",
    r.schema::text as "view_schema",
    r.name::text as "view_name",
    r.is_materialized as "view_is_materialized",
    r.definition as "view_definition",
    obj_description(r.oid) as "view_comment",
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
order by "view_schema", "view_name", "column_number"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_plain_view() {
        let view = View {
            schema: "public".into(),
            name: "active_users".into(),
            definition: "SELECT id, email FROM users WHERE active;".into(),
            ..Default::default()
        };
        assert_eq!(
            view.render(),
            "CREATE VIEW public.active_users AS\n  SELECT id, email FROM users WHERE active;"
        );
    }

    #[test]
    fn test_render_materialized_view_with_comment() {
        let view = View {
            schema: "public".into(),
            name: "user_counts".into(),
            definition: "SELECT count(*) FROM users;".into(),
            is_materialized: true,
            comment: Some("refreshed nightly".into()),
            ..Default::default()
        };
        let rendered = view.render();
        assert!(rendered.starts_with("CREATE MATERIALIZED VIEW public.user_counts AS"));
        assert!(rendered.contains("COMMENT ON VIEW public.user_counts IS 'refreshed nightly';"));
    }
}
