//! Installed extensions.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::{qualified, quote_identifier};

#[derive(Debug, Clone, Default)]
pub struct Extension {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub dependencies: Vec<String>,
}

impl Sortable for Extension {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for Extension {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        format!(
            "CREATE EXTENSION IF NOT EXISTS \"{}\" SCHEMA {};",
            self.name.replace('"', "\"\""),
            quote_identifier(&self.schema),
        )
    }
}

pub async fn load_extensions(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<Extension>> {
    let rows = db.query(EXTENSIONS_QUERY, &[&config.schema_names]).await?;
    let mut extensions = Vec::with_capacity(rows.len());
    for row in rows {
        extensions.push(Extension {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            version: row.get(3),
            description: row.get(4),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(extensions))
}

// Query based on psql's `\dx` with `\set ECHO_HIDDEN on` and pg_dump's
// getExtensions.
const EXTENSIONS_QUERY: &str = r#"
select
    e.oid as "oid",
    n.nspname::text as "schema",
    e.extname::text as "name",
    e.extversion as "version",
    c.description as "description"
from pg_catalog.pg_extension e
left join pg_catalog.pg_namespace n
    on n.oid = e.extnamespace
left join pg_catalog.pg_description c
    on c.objoid = e.oid
    and c.classoid = 'pg_catalog.pg_extension'::pg_catalog.regclass
where n.nspname = ANY($1)
order by "schema", "name"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_name_and_schema() {
        let ext = Extension {
            schema: "public".into(),
            name: "pgcrypto".into(),
            version: "1.3".into(),
            ..Default::default()
        };
        assert_eq!(
            ext.render(),
            "CREATE EXTENSION IF NOT EXISTS \"pgcrypto\" SCHEMA public;"
        );
    }
}
