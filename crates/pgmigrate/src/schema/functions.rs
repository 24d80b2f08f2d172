//! Function and procedure records.

use tokio_postgres::GenericClient;

use super::object::{DbObject, Sortable};
use super::DumpConfig;
use crate::error::Result;
use crate::pgtools::qualified;

#[derive(Debug, Clone, Default)]
pub struct Function {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub language: String,
    /// `func` or `proc`; aggregates and window functions are excluded at the
    /// query level because `pg_get_functiondef` cannot render them.
    pub kind: String,
    /// `immutable`, `stable`, or `volatile`.
    pub volatility: String,
    /// `restricted`, `safe`, or `unsafe`.
    pub parallel: String,
    /// `definer` or `invoker`.
    pub security: String,
    pub result_type: String,
    pub argument_types: String,
    /// Complete statement from `pg_get_functiondef`.
    pub definition: String,
    pub dependencies: Vec<String>,
}

impl Sortable for Function {
    fn sort_key(&self) -> String {
        qualified(&self.schema, &self.name)
    }

    fn depends_on(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

impl DbObject for Function {
    fn add_dependency(&mut self, dep: String) {
        self.dependencies.push(dep);
    }

    fn render(&self) -> String {
        format!("{};", self.definition)
    }
}

pub async fn load_functions(
    config: &DumpConfig,
    db: &impl GenericClient,
) -> Result<Vec<Function>> {
    let rows = db.query(FUNCTIONS_QUERY, &[&config.schema_names]).await?;
    let mut functions = Vec::with_capacity(rows.len());
    for row in rows {
        functions.push(Function {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            language: row.get(3),
            kind: row.get(4),
            volatility: row.get(5),
            parallel: row.get(6),
            security: row.get(7),
            result_type: row.get(8),
            argument_types: row.get(9),
            definition: row.get(10),
            dependencies: Vec::new(),
        });
    }
    Ok(super::toposort::sort(functions))
}

// This query is inspired heavily by:
// - djrobstep/schemainspect https://github.com/djrobstep/schemainspect
// - psql '\df+ <function>' with '\set ECHO_HIDDEN on'
const FUNCTIONS_QUERY: &str = r#"
with
extensions as (
    select objid as "oid"
    from pg_depend d
    where d.refclassid = 'pg_extension'::regclass
      and d.classid = 'pg_proc'::regclass
)
select
    p.oid as "oid",
    p.pronamespace::regnamespace::text as "schema",
    p.proname::text as "name",
    l.lanname::text as "language",
    case p.prokind
        when 'p' then 'proc'
        else 'func'
    end as "kind",
    case p.provolatile
        when 'i' then 'immutable'
        when 's' then 'stable'
        when 'v' then 'volatile'
    end as "volatility",
    case p.proparallel
        when 'r' then 'restricted'
        when 's' then 'safe'
        when 'u' then 'unsafe'
    end as "parallel",
    case p.prosecdef
        when true then 'definer'
        else 'invoker'
    end as "security",
    coalesce(pg_catalog.pg_get_function_result(p.oid), '') as "result_type",
    coalesce(pg_catalog.pg_get_function_arguments(p.oid), '') as "argument_types",
    pg_catalog.pg_get_functiondef(p.oid) as "definition"
from pg_catalog.pg_proc p
left join extensions e on p.oid = e.oid
left join pg_catalog.pg_language l on l.oid = p.prolang
where
    e.oid is null
    -- 'f' = function, 'p' = procedure; aggregates ('a') and window
    -- functions ('w') have no pg_get_functiondef.
    and p.prokind in ('f', 'p')
    and p.pronamespace::regnamespace::text = ANY($1)
order by "schema", "name"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_appends_semicolon() {
        let f = Function {
            schema: "public".into(),
            name: "touch_updated_at".into(),
            definition: "CREATE OR REPLACE FUNCTION public.touch_updated_at()\n RETURNS trigger\n LANGUAGE plpgsql\nAS $function$\nBEGIN\n  NEW.updated_at = now();\n  RETURN NEW;\nEND\n$function$".into(),
            ..Default::default()
        };
        assert!(f.render().ends_with("$function$;"));
        assert_eq!(f.sort_key(), "public.touch_updated_at");
    }
}
