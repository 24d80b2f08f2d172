//! The schema dumper: introspect a live database and render a single
//! deterministic SQL file that recreates it.
//!
//! The dump is designed to be:
//!
//! - **usable**: `psql $NEW -f schema.sql` creates a database with the same
//!   schema;
//! - **diffable**: conflicting migrations on different branches produce a
//!   merge conflict in the generated file;
//! - **roundtrippable**: dumping the recreated database produces the same
//!   bytes;
//! - **customizable**: data tables, extra dependency edges, and header and
//!   footer lines come from configuration.

pub mod column;
pub mod compound_types;
pub mod constraints;
pub mod data;
pub mod dependencies;
pub mod domains;
pub mod enums;
pub mod extensions;
pub mod functions;
pub mod indexes;
pub mod object;
pub mod sequences;
pub mod tables;
pub mod toposort;
pub mod triggers;
pub mod views;

use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio_postgres::GenericClient;

pub use column::Column;
pub use compound_types::CompoundType;
pub use constraints::Constraint;
pub use data::{Data, DataSpec};
pub use dependencies::Dependency;
pub use domains::Domain;
pub use enums::Enum;
pub use extensions::Extension;
pub use functions::Function;
pub use indexes::Index;
pub use object::{DbObject, Sortable};
pub use sequences::Sequence;
pub use tables::Table;
pub use triggers::Trigger;
pub use views::View;

use crate::error::Result;
use crate::pgtools::quote_identifier;

pub const DEFAULT_SCHEMA: &str = "public";

/// Options controlling a dump.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DumpConfig {
    /// The names of the schemas whose contents should be dumped.
    #[serde(default, rename = "names")]
    pub schema_names: Vec<String>,
    /// Where to write the dump; `-` means stdout.
    #[serde(default)]
    pub out: Option<String>,
    /// Extra dependency edges, keyed by sort key.
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Rules for dumping table data as INSERT statements.
    #[serde(default)]
    pub data: Vec<DataSpec>,
    /// Lines prepended to the dump.
    #[serde(default)]
    pub header: Vec<String>,
    /// Lines appended to the dump.
    #[serde(default)]
    pub footer: Vec<String>,
}

/// Everything read from the catalogs for one dump, before and after
/// assembly.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub extensions: Vec<Extension>,
    pub domains: Vec<Domain>,
    pub compound_types: Vec<CompoundType>,
    pub enums: Vec<Enum>,
    pub functions: Vec<Function>,
    pub tables: Vec<Table>,
    pub views: Vec<View>,
    pub sequences: Vec<Sequence>,
    pub indexes: Vec<Index>,
    pub constraints: Vec<Constraint>,
    pub triggers: Vec<Trigger>,
    pub data: Vec<Data>,
    // Metadata that isn't itself dumped.
    pub config: DumpConfig,
    pub dependencies: Vec<Dependency>,
}

/// Read the catalogs and assemble a renderable [`Schema`].
pub async fn parse(mut config: DumpConfig, db: &impl GenericClient) -> Result<Schema> {
    if config.schema_names.is_empty() {
        config.schema_names = vec![DEFAULT_SCHEMA.to_string()];
    }
    let mut schema = load(config, db).await?;
    schema.assemble();
    Ok(schema)
}

/// Read the catalogs and render the dump in one step.
pub async fn dump(config: DumpConfig, db: &impl GenericClient) -> Result<String> {
    Ok(parse(config, db).await?.render())
}

/// Populate every object list from the database. No dependencies are
/// assigned here.
async fn load(config: DumpConfig, db: &impl GenericClient) -> Result<Schema> {
    let mut schema = Schema {
        config,
        ..Default::default()
    };
    schema.extensions = extensions::load_extensions(&schema.config, db).await?;
    schema.domains = domains::load_domains(&schema.config, db).await?;
    schema.compound_types = compound_types::load_compound_types(&schema.config, db).await?;
    schema.enums = enums::load_enums(&schema.config, db).await?;
    schema.functions = functions::load_functions(&schema.config, db).await?;
    schema.tables = tables::load_tables(&schema.config, db).await?;
    schema.views = views::load_views(&schema.config, db).await?;
    schema.sequences = sequences::load_sequences(&schema.config, db).await?;
    schema.indexes = indexes::load_indexes(&schema.config, db).await?;
    schema.constraints = constraints::load_constraints(&schema.config, db).await?;
    schema.triggers = triggers::load_triggers(&schema.config, db).await?;
    schema.dependencies = dependencies::load_dependencies(&schema.config, db).await?;
    schema.data = data::load_data(&schema.config, db).await?;
    Ok(schema)
}

/// Addresses one object in a [`Schema`] across the per-kind lists.
#[derive(Debug, Clone, Copy)]
enum ObjectRef {
    Extension(usize),
    Domain(usize),
    CompoundType(usize),
    Enum(usize),
    Function(usize),
    Table(usize),
    View(usize),
    Sequence(usize),
    Index(usize),
    Constraint(usize),
    Trigger(usize),
}

impl Schema {
    /// Wire dependencies and relocate sub-objects into their owning tables.
    /// Pure; separated from [`load`] so it can be exercised without a
    /// database.
    pub fn assemble(&mut self) {
        self.apply_dependency_edges();
        self.attach_indexes();
        self.attach_constraints();
        self.attach_sequences();
        self.attach_triggers();
        self.attach_data_dependencies();
        self.sort();
    }

    /// Apply the `pg_depend`-derived edges and the user-configured extras.
    fn apply_dependency_edges(&mut self) {
        let index = self.object_index();
        let implicit: Vec<(String, String)> = self
            .dependencies
            .iter()
            .map(|dep| (dep.object.key(), dep.depends_on.key()))
            .collect();
        for (from, to) in implicit {
            if let Some(&object_ref) = index.get(&from) {
                self.add_dependency(object_ref, to);
            }
        }
        let explicit: Vec<(String, Vec<String>)> = self
            .config
            .dependencies
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (from, deps) in explicit {
            if let Some(&object_ref) = index.get(&from) {
                for dep in deps {
                    self.add_dependency(object_ref, dep);
                }
            }
        }
    }

    fn object_index(&self) -> HashMap<String, ObjectRef> {
        let mut index = HashMap::new();
        for (i, o) in self.extensions.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Extension(i));
        }
        for (i, o) in self.domains.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Domain(i));
        }
        for (i, o) in self.compound_types.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::CompoundType(i));
        }
        for (i, o) in self.enums.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Enum(i));
        }
        for (i, o) in self.functions.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Function(i));
        }
        for (i, o) in self.tables.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Table(i));
        }
        for (i, o) in self.views.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::View(i));
        }
        for (i, o) in self.sequences.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Sequence(i));
        }
        for (i, o) in self.indexes.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Index(i));
        }
        for (i, o) in self.constraints.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Constraint(i));
        }
        for (i, o) in self.triggers.iter().enumerate() {
            index.insert(o.sort_key(), ObjectRef::Trigger(i));
        }
        index
    }

    fn add_dependency(&mut self, object_ref: ObjectRef, dep: String) {
        match object_ref {
            ObjectRef::Extension(i) => self.extensions[i].add_dependency(dep),
            ObjectRef::Domain(i) => self.domains[i].add_dependency(dep),
            ObjectRef::CompoundType(i) => self.compound_types[i].add_dependency(dep),
            ObjectRef::Enum(i) => self.enums[i].add_dependency(dep),
            ObjectRef::Function(i) => self.functions[i].add_dependency(dep),
            ObjectRef::Table(i) => self.tables[i].add_dependency(dep),
            ObjectRef::View(i) => self.views[i].add_dependency(dep),
            ObjectRef::Sequence(i) => self.sequences[i].add_dependency(dep),
            ObjectRef::Index(i) => self.indexes[i].add_dependency(dep),
            ObjectRef::Constraint(i) => self.constraints[i].add_dependency(dep),
            ObjectRef::Trigger(i) => self.triggers[i].add_dependency(dep),
        }
    }

    fn table_position(&self, key: &str) -> Option<usize> {
        self.tables.iter().position(|t| t.sort_key() == key)
    }

    /// Move indexes onto their owning tables; indexes whose table is not in
    /// the dump stay at top level.
    fn attach_indexes(&mut self) {
        let indexes = std::mem::take(&mut self.indexes);
        for index in indexes {
            match self.table_position(&index.table_key()) {
                Some(t) => self.tables[t].indexes.push(index),
                None => self.indexes.push(index),
            }
        }
    }

    /// Move non-foreign-key constraints onto their owning tables.
    ///
    /// Foreign keys stay at top level so they are emitted only after every
    /// referenced table exists, cycles included. A leftover constraint whose
    /// backing index is part of the dump is dropped entirely: its effect is
    /// reproduced by the column modifier or the index definition.
    fn attach_constraints(&mut self) {
        let index_keys: HashMap<String, ()> = self
            .indexes
            .iter()
            .map(|i| (i.sort_key(), ()))
            .chain(
                self.tables
                    .iter()
                    .flat_map(|t| t.indexes.iter().map(|i| (i.sort_key(), ()))),
            )
            .collect();
        let constraints = std::mem::take(&mut self.constraints);
        for constraint in constraints {
            let is_foreign_key = constraint.foreign_table_key().is_some();
            if !is_foreign_key {
                if let Some(t) = self.table_position(&constraint.table_key()) {
                    self.tables[t].constraints.push(constraint);
                    continue;
                }
                if let Some(index_key) = constraint.index_key() {
                    if index_keys.contains_key(&index_key) {
                        continue;
                    }
                }
            }
            self.constraints.push(constraint);
        }
    }

    /// Move owned sequences onto their tables and point the backing columns
    /// at them.
    fn attach_sequences(&mut self) {
        let sequences = std::mem::take(&mut self.sequences);
        for sequence in sequences {
            let table_position = sequence
                .table_key()
                .and_then(|key| self.table_position(&key));
            match table_position {
                Some(t) => {
                    if let Some(column_name) = sequence.column_name.clone() {
                        let sequence_key = sequence.sort_key();
                        if let Some(column) = self.tables[t]
                            .columns
                            .iter_mut()
                            .find(|c| c.name == column_name)
                        {
                            column.sequence = Some(sequence_key);
                        }
                    }
                    self.tables[t].sequences.push(sequence);
                }
                None => self.sequences.push(sequence),
            }
        }
    }

    fn attach_triggers(&mut self) {
        let triggers = std::mem::take(&mut self.triggers);
        for trigger in triggers {
            match self.table_position(&trigger.table_key()) {
                Some(t) => self.tables[t].triggers.push(trigger),
                None => self.triggers.push(trigger),
            }
        }
    }

    /// Data inserts must run after every table their rows reference: the
    /// owning table's dependencies, plus the targets of the owning table's
    /// foreign keys (which stayed at top level).
    fn attach_data_dependencies(&mut self) {
        let mut deps_by_table: HashMap<String, Vec<String>> = HashMap::new();
        for table in &self.tables {
            deps_by_table.insert(table.sort_key(), table.depends_on());
        }
        for constraint in &self.constraints {
            if let Some(foreign) = constraint.foreign_table_key() {
                deps_by_table
                    .entry(constraint.table_key())
                    .or_default()
                    .push(foreign);
            }
        }
        for data in &mut self.data {
            if let Some(deps) = deps_by_table.get(&data.sort_key()) {
                for dep in deps {
                    data.add_dependency(dep.clone());
                }
            }
        }
    }

    /// Order each kind of object into creation order. No global ordering
    /// across kinds happens here; the renderer decides which kinds share a
    /// dependency-sorted block.
    fn sort(&mut self) {
        self.extensions = toposort::sort(std::mem::take(&mut self.extensions));
        self.domains = toposort::sort(std::mem::take(&mut self.domains));
        self.compound_types = toposort::sort(std::mem::take(&mut self.compound_types));
        self.enums = toposort::sort(std::mem::take(&mut self.enums));
        self.functions = toposort::sort(std::mem::take(&mut self.functions));
        self.tables = toposort::sort(std::mem::take(&mut self.tables));
        self.views = toposort::sort(std::mem::take(&mut self.views));
        self.sequences = toposort::sort(std::mem::take(&mut self.sequences));
        self.indexes = toposort::sort(std::mem::take(&mut self.indexes));
        self.constraints = toposort::sort(std::mem::take(&mut self.constraints));
        self.triggers = toposort::sort(std::mem::take(&mut self.triggers));
        self.data = toposort::sort(std::mem::take(&mut self.data));
    }

    /// Render the complete dump.
    ///
    /// Extensions, schemas, domains, enums, compound types, and functions
    /// are emitted first in fixed category order and are not re-ordered
    /// against each other; every other kind of object may depend on them
    /// without saying so. Sequences, tables, views, indexes, constraints,
    /// and triggers share one dependency-sorted block, and data inserts come
    /// last.
    pub fn render(&self) -> String {
        let mut out = String::new();

        for line in &self.config.header {
            out.push_str(line);
            out.push('\n');
        }
        if !self.config.header.is_empty() {
            out.push('\n');
        }

        for extension in &self.extensions {
            out.push_str(&extension.render());
            out.push_str("\n\n");
        }
        for schema_name in &self.config.schema_names {
            out.push_str(&format!(
                "CREATE SCHEMA IF NOT EXISTS {};\n\n",
                quote_identifier(schema_name)
            ));
        }
        for domain in &self.domains {
            out.push_str(&domain.render());
            out.push_str("\n\n");
        }
        for e in &self.enums {
            out.push_str(&e.render());
            out.push_str("\n\n");
        }
        for compound_type in &self.compound_types {
            out.push_str(&compound_type.render());
            out.push_str("\n\n");
        }
        for function in &self.functions {
            out.push_str(&function.render());
            out.push_str("\n\n");
        }

        let mut sortable: Vec<Mixed<'_>> = Vec::new();
        sortable.extend(self.sequences.iter().map(Mixed::Sequence));
        sortable.extend(self.tables.iter().map(Mixed::Table));
        sortable.extend(self.views.iter().map(Mixed::View));
        sortable.extend(self.indexes.iter().map(Mixed::Index));
        sortable.extend(self.constraints.iter().map(Mixed::Constraint));
        sortable.extend(self.triggers.iter().map(Mixed::Trigger));
        for object in toposort::sort(sortable) {
            out.push_str(&object.render());
            out.push_str("\n\n");
        }

        for data in &self.data {
            let statement = data.render();
            if !statement.is_empty() {
                out.push_str(&statement);
                out.push_str("\n\n");
            }
        }

        for line in &self.config.footer {
            out.push_str(line);
            out.push('\n');
        }

        out.trim().to_string()
    }
}

/// The kinds of objects that share the dependency-sorted block.
enum Mixed<'a> {
    Sequence(&'a Sequence),
    Table(&'a Table),
    View(&'a View),
    Index(&'a Index),
    Constraint(&'a Constraint),
    Trigger(&'a Trigger),
}

impl Sortable for Mixed<'_> {
    fn sort_key(&self) -> String {
        match self {
            Mixed::Sequence(o) => o.sort_key(),
            Mixed::Table(o) => o.sort_key(),
            Mixed::View(o) => o.sort_key(),
            Mixed::Index(o) => o.sort_key(),
            Mixed::Constraint(o) => o.sort_key(),
            Mixed::Trigger(o) => o.sort_key(),
        }
    }

    fn depends_on(&self) -> Vec<String> {
        match self {
            Mixed::Sequence(o) => o.depends_on(),
            Mixed::Table(o) => o.depends_on(),
            Mixed::View(o) => o.depends_on(),
            Mixed::Index(o) => o.depends_on(),
            Mixed::Constraint(o) => o.depends_on(),
            Mixed::Trigger(o) => o.depends_on(),
        }
    }
}

impl Mixed<'_> {
    fn render(&self) -> String {
        match self {
            Mixed::Sequence(o) => o.render(),
            Mixed::Table(o) => o.render(),
            Mixed::View(o) => o.render(),
            Mixed::Index(o) => o.render(),
            Mixed::Constraint(o) => o.render(),
            Mixed::Trigger(o) => o.render(),
        }
    }
}
