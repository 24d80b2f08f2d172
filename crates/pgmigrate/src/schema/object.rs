//! The contract shared by every kind of dumped database object.

/// A database object that can participate in dependency-respecting ordering.
///
/// `sort_key` is the object's fully-qualified `schema.name` identifier,
/// unique across the whole dump. `depends_on` lists the sort keys of objects
/// that must be emitted first; keys that refer to objects outside the dump
/// are ignored by the sort.
pub trait Sortable {
    fn sort_key(&self) -> String;
    fn depends_on(&self) -> Vec<String>;
}

/// A [`Sortable`] object that renders to DDL and can pick up extra
/// dependency edges (from `pg_depend` or from user configuration).
pub trait DbObject: Sortable {
    fn add_dependency(&mut self, dep: String);
    fn render(&self) -> String;
}
