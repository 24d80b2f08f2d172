//! PostgreSQL quoting helpers shared by the migration engine and the dumper.
//!
//! Identifiers (table, column, schema, function names) cannot be passed as
//! parameters in prepared statements, so any dynamic DDL has to splice them
//! into the statement text. These helpers quote conservatively: an identifier
//! is emitted verbatim only when it is guaranteed to mean the same thing
//! unquoted in every positional context.

mod keywords;
mod quote;

pub use keywords::is_keyword;
pub use quote::{parse_table_name, qualified, quote_identifier, quote_literal};
