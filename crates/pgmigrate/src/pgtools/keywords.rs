//! Reserved-keyword table for identifier quoting.
//!
//! From <https://www.postgresql.org/docs/current/sql-keywords-appendix.html>,
//! every keyword labeled as one of:
//!
//! - reserved
//! - non-reserved (cannot be function or type)
//! - requires AS
//!
//! Any of these means the bare identifier misbehaves in at least one
//! positional context (table, column, type, or function name), so such
//! identifiers are always quoted.

/// Returns true if `identifier` (already lowercased) is a PostgreSQL keyword
/// that requires quoting.
pub fn is_keyword(identifier: &str) -> bool {
    KEYWORDS.binary_search(&identifier).is_ok()
}

// Sorted; `is_keyword` relies on binary search.
static KEYWORDS: &[&str] = &[
    "all",
    "analyse",
    "analyze",
    "and",
    "any",
    "array",
    "as",
    "asc",
    "asymmetric",
    "authorization",
    "between",
    "bigint",
    "binary",
    "bit",
    "boolean",
    "both",
    "case",
    "cast",
    "char",
    "character",
    "characteristics",
    "check",
    "coalesce",
    "collate",
    "collation",
    "column",
    "concurrently",
    "constraint",
    "create",
    "cross",
    "current_catalog",
    "current_date",
    "current_role",
    "current_schema",
    "current_time",
    "current_timestamp",
    "current_user",
    "day",
    "dec",
    "decimal",
    "default",
    "deferrable",
    "desc",
    "distinct",
    "do",
    "else",
    "end",
    "except",
    "exists",
    "fetch",
    "filter",
    "float",
    "for",
    "foreign",
    "freeze",
    "from",
    "full",
    "grant",
    "greatest",
    "group",
    "grouping",
    "having",
    "hour",
    "ilike",
    "in",
    "initially",
    "inner",
    "inout",
    "instead",
    "int",
    "integer",
    "intersect",
    "interval",
    "into",
    "is",
    "isnull",
    "join",
    "json",
    "json_array",
    "json_arrayagg",
    "json_exists",
    "json_object",
    "json_objectagg",
    "json_query",
    "json_scalar",
    "json_serialize",
    "json_table",
    "json_value",
    "lateral",
    "leading",
    "least",
    "left",
    "like",
    "limit",
    "localtime",
    "localtimestamp",
    "merge_action",
    "minute",
    "month",
    "national",
    "natural",
    "nchar",
    "none",
    "normalize",
    "not",
    "notnull",
    "null",
    "nullif",
    "numeric",
    "offset",
    "on",
    "only",
    "or",
    "order",
    "out",
    "outer",
    "over",
    "overlaps",
    "overlay",
    "placing",
    "position",
    "precision",
    "primary",
    "real",
    "references",
    "returning",
    "right",
    "row",
    "second",
    "select",
    "session_user",
    "setof",
    "similar",
    "smallint",
    "some",
    "substring",
    "symmetric",
    "system_user",
    "table",
    "tablesample",
    "then",
    "time",
    "timestamp",
    "to",
    "trailing",
    "treat",
    "true",
    "union",
    "unique",
    "user",
    "using",
    "values",
    "varchar",
    "variadic",
    "varying",
    "verbose",
    "when",
    "where",
    "window",
    "with",
    "within",
    "without",
    "xmlattributes",
    "xmlconcat",
    "xmlelement",
    "xmlexists",
    "xmlforest",
    "xmlnamespaces",
    "xmlparse",
    "xmlpi",
    "xmlroot",
    "xmlserialize",
    "xmltable",
    "year",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_sorted() {
        let mut sorted = KEYWORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(KEYWORDS, sorted.as_slice());
    }

    #[test]
    fn test_reserved_words_detected() {
        assert!(is_keyword("select"));
        assert!(is_keyword("table"));
        assert!(is_keyword("user"));
        assert!(is_keyword("order"));
        assert!(is_keyword("between"));
    }

    #[test]
    fn test_ordinary_identifiers_pass() {
        assert!(!is_keyword("users"));
        assert!(!is_keyword("account_id"));
        assert!(!is_keyword(""));
    }
}
