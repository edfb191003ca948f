//! Typed update, key-condition and write-condition expressions
//!
//! Expressions are kept as values until a wire gateway renders them. Rendering
//! binds every value to a `:vN` placeholder and every attribute name that is a
//! reserved word (or not a plain identifier) to a `#nN` placeholder, so no caller
//! data is ever spliced into expression text.

use std::collections::HashMap;

use crate::codec::{AttributeKind, AttributeValue, Field, Item};
use crate::errors::{Error, Result};
use crate::key::{KeySchema, PrimaryKey};

/// Reserved words of the expression grammar, lowercase and sorted
/// (<https://docs.aws.amazon.com/amazondynamodb/latest/developerguide/ReservedWords.html>)
#[rustfmt::skip]
const RESERVED_WORDS: &[&str] = &[
    "abort", "absolute", "action", "add", "after", "agent", "aggregate", "all", "allocate",
    "alter", "analyze", "and", "any", "archive", "are", "array", "as", "asc", "ascii",
    "asensitive", "assertion", "asymmetric", "at", "atomic", "attach", "attribute", "auth",
    "authorization", "authorize", "auto", "avg", "back", "backup", "base", "batch", "before",
    "begin", "between", "bigint", "binary", "bit", "blob", "block", "boolean", "both",
    "breadth", "bucket", "bulk", "by", "byte", "call", "called", "calling", "capacity",
    "cascade", "cascaded", "case", "cast", "catalog", "char", "character", "check", "class",
    "clob", "close", "cluster", "clustered", "clustering", "clusters", "coalesce", "collate",
    "collation", "collection", "column", "columns", "combine", "comment", "commit", "compact",
    "compile", "compress", "condition", "conflict", "connect", "connection", "consistency",
    "consistent", "constraint", "constraints", "constructor", "consumed", "continue", "convert",
    "copy", "corresponding", "count", "counter", "create", "cross", "cube", "current", "cursor",
    "cycle", "data", "database", "date", "datetime", "day", "deallocate", "dec", "decimal",
    "declare", "default", "deferrable", "deferred", "define", "defined", "definition", "delete",
    "delimited", "depth", "deref", "desc", "describe", "descriptor", "detach", "deterministic",
    "diagnostics", "directories", "disable", "disconnect", "distinct", "distribute", "do",
    "domain", "double", "drop", "dump", "duration", "dynamic", "each", "element", "else",
    "elseif", "empty", "enable", "end", "equal", "equals", "error", "escape", "escaped", "eval",
    "evaluate", "exceeded", "except", "exception", "exceptions", "exclusive", "exec", "execute",
    "exists", "exit", "explain", "explode", "export", "expression", "extended", "external",
    "extract", "fail", "false", "family", "fetch", "fields", "file", "filter", "filtering",
    "final", "finish", "first", "fixed", "flattern", "float", "for", "force", "foreign",
    "format", "forward", "found", "free", "from", "full", "function", "functions", "general",
    "generate", "get", "glob", "global", "go", "goto", "grant", "greater", "group", "grouping",
    "handler", "hash", "have", "having", "heap", "hidden", "hold", "hour", "identified",
    "identity", "if", "ignore", "immediate", "import", "in", "including", "inclusive",
    "increment", "incremental", "index", "indexed", "indexes", "indicator", "infinite",
    "initially", "inline", "inner", "innter", "inout", "input", "insensitive", "insert",
    "instead", "int", "integer", "intersect", "interval", "into", "invalidate", "is",
    "isolation", "item", "items", "iterate", "join", "key", "keys", "lag", "language", "large",
    "last", "lateral", "lead", "leading", "leave", "left", "length", "less", "level", "like",
    "limit", "limited", "lines", "list", "load", "local", "localtime", "localtimestamp",
    "location", "locator", "lock", "locks", "log", "loged", "long", "loop", "lower", "map",
    "match", "materialized", "max", "maxlen", "member", "merge", "method", "metrics", "min",
    "minus", "minute", "missing", "mod", "mode", "modifies", "modify", "module", "month",
    "multi", "multiset", "name", "names", "national", "natural", "nchar", "nclob", "new",
    "next", "no", "none", "not", "null", "nullif", "number", "numeric", "object", "of",
    "offline", "offset", "old", "on", "online", "only", "opaque", "open", "operator", "option",
    "or", "order", "ordinality", "other", "others", "out", "outer", "output", "over",
    "overlaps", "override", "owner", "pad", "parallel", "parameter", "parameters", "partial",
    "partition", "partitioned", "partitions", "path", "percent", "percentile", "permission",
    "permissions", "pipe", "pipelined", "plan", "pool", "position", "precision", "prepare",
    "preserve", "primary", "prior", "private", "privileges", "procedure", "processed",
    "project", "projection", "property", "provisioning", "public", "put", "query", "quit",
    "quorum", "raise", "random", "range", "rank", "raw", "read", "reads", "real", "rebuild",
    "record", "recursive", "reduce", "ref", "reference", "references", "referencing", "regexp",
    "region", "reindex", "relative", "release", "remainder", "rename", "repeat", "replace",
    "request", "reset", "resignal", "resource", "response", "restore", "restrict", "result",
    "return", "returning", "returns", "reverse", "revoke", "right", "role", "roles", "rollback",
    "rollup", "routine", "row", "rows", "rule", "rules", "sample", "satisfies", "save",
    "savepoint", "scan", "schema", "scope", "scroll", "search", "second", "section", "segment",
    "segments", "select", "self", "semi", "sensitive", "separate", "sequence", "serializable",
    "session", "set", "sets", "shard", "share", "shared", "short", "show", "signal", "similar",
    "size", "skewed", "smallint", "snapshot", "some", "source", "space", "spaces", "sparse",
    "specific", "specifictype", "split", "sql", "sqlcode", "sqlerror", "sqlexception",
    "sqlstate", "sqlwarning", "start", "state", "static", "status", "storage", "store",
    "stored", "stream", "string", "struct", "style", "sub", "submultiset", "subpartition",
    "substring", "subtype", "sum", "super", "symmetric", "synonym", "system", "table",
    "tablesample", "temp", "temporary", "terminated", "text", "than", "then", "throughput",
    "time", "timestamp", "timezone", "tinyint", "to", "token", "total", "touch", "trailing",
    "transaction", "transform", "translate", "translation", "treat", "trigger", "trim", "true",
    "truncate", "ttl", "tuple", "type", "under", "undo", "union", "unique", "unit", "unknown",
    "unlogged", "unnest", "unprocessed", "unsigned", "until", "update", "upper", "url", "usage",
    "use", "user", "users", "using", "uuid", "vacuum", "value", "valued", "values", "varchar",
    "variable", "variance", "varint", "varying", "view", "views", "virtual", "void", "wait",
    "when", "whenever", "where", "while", "window", "with", "within", "without", "work",
    "wrapped", "write", "year", "zone",
];

/// True if `name` collides with a reserved word (case-insensitive)
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS
        .binary_search(&name.to_ascii_lowercase().as_str())
        .is_ok()
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Whether an attribute name must go through a `#name` placeholder
pub fn needs_name_placeholder(name: &str) -> bool {
    is_reserved_word(name) || !is_plain_identifier(name)
}

/// Conversion of plain Rust values into attribute values.
///
/// Not implemented for floats; pass finite numbers as `AttributeValue::N`.
pub trait IntoAttribute {
    fn into_attribute(self) -> AttributeValue;
}

impl IntoAttribute for AttributeValue {
    fn into_attribute(self) -> AttributeValue {
        self
    }
}

impl IntoAttribute for String {
    fn into_attribute(self) -> AttributeValue {
        AttributeValue::S(self)
    }
}

impl IntoAttribute for &str {
    fn into_attribute(self) -> AttributeValue {
        AttributeValue::S(self.to_string())
    }
}

impl IntoAttribute for bool {
    fn into_attribute(self) -> AttributeValue {
        AttributeValue::Bool(self)
    }
}

impl IntoAttribute for i64 {
    fn into_attribute(self) -> AttributeValue {
        AttributeValue::N(self.to_string())
    }
}

impl IntoAttribute for u64 {
    fn into_attribute(self) -> AttributeValue {
        AttributeValue::N(self.to_string())
    }
}

/// Placeholder bindings collected while rendering one request's expressions.
///
/// Name and value placeholders live in disjoint namespaces (`#nN`, `:vN`).
#[derive(Debug, Default)]
pub struct Placeholders {
    names: HashMap<String, String>,
    values: Item,
}

impl Placeholders {
    pub fn new() -> Self {
        Self::default()
    }

    /// The token to use for an attribute name in expression text
    pub fn name(&mut self, attribute: &str) -> String {
        if !needs_name_placeholder(attribute) {
            return attribute.to_string();
        }
        if let Some((placeholder, _)) = self.names.iter().find(|(_, a)| a.as_str() == attribute) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        placeholder
    }

    /// Bind a value and return its placeholder
    pub fn value(&mut self, value: AttributeValue) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Name and value maps, `None` when empty (the store rejects empty maps)
    pub fn into_parts(self) -> (Option<HashMap<String, String>>, Option<Item>) {
        let names = (!self.names.is_empty()).then_some(self.names);
        let values = (!self.values.is_empty()).then_some(self.values);
        (names, values)
    }
}

/// Absolute `SET` assignments for an update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetFields {
    assignments: Vec<(String, AttributeValue)>,
}

impl SetFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl IntoAttribute) -> Self {
        self.assignments.push((field.into(), value.into_attribute()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.assignments.iter().map(|(f, v)| (f.as_str(), v))
    }

    /// At least one field, no duplicates, no key attributes, and every declared
    /// field keeps the tag it is stored under
    pub fn validate(&self, schema: &KeySchema, fields: &[Field]) -> Result<()> {
        if self.assignments.is_empty() {
            return Err(Error::Validation("update sets no fields".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for (field, value) in &self.assignments {
            if field.is_empty() {
                return Err(Error::Validation("empty attribute name in update".to_string()));
            }
            if schema.is_key_attribute(field) {
                return Err(Error::Validation(format!(
                    "cannot update key attribute `{}`",
                    field
                )));
            }
            if !seen.insert(field.as_str()) {
                return Err(Error::Validation(format!(
                    "attribute `{}` is set more than once",
                    field
                )));
            }
            if let AttributeValue::N(n) = value {
                if !n.parse::<f64>().is_ok_and(f64::is_finite) {
                    return Err(Error::Validation(format!(
                        "attribute `{}` is not a finite number: {}",
                        field, n
                    )));
                }
            }
            if let Some(declared) = fields.iter().find(|f| f.name == field.as_str()) {
                let found = AttributeKind::of(value);
                if found != declared.kind {
                    return Err(Error::Validation(format!(
                        "attribute `{}` is stored as {}, not {}",
                        field, declared.kind, found
                    )));
                }
            }
        }
        Ok(())
    }

    /// Apply to an item in place, returning the updated attributes
    pub fn apply(&self, item: &mut Item) -> Item {
        let mut updated = Item::with_capacity(self.assignments.len());
        for (field, value) in &self.assignments {
            item.insert(field.clone(), value.clone());
            updated.insert(field.clone(), value.clone());
        }
        updated
    }

    /// `SET a = :v0, #n0 = :v1`
    pub fn render(&self, placeholders: &mut Placeholders) -> String {
        let clauses = self
            .assignments
            .iter()
            .map(|(field, value)| {
                let name = placeholders.name(field);
                let value = placeholders.value(value.clone());
                format!("{} = {}", name, value)
            })
            .collect::<Vec<_>>();
        format!("SET {}", clauses.join(", "))
    }
}

/// Condition on the sort key of a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortCondition {
    Equal(String),
    LessThan(String),
    LessOrEqual(String),
    GreaterThan(String),
    GreaterOrEqual(String),
    /// Inclusive on both ends
    Between(String, String),
    BeginsWith(String),
}

impl SortCondition {
    pub fn matches(&self, sort: &str) -> bool {
        match self {
            SortCondition::Equal(v) => sort == v,
            SortCondition::LessThan(v) => sort < v.as_str(),
            SortCondition::LessOrEqual(v) => sort <= v.as_str(),
            SortCondition::GreaterThan(v) => sort > v.as_str(),
            SortCondition::GreaterOrEqual(v) => sort >= v.as_str(),
            SortCondition::Between(low, high) => sort >= low.as_str() && sort <= high.as_str(),
            SortCondition::BeginsWith(prefix) => sort.starts_with(prefix.as_str()),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            SortCondition::Between(low, high) if low > high => Err(Error::Validation(format!(
                "BETWEEN bounds out of order: {} > {}",
                low, high
            ))),
            SortCondition::Between(low, high) if low.is_empty() || high.is_empty() => {
                Err(Error::Validation("empty sort key bound".to_string()))
            }
            SortCondition::Equal(v)
            | SortCondition::LessThan(v)
            | SortCondition::LessOrEqual(v)
            | SortCondition::GreaterThan(v)
            | SortCondition::GreaterOrEqual(v)
            | SortCondition::BeginsWith(v)
                if v.is_empty() =>
            {
                Err(Error::Validation("empty sort key bound".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn render(&self, name: &str, placeholders: &mut Placeholders) -> String {
        let mut bind = |v: &String| placeholders.value(AttributeValue::S(v.clone()));
        match self {
            SortCondition::Equal(v) => format!("{} = {}", name, bind(v)),
            SortCondition::LessThan(v) => format!("{} < {}", name, bind(v)),
            SortCondition::LessOrEqual(v) => format!("{} <= {}", name, bind(v)),
            SortCondition::GreaterThan(v) => format!("{} > {}", name, bind(v)),
            SortCondition::GreaterOrEqual(v) => format!("{} >= {}", name, bind(v)),
            SortCondition::Between(low, high) => {
                let low = bind(low);
                let high = bind(high);
                format!("{} BETWEEN {} AND {}", name, low, high)
            }
            SortCondition::BeginsWith(prefix) => format!("begins_with({}, {})", name, bind(prefix)),
        }
    }
}

/// Key condition of a query: a fixed partition and an optional sort key range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub partition: String,
    pub sort: Option<SortCondition>,
}

impl KeyCondition {
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }

    pub fn with_sort(mut self, sort: SortCondition) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.partition.is_empty() {
            return Err(Error::InvalidKey("partition key is empty".to_string()));
        }
        match &self.sort {
            Some(sort) => sort.validate(),
            None => Ok(()),
        }
    }

    pub fn matches(&self, key: &PrimaryKey) -> bool {
        key.partition() == self.partition
            && self.sort.as_ref().map_or(true, |s| s.matches(key.sort()))
    }

    /// `Artist = :v0 AND ReleaseDate > :v1`
    pub fn render(&self, schema: &KeySchema, placeholders: &mut Placeholders) -> String {
        let partition_name = placeholders.name(&schema.partition_key);
        let partition_value = placeholders.value(AttributeValue::S(self.partition.clone()));
        let partition = format!("{} = {}", partition_name, partition_value);

        match &self.sort {
            Some(sort) => {
                let sort_name = placeholders.name(&schema.sort_key);
                format!("{} AND {}", partition, sort.render(&sort_name, placeholders))
            }
            None => partition,
        }
    }
}

/// Precondition on the current state of an item, checked by the store
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    AttributeExists(String),
    AttributeNotExists(String),
    Equals(String, AttributeValue),
    NotEquals(String, AttributeValue),
    And(Box<Condition>, Box<Condition>),
}

impl Condition {
    pub fn exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeExists(attribute.into())
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeNotExists(attribute.into())
    }

    pub fn equals(attribute: impl Into<String>, value: impl IntoAttribute) -> Self {
        Condition::Equals(attribute.into(), value.into_attribute())
    }

    pub fn not_equals(attribute: impl Into<String>, value: impl IntoAttribute) -> Self {
        Condition::NotEquals(attribute.into(), value.into_attribute())
    }

    pub fn and(self, other: Condition) -> Self {
        Condition::And(Box::new(self), Box::new(other))
    }

    /// Evaluate against the current item (`None` when the item does not exist)
    pub fn evaluate(&self, item: Option<&Item>) -> bool {
        let attr = |name: &String| item.and_then(|i| i.get(name.as_str()));
        match self {
            Condition::AttributeExists(name) => attr(name).is_some(),
            Condition::AttributeNotExists(name) => attr(name).is_none(),
            Condition::Equals(name, value) => attr(name) == Some(value),
            Condition::NotEquals(name, value) => attr(name) != Some(value),
            Condition::And(left, right) => left.evaluate(item) && right.evaluate(item),
        }
    }

    pub fn render(&self, placeholders: &mut Placeholders) -> String {
        match self {
            Condition::AttributeExists(name) => {
                format!("attribute_exists({})", placeholders.name(name))
            }
            Condition::AttributeNotExists(name) => {
                format!("attribute_not_exists({})", placeholders.name(name))
            }
            Condition::Equals(name, value) => {
                let name = placeholders.name(name);
                format!("{} = {}", name, placeholders.value(value.clone()))
            }
            Condition::NotEquals(name, value) => {
                let name = placeholders.name(name);
                format!("{} <> {}", name, placeholders.value(value.clone()))
            }
            Condition::And(left, right) => {
                let left = left.render(placeholders);
                format!("({}) AND ({})", left, right.render(placeholders))
            }
        }
    }
}
