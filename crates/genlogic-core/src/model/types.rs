//! Resolved schema model — the canonical representation produced by the
//! schema resolver (C1) and consumed by every later stage. Nothing here is
//! mutated once built; each stage produces its own new value from its
//! predecessor's output.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Identifier grammar shared by every name the compiler accepts or emits:
/// `^[A-Za-z_][A-Za-z0-9_]*$`, checked by hand rather than via a compiled
/// `Regex` since it runs on every column/table name the resolver sees and
/// the pattern is simple enough not to need one.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Normalized column type, after inheritance resolution every column has
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BaseType {
    Integer,
    Bigint,
    Smallint,
    Numeric,
    Real,
    Double,
    Boolean,
    Varchar,
    Char,
    Text,
    Bit,
    Date,
    Timestamp,
    Timestamptz,
    Uuid,
    Json,
    Jsonb,
}

impl BaseType {
    /// `size` is required by this type.
    pub fn requires_size(self) -> bool {
        matches!(self, BaseType::Varchar | BaseType::Char | BaseType::Bit)
    }

    /// `size` and `decimal` are both optional for this type, with `decimal`
    /// requiring `size` to also be present.
    pub fn allows_optional_size_and_decimal(self) -> bool {
        matches!(self, BaseType::Numeric)
    }

    /// The default literal used for an aggregation column of this type, so
    /// trigger arithmetic never needs a `COALESCE` on the parent side.
    pub fn aggregation_default(self) -> &'static str {
        match self {
            BaseType::Boolean => "FALSE",
            BaseType::Varchar | BaseType::Char | BaseType::Text => "''",
            _ => "0",
        }
    }

    /// SQL type name used when emitting `CREATE TABLE` column definitions.
    pub fn sql_name(self) -> &'static str {
        match self {
            BaseType::Integer => "integer",
            BaseType::Bigint => "bigint",
            BaseType::Smallint => "smallint",
            BaseType::Numeric => "numeric",
            BaseType::Real => "real",
            BaseType::Double => "double precision",
            BaseType::Boolean => "boolean",
            BaseType::Varchar => "varchar",
            BaseType::Char => "char",
            BaseType::Text => "text",
            BaseType::Bit => "bit",
            BaseType::Date => "date",
            BaseType::Timestamp => "timestamp",
            BaseType::Timestamptz => "timestamptz",
            BaseType::Uuid => "uuid",
            BaseType::Json => "json",
            BaseType::Jsonb => "jsonb",
        }
    }

    /// Parse the `base_type` string from a column declaration. `"decimal"`
    /// is accepted as an alias for `numeric`.
    pub fn parse(raw: &str) -> Option<BaseType> {
        Some(match raw.trim().to_lowercase().as_str() {
            "integer" => BaseType::Integer,
            "bigint" => BaseType::Bigint,
            "smallint" => BaseType::Smallint,
            "numeric" | "decimal" => BaseType::Numeric,
            "real" => BaseType::Real,
            "double" => BaseType::Double,
            "boolean" => BaseType::Boolean,
            "varchar" => BaseType::Varchar,
            "char" => BaseType::Char,
            "text" => BaseType::Text,
            "bit" => BaseType::Bit,
            "date" => BaseType::Date,
            "timestamp" => BaseType::Timestamp,
            "timestamptz" => BaseType::Timestamptz,
            "uuid" => BaseType::Uuid,
            "json" => BaseType::Json,
            "jsonb" => BaseType::Jsonb,
            _ => return None,
        })
    }
}

/// Referential action on a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    Restrict,
    Cascade,
    SetNull,
    NoAction,
}

impl Default for OnDelete {
    fn default() -> Self {
        OnDelete::NoAction
    }
}

impl OnDelete {
    pub fn sql(self) -> &'static str {
        match self {
            OnDelete::Restrict => "RESTRICT",
            OnDelete::Cascade => "CASCADE",
            OnDelete::SetNull => "SET NULL",
            OnDelete::NoAction => "NO ACTION",
        }
    }
}

/// An aggregation's reduction function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregationKind {
    Sum,
    Count,
    Max,
    Min,
    Avg,
}

/// How a column's value is derived, as a tagged sum rather than a bag of
/// optional fields — this makes exhaustive handling in the trigger compiler
/// a compile error if a variant is missed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnRole {
    /// An ordinary stored column with no automation.
    Plain,
    /// Auto-incrementing identity column.
    Sequence,
    /// The FK column(s) materialized (or declared) for a named foreign key.
    ForeignKey { fk_name: String },
    /// One-shot copy from a parent column, refreshed only when the FK changes.
    Fetch(AutomationSource),
    /// Copy from a parent column, refreshed whenever the parent value changes.
    FetchUpdates(AutomationSource),
    /// Value of a parent column, tracking the most-recently-updated child.
    Latest(AutomationSource),
    /// Maintained reduction over a child table's column.
    Aggregation {
        kind: AggregationKind,
        source: AutomationSource,
    },
    /// In-row computed expression.
    Calculated {
        expression: String,
        referenced_columns: Vec<String>,
    },
}

/// The `(table, foreign_key, column)` triple every automation role other
/// than `Calculated` is anchored on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationSource {
    pub source_table: String,
    pub source_fk_name: String,
    pub source_column: String,
}

/// One column after inheritance resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub base_type: BaseType,
    pub size: Option<u32>,
    pub decimal: Option<u32>,
    pub required: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub sequence: bool,
    pub default: Option<String>,
    pub role: ColumnRole,
}

impl ColumnSpec {
    pub fn is_calculated(&self) -> bool {
        matches!(self.role, ColumnRole::Calculated { .. })
    }

    pub fn calculated_expression(&self) -> Option<(&str, &[String])> {
        match &self.role {
            ColumnRole::Calculated {
                expression,
                referenced_columns,
            } => Some((expression.as_str(), referenced_columns.as_slice())),
            _ => None,
        }
    }
}

/// A resolved foreign key: column(s) on this table referencing another
/// table's primary key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub parent_table: String,
    pub child_columns: Vec<String>,
    pub parent_columns: Vec<String>,
    pub on_delete: OnDelete,
}

/// A unique constraint spanning one or more columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub columns: Vec<String>,
}

/// A secondary index spanning one or more columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDef {
    pub columns: Vec<String>,
}

/// One table after resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: IndexMap<String, ColumnSpec>,
    pub foreign_keys: IndexMap<String, ForeignKey>,
    pub primary_key: Vec<String>,
    pub uniques: Vec<UniqueConstraint>,
    pub indexes: Vec<IndexDef>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: IndexMap::new(),
            foreign_keys: IndexMap::new(),
            primary_key: Vec::new(),
            uniques: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.get(name)
    }

    /// Columns in declaration order whose role is `Calculated`.
    pub fn calculated_columns(&self) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.values().filter(|c| c.is_calculated())
    }
}

/// Table name → `TableSpec`, the output of schema resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedSchema {
    pub tables: IndexMap<String, TableSpec>,
}

impl ResolvedSchema {
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_rule_accepts_and_rejects() {
        assert!(is_valid_identifier("accounts"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("col_1"));
        assert!(!is_valid_identifier("1col"));
        assert!(!is_valid_identifier("has space"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn aggregation_default_by_type() {
        assert_eq!(BaseType::Integer.aggregation_default(), "0");
        assert_eq!(BaseType::Boolean.aggregation_default(), "FALSE");
        assert_eq!(BaseType::Text.aggregation_default(), "''");
    }

    #[test]
    fn varchar_requires_size_numeric_does_not() {
        assert!(BaseType::Varchar.requires_size());
        assert!(!BaseType::Numeric.requires_size());
        assert!(BaseType::Numeric.allows_optional_size_and_decimal());
    }
}
