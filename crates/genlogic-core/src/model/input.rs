//! Input schema model — the shape the resolver consumes, mirroring the
//! JSON-compatible schema document. An external driver is responsible for
//! turning YAML/JSON into these types (or into `serde_json::Value` and then
//! these types); this crate never reads a file.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use indexmap::IndexMap;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::model::types::{AggregationKind, OnDelete};

/// Top-level parsed document: `columns` (the reusable dictionary `R`) and
/// `tables`. Any other top-level key is rejected by the caller before this
/// type is even constructed (structural JSON-Schema validation is an
/// external concern).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParsedSchema {
    #[serde(default)]
    pub columns: IndexMap<String, InlineColumn>,
    pub tables: DedupMap<TableDeclaration>,
}

/// One table as declared in the input document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableDeclaration {
    pub columns: DedupMap<ColumnDeclaration>,
    #[serde(default)]
    pub foreign_keys: IndexMap<String, ForeignKeyDeclaration>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub uniques: Vec<Vec<String>>,
    #[serde(default)]
    pub indexes: Vec<Vec<String>>,
}

/// A string-keyed map that behaves like `IndexMap` but remembers which keys
/// appeared more than once while it was being deserialized.
///
/// `IndexMap`'s own `Deserialize` impl just calls `insert` per entry, so a
/// repeated JSON/YAML key silently keeps the last value and the duplicate
/// vanishes before this crate ever sees it. Resolving `tables.*` and
/// `tables.*.columns.*` through this type instead means a repeated table or
/// column name survives as far as `resolve`, which can then report it as a
/// real `GenLogicError` instead of quietly overwriting a declaration.
#[derive(Debug, Clone)]
pub struct DedupMap<V> {
    pub entries: IndexMap<String, V>,
    pub duplicates: Vec<String>,
}

impl<V> Default for DedupMap<V> {
    fn default() -> Self {
        DedupMap {
            entries: IndexMap::new(),
            duplicates: Vec::new(),
        }
    }
}

impl<V> From<IndexMap<String, V>> for DedupMap<V> {
    fn from(entries: IndexMap<String, V>) -> Self {
        DedupMap {
            entries,
            duplicates: Vec::new(),
        }
    }
}

impl<V> Deref for DedupMap<V> {
    type Target = IndexMap<String, V>;

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl<V> DerefMut for DedupMap<V> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.entries
    }
}

impl<'a, V> IntoIterator for &'a DedupMap<V> {
    type Item = (&'a String, &'a V);
    type IntoIter = indexmap::map::Iter<'a, String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<'de, V> Deserialize<'de> for DedupMap<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DedupMapVisitor<V>(PhantomData<V>);

        impl<'de, V> Visitor<'de> for DedupMapVisitor<V>
        where
            V: Deserialize<'de>,
        {
            type Value = DedupMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a map")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
                let mut duplicates = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if entries.insert(key.clone(), value).is_some() {
                        duplicates.push(key);
                    }
                }
                Ok(DedupMap { entries, duplicates })
            }
        }

        deserializer.deserialize_map(DedupMapVisitor(PhantomData))
    }
}

/// One column value as it appears under `tables.<table>.columns.<name>` —
/// a sum type over the four resolution rules, rather than a dynamic map
/// with optional fields. `#[serde(untagged)]` lets this match the null /
/// string / object shapes the document actually uses.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ColumnDeclaration {
    /// `null` — inherit the reusable column with the same name as this one.
    InheritSameName(()),
    /// A string naming a reusable column to inherit verbatim.
    Inherit(String),
    /// An object. Distinguished from a plain inline column by the presence
    /// of `$ref`; see `ObjectColumn::reference`.
    Object(ObjectColumn),
}

/// The object form of a column declaration: either an inline spec or a
/// reference plus overriding fields, depending on whether `$ref` is present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectColumn {
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
    #[serde(flatten)]
    pub fields: InlineColumn,
}

/// The raw field set a column can carry, whether declared inline, as the
/// base of a reusable dictionary entry, or as an override on top of a `$ref`.
/// Every field is optional here because an override object only needs to
/// carry the fields it changes; the resolver deep-merges this against the
/// referenced base.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InlineColumn {
    pub base_type: Option<String>,
    pub size: Option<u32>,
    pub decimal: Option<u32>,
    pub required: Option<bool>,
    pub unique: Option<bool>,
    pub primary_key: Option<bool>,
    pub sequence: Option<bool>,
    pub default: Option<String>,
    pub automation: Option<AutomationDeclaration>,
    pub calculated: Option<String>,
}

impl InlineColumn {
    /// Overlay `overrides` on top of `self`, override wins per key.
    pub fn merged_with(&self, overrides: &InlineColumn) -> InlineColumn {
        InlineColumn {
            base_type: overrides.base_type.clone().or_else(|| self.base_type.clone()),
            size: overrides.size.or(self.size),
            decimal: overrides.decimal.or(self.decimal),
            required: overrides.required.or(self.required),
            unique: overrides.unique.or(self.unique),
            primary_key: overrides.primary_key.or(self.primary_key),
            sequence: overrides.sequence.or(self.sequence),
            default: overrides.default.clone().or_else(|| self.default.clone()),
            automation: overrides
                .automation
                .clone()
                .or_else(|| self.automation.clone()),
            calculated: overrides.calculated.clone().or_else(|| self.calculated.clone()),
        }
    }
}

/// `automation: { type, table, foreign_key, column }`.
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationDeclaration {
    #[serde(rename = "type")]
    pub kind: AutomationKind,
    pub table: String,
    pub foreign_key: String,
    pub column: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AutomationKind {
    Sum,
    Count,
    Max,
    Min,
    Avg,
    Latest,
    Fetch,
    #[serde(rename = "FETCH_UPDATES")]
    FetchUpdates,
}

impl AutomationKind {
    pub fn aggregation_kind(self) -> Option<AggregationKind> {
        match self {
            AutomationKind::Sum => Some(AggregationKind::Sum),
            AutomationKind::Count => Some(AggregationKind::Count),
            AutomationKind::Max => Some(AggregationKind::Max),
            AutomationKind::Min => Some(AggregationKind::Min),
            AutomationKind::Avg => Some(AggregationKind::Avg),
            _ => None,
        }
    }
}

/// `foreign_keys.<fk_name>: { table, delete?, prefix?, required? }`.
#[derive(Debug, Clone, Deserialize)]
pub struct ForeignKeyDeclaration {
    pub table: String,
    #[serde(default)]
    pub delete: OnDelete,
    pub prefix: Option<String>,
    pub required: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_override_wins_per_key() {
        let base = InlineColumn {
            base_type: Some("varchar".into()),
            size: Some(40),
            required: Some(true),
            ..Default::default()
        };
        let overrides = InlineColumn {
            size: Some(80),
            ..Default::default()
        };
        let merged = base.merged_with(&overrides);
        assert_eq!(merged.base_type.as_deref(), Some("varchar"));
        assert_eq!(merged.size, Some(80));
        assert_eq!(merged.required, Some(true));
    }

    #[test]
    fn null_column_declaration_parses() {
        let decl: ColumnDeclaration = serde_json::from_value(serde_json::Value::Null).unwrap();
        assert!(matches!(decl, ColumnDeclaration::InheritSameName(())));
    }

    #[test]
    fn string_column_declaration_parses() {
        let decl: ColumnDeclaration = serde_json::from_str("\"money\"").unwrap();
        match decl {
            ColumnDeclaration::Inherit(name) => assert_eq!(name, "money"),
            other => panic!("expected Inherit, got {other:?}"),
        }
    }

    #[test]
    fn ref_with_override_parses() {
        let json = r#"{"$ref": "money", "required": false}"#;
        let decl: ColumnDeclaration = serde_json::from_str(json).unwrap();
        match decl {
            ColumnDeclaration::Object(obj) => {
                assert_eq!(obj.reference.as_deref(), Some("money"));
                assert_eq!(obj.fields.required, Some(false));
            }
            other => panic!("expected Object, got {other:?}"),
        }
    }

    #[test]
    fn inline_object_without_ref_parses() {
        let json = r#"{"base_type": "integer", "required": true}"#;
        let decl: ColumnDeclaration = serde_json::from_str(json).unwrap();
        match decl {
            ColumnDeclaration::Object(obj) => {
                assert!(obj.reference.is_none());
                assert_eq!(obj.fields.base_type.as_deref(), Some("integer"));
            }
            other => panic!("expected Object, got {other:?}"),
        }
    }
}
