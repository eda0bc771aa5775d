//! Trigger/DDL compilation: assembling per-table automations and emitting
//! the DDL and trigger-body text artifacts.

use std::collections::HashSet;

use crate::model::types::{ColumnRole, ResolvedSchema};

pub mod automations;
pub mod ddl;
pub mod trigger;

/// Tables that are the source of at least one `Latest` pull and therefore
/// need an observable per-row update timestamp, shared between `ddl::emit`
/// (which must declare the hidden column) and `trigger::emit` (which must
/// maintain it).
pub(crate) fn tables_needing_updated_at(schema: &ResolvedSchema) -> HashSet<String> {
    schema
        .tables
        .values()
        .flat_map(|table| table.columns.values())
        .filter_map(|column| match &column.role {
            ColumnRole::Latest(source) => Some(source.source_table.clone()),
            _ => None,
        })
        .collect()
}
