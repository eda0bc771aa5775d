//! Assembles `TableAutomations` for every table in a resolved schema by
//! scanning the whole schema for columns whose automation source points at
//! that table, in addition to the table's own columns.

use indexmap::IndexMap;

use crate::graph::calc;
use crate::model::types::{AggregationKind, ColumnRole, ResolvedSchema};

/// `(parent_column, child_column)` pair copied straight across an FK.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub parent_column: String,
    pub child_column: String,
}

/// A cascade from this table down into one child table over one FK.
#[derive(Debug, Clone)]
pub struct PushToChild {
    pub child_table: String,
    pub fk_name: String,
    pub mappings: Vec<ColumnMapping>,
}

/// A pull of parent column values into this table over one FK.
#[derive(Debug, Clone)]
pub struct PullFromParent {
    pub parent_table: String,
    pub fk_name: String,
    pub mappings: Vec<ColumnMapping>,
}

/// One calculated column in evaluation order.
#[derive(Debug, Clone)]
pub struct CalculatedColumn {
    pub column: String,
    pub expression: String,
}

/// One aggregation this table maintains on a parent, over one FK.
#[derive(Debug, Clone)]
pub struct AggregationMapping {
    pub parent_column: String,
    pub kind: AggregationKind,
    pub source_child_column: String,
}

/// An aggregation-maintenance push from this table up into one parent table.
#[derive(Debug, Clone)]
pub struct PushToParent {
    pub parent_table: String,
    pub fk_name: String,
    pub mappings: Vec<AggregationMapping>,
}

/// Everything the trigger compiler needs to assemble one table's trigger
/// bodies: what it cascades down, what it pulls up from parents, what it
/// calculates in-row, and what it maintains on its own parents.
#[derive(Debug, Clone, Default)]
pub struct TableAutomations {
    pub push_to_children: Vec<PushToChild>,
    pub pull_from_parents: Vec<PullFromParent>,
    pub calculated_columns: Vec<CalculatedColumn>,
    pub push_to_parents: Vec<PushToParent>,
}

impl TableAutomations {
    /// Whether this table needs any trigger at all.
    pub fn is_empty(&self) -> bool {
        self.push_to_children.is_empty()
            && self.pull_from_parents.is_empty()
            && self.calculated_columns.is_empty()
            && self.push_to_parents.is_empty()
    }
}

/// Assemble `TableAutomations` for every table in the schema.
pub fn assemble(schema: &ResolvedSchema) -> crate::error::Result<IndexMap<String, TableAutomations>> {
    let mut result: IndexMap<String, TableAutomations> = schema
        .tables
        .keys()
        .map(|name| (name.clone(), TableAutomations::default()))
        .collect();

    for table in schema.tables.values() {
        let order = calc::validate(table)?;
        let automations = result
            .get_mut(&table.name)
            .expect("every table name was seeded above");
        automations.calculated_columns = order
            .columns
            .into_iter()
            .map(|column_name| {
                let (expression, _) = table
                    .column(&column_name)
                    .expect("CalcOrder only names this table's own columns")
                    .calculated_expression()
                    .expect("CalcOrder only names Calculated columns");
                CalculatedColumn {
                    column: column_name,
                    expression: expression.to_string(),
                }
            })
            .collect();

        for column in table.columns.values() {
            match &column.role {
                ColumnRole::Fetch(source) | ColumnRole::FetchUpdates(source) | ColumnRole::Latest(source) => {
                    let mapping = ColumnMapping {
                        parent_column: source.source_column.clone(),
                        child_column: column.name.clone(),
                    };
                    push_mapping_into_pull(automations, &source.source_table, &source.source_fk_name, mapping);
                }
                _ => {}
            }
        }
    }

    for table in schema.tables.values() {
        for column in table.columns.values() {
            match &column.role {
                ColumnRole::FetchUpdates(source) => {
                    let parent_automations = result
                        .get_mut(&source.source_table)
                        .expect("automation sources were already cross-checked by graph::fk::validate");
                    let mapping = ColumnMapping {
                        parent_column: source.source_column.clone(),
                        child_column: column.name.clone(),
                    };
                    push_mapping_into_push_children(parent_automations, &table.name, &source.source_fk_name, mapping);
                }
                ColumnRole::Aggregation { kind, source } => {
                    let child_automations = result
                        .get_mut(&source.source_table)
                        .expect("automation sources were already cross-checked by graph::fk::validate");
                    let mapping = AggregationMapping {
                        parent_column: column.name.clone(),
                        kind: *kind,
                        source_child_column: source.source_column.clone(),
                    };
                    push_mapping_into_push_parents(child_automations, &table.name, &source.source_fk_name, mapping);
                }
                _ => {}
            }
        }
    }

    Ok(result)
}

fn push_mapping_into_pull(
    automations: &mut TableAutomations,
    parent_table: &str,
    fk_name: &str,
    mapping: ColumnMapping,
) {
    match automations
        .pull_from_parents
        .iter_mut()
        .find(|entry| entry.parent_table == parent_table && entry.fk_name == fk_name)
    {
        Some(entry) => entry.mappings.push(mapping),
        None => automations.pull_from_parents.push(PullFromParent {
            parent_table: parent_table.to_string(),
            fk_name: fk_name.to_string(),
            mappings: vec![mapping],
        }),
    }
}

fn push_mapping_into_push_children(
    automations: &mut TableAutomations,
    child_table: &str,
    fk_name: &str,
    mapping: ColumnMapping,
) {
    match automations
        .push_to_children
        .iter_mut()
        .find(|entry| entry.child_table == child_table && entry.fk_name == fk_name)
    {
        Some(entry) => entry.mappings.push(mapping),
        None => automations.push_to_children.push(PushToChild {
            child_table: child_table.to_string(),
            fk_name: fk_name.to_string(),
            mappings: vec![mapping],
        }),
    }
}

fn push_mapping_into_push_parents(
    automations: &mut TableAutomations,
    parent_table: &str,
    fk_name: &str,
    mapping: AggregationMapping,
) {
    match automations
        .push_to_parents
        .iter_mut()
        .find(|entry| entry.parent_table == parent_table && entry.fk_name == fk_name)
    {
        Some(entry) => entry.mappings.push(mapping),
        None => automations.push_to_parents.push(PushToParent {
            parent_table: parent_table.to_string(),
            fk_name: fk_name.to_string(),
            mappings: vec![mapping],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{AutomationSource, BaseType, ColumnSpec, ForeignKey, OnDelete, TableSpec};

    fn plain(name: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            base_type: BaseType::Integer,
            size: None,
            decimal: None,
            required: false,
            unique: false,
            primary_key: false,
            sequence: false,
            default: None,
            role: ColumnRole::Plain,
        }
    }

    #[test]
    fn sum_automation_links_child_push_to_parent() {
        let mut accounts = TableSpec::new("accounts");
        accounts.columns.insert(
            "balance".into(),
            ColumnSpec {
                role: ColumnRole::Aggregation {
                    kind: AggregationKind::Sum,
                    source: AutomationSource {
                        source_table: "ledger".into(),
                        source_fk_name: "account_fk".into(),
                        source_column: "amount".into(),
                    },
                },
                ..plain("balance")
            },
        );

        let mut ledger = TableSpec::new("ledger");
        ledger.columns.insert("amount".into(), plain("amount"));
        ledger.foreign_keys.insert(
            "account_fk".into(),
            ForeignKey {
                name: "account_fk".into(),
                parent_table: "accounts".into(),
                child_columns: vec!["account_fk".into()],
                parent_columns: vec!["id".into()],
                on_delete: OnDelete::NoAction,
            },
        );

        let mut schema = ResolvedSchema::default();
        schema.tables.insert("accounts".into(), accounts);
        schema.tables.insert("ledger".into(), ledger);

        let automations = assemble(&schema).unwrap();
        let ledger_automations = &automations["ledger"];
        assert_eq!(ledger_automations.push_to_parents.len(), 1);
        assert_eq!(ledger_automations.push_to_parents[0].parent_table, "accounts");
        assert_eq!(
            ledger_automations.push_to_parents[0].mappings[0].source_child_column,
            "amount"
        );
    }
}
