//! Per-table calculated-column dependency graph: cycle detection plus a
//! deterministic topological order (ties broken by declaration order).

use std::collections::{HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::{GenLogicError, Result};
use crate::model::types::TableSpec;

/// Topological order of one table's calculated columns, dependencies first.
#[derive(Debug, Clone)]
pub struct CalcOrder {
    pub columns: Vec<String>,
}

/// Build the calculated-column dependency graph for one table (edge A -> B
/// iff B's expression references A) and emit a topological order. Only
/// columns referenced by at least one calculated column's expression and
/// declared as calculated columns themselves participate as edges; plain
/// columns referenced by an expression are dependencies with no outgoing
/// edges of their own.
pub fn validate(table: &TableSpec) -> Result<CalcOrder> {
    let calc_names: Vec<&str> = table
        .calculated_columns()
        .map(|c| c.name.as_str())
        .collect();

    if calc_names.is_empty() {
        return Ok(CalcOrder { columns: Vec::new() });
    }

    let mut graph = DiGraph::new();
    let mut node_of: HashMap<&str, NodeIndex> = HashMap::new();
    let mut declaration_index: HashMap<NodeIndex, usize> = HashMap::new();

    for (i, name) in calc_names.iter().enumerate() {
        let idx = graph.add_node(*name);
        node_of.insert(name, idx);
        declaration_index.insert(idx, i);
    }

    for column in table.calculated_columns() {
        let (_, referenced) = column
            .calculated_expression()
            .expect("calculated_columns() only yields Calculated roles");
        let to = node_of[column.name.as_str()];
        for referenced_name in referenced {
            if let Some(&from) = node_of.get(referenced_name.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }

    match kahn_with_declaration_order(&graph, &declaration_index) {
        Some(order) => Ok(CalcOrder {
            columns: order
                .into_iter()
                .map(|idx| graph[idx].to_string())
                .collect(),
        }),
        None => Err(GenLogicError::CalculatedColumnCycle {
            table: table.name.clone(),
            columns: calc_names.into_iter().map(str::to_string).collect(),
        }),
    }
}

/// Kahn's algorithm over a small adjacency list, picking among all
/// zero-in-degree nodes the one declared earliest so the order is
/// deterministic rather than dependent on hash-map iteration.
fn kahn_with_declaration_order(
    graph: &DiGraph<&str, ()>,
    declaration_index: &HashMap<NodeIndex, usize>,
) -> Option<Vec<NodeIndex>> {
    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, petgraph::Incoming).count()))
        .collect();

    let mut ready: VecDeque<NodeIndex> = VecDeque::new();
    let mut ready_sorted: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|n| in_degree[n] == 0)
        .collect();
    ready_sorted.sort_by_key(|n| declaration_index[n]);
    ready.extend(ready_sorted);

    let mut order = Vec::with_capacity(graph.node_count());

    while let Some(node) = ready.pop_front() {
        order.push(node);
        let mut newly_ready = Vec::new();
        for next in graph.neighbors(node) {
            let degree = in_degree.get_mut(&next).unwrap();
            *degree -= 1;
            if *degree == 0 {
                newly_ready.push(next);
            }
        }
        newly_ready.sort_by_key(|n| declaration_index[n]);
        for n in newly_ready {
            let pos = ready
                .iter()
                .position(|r| declaration_index[r] > declaration_index[&n])
                .unwrap_or(ready.len());
            ready.insert(pos, n);
        }
    }

    if order.len() == graph.node_count() {
        Some(order)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{BaseType, ColumnRole, ColumnSpec};

    fn calc(name: &str, expression: &str, referenced: &[&str]) -> ColumnSpec {
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
            role: ColumnRole::Calculated {
                expression: expression.to_string(),
                referenced_columns: referenced.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn dependency_comes_before_dependent() {
        let mut table = TableSpec::new("orders");
        table
            .columns
            .insert("a".into(), calc("a", "1", &[]));
        table
            .columns
            .insert("b".into(), calc("b", "a + 1", &["a"]));
        let order = validate(&table).unwrap();
        let a_pos = order.columns.iter().position(|c| c == "a").unwrap();
        let b_pos = order.columns.iter().position(|c| c == "b").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut table = TableSpec::new("orders");
        table
            .columns
            .insert("a".into(), calc("a", "b + 1", &["b"]));
        table
            .columns
            .insert("b".into(), calc("b", "a + 1", &["a"]));
        let err = validate(&table).unwrap_err();
        assert!(matches!(err, GenLogicError::CalculatedColumnCycle { .. }));
    }

    #[test]
    fn no_calculated_columns_is_trivially_ok() {
        let table = TableSpec::new("orders");
        let order = validate(&table).unwrap();
        assert!(order.columns.is_empty());
    }
}
