//! Foreign-key graph: child->parent edges across the whole schema, checked
//! for cycles and cross-referenced against automation declarations.

use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use crate::error::{self, GenLogicError, Result};
use crate::model::types::{ColumnRole, ResolvedSchema};

/// Vertices are table names, edges point child -> parent, labeled by the
/// foreign key name on the child side. Self-loops (t -> t) are valid edges.
pub struct FkGraph {
    pub graph: DiGraph<String, String>,
    node_indices: HashMap<String, NodeIndex>,
}

impl FkGraph {
    pub fn node_index(&self, table: &str) -> Option<NodeIndex> {
        self.node_indices.get(table).copied()
    }

    pub fn table_name(&self, idx: NodeIndex) -> &str {
        &self.graph[idx]
    }
}

/// Build the FK graph from a resolved schema and run every check described
/// for the FK graph validator: structural cycles and automation/FK
/// cross-references. Collects every problem found rather than stopping at
/// the first one.
pub fn validate(schema: &ResolvedSchema) -> Result<FkGraph> {
    let mut errors = Vec::new();
    let mut graph = DiGraph::new();
    let mut node_indices = HashMap::new();

    for name in schema.tables.keys() {
        let idx = graph.add_node(name.clone());
        node_indices.insert(name.clone(), idx);
    }

    for table in schema.tables.values() {
        for fk in table.foreign_keys.values() {
            match node_indices.get(&fk.parent_table) {
                Some(&parent_idx) => {
                    let child_idx = node_indices[&table.name];
                    graph.add_edge(child_idx, parent_idx, fk.name.clone());
                }
                None => errors.push(GenLogicError::UnknownTable {
                    path: format!("tables.{}.foreign_keys.{}", table.name, fk.name),
                    table: fk.parent_table.clone(),
                }),
            }
        }
    }

    let fk_graph = FkGraph {
        graph,
        node_indices,
    };

    if let Some(path) = find_cycle(&fk_graph) {
        errors.push(GenLogicError::ForeignKeyCycle { path });
    }

    for err in validate_automation_sources(schema) {
        errors.push(err);
    }

    error::aggregate(fk_graph, errors)
}

/// Tri-color DFS (white/gray/black). A back-edge to a gray vertex is a
/// cycle; returns the full path `[t1, t2, ..., t1]`. A self-loop edge is not
/// a cycle by this definition, since the DFS never re-enters a gray vertex
/// through it before leaving — handled explicitly below.
fn find_cycle(fk_graph: &FkGraph) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let node_count = fk_graph.graph.node_count();
    let mut color = vec![Color::White; node_count];
    let mut stack_path: Vec<NodeIndex> = Vec::new();

    fn visit(
        fk_graph: &FkGraph,
        node: NodeIndex,
        color: &mut Vec<Color>,
        stack_path: &mut Vec<NodeIndex>,
    ) -> Option<Vec<NodeIndex>> {
        color[node.index()] = Color::Gray;
        stack_path.push(node);

        for neighbor in fk_graph.graph.neighbors(node) {
            if neighbor == node {
                // Self-referential FK is permitted, not a cycle.
                continue;
            }
            match color[neighbor.index()] {
                Color::White => {
                    if let Some(cycle) = visit(fk_graph, neighbor, color, stack_path) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack_path
                        .iter()
                        .position(|&n| n == neighbor)
                        .expect("gray node must be on the current stack");
                    let mut cycle: Vec<NodeIndex> = stack_path[start..].to_vec();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }

        stack_path.pop();
        color[node.index()] = Color::Black;
        None
    }

    for idx in fk_graph.graph.node_indices() {
        if color[idx.index()] == Color::White {
            if let Some(cycle) = visit(fk_graph, idx, &mut color, &mut stack_path) {
                return Some(
                    cycle
                        .into_iter()
                        .map(|n| fk_graph.table_name(n).to_string())
                        .collect(),
                );
            }
        }
    }
    None
}

/// Every automation's `(source_table, source_fk_name)` must correspond to an
/// existing foreign key. For `fetch`/`fetch_updates`/`latest`, that FK is
/// declared on the *declaring* table (it is the child pulling from its own
/// parent); for `aggregation`, the FK is declared on `source_table` (the
/// child whose values are being aggregated up into the declaring table).
fn validate_automation_sources(schema: &ResolvedSchema) -> Vec<GenLogicError> {
    let mut errors = Vec::new();

    for table in schema.tables.values() {
        for column in table.columns.values() {
            let path = format!("tables.{}.columns.{}.automation", table.name, column.name);

            match &column.role {
                ColumnRole::Fetch(source) | ColumnRole::FetchUpdates(source) | ColumnRole::Latest(source) => {
                    if schema.tables.get(&source.source_table).is_none() {
                        errors.push(GenLogicError::UnknownTable {
                            path,
                            table: source.source_table.clone(),
                        });
                        continue;
                    }

                    let Some(fk) = table.foreign_keys.get(&source.source_fk_name) else {
                        errors.push(GenLogicError::UnknownForeignKey {
                            path,
                            table: table.name.clone(),
                            fk: source.source_fk_name.clone(),
                        });
                        continue;
                    };

                    if fk.parent_table != source.source_table {
                        errors.push(GenLogicError::AutomationFkMismatch {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            detail: format!(
                                "foreign key '{}' on '{}' does not point at '{}'",
                                source.source_fk_name, table.name, source.source_table
                            ),
                        });
                    }
                }
                ColumnRole::Aggregation { source, .. } => {
                    let Some(source_table) = schema.tables.get(&source.source_table) else {
                        errors.push(GenLogicError::UnknownTable {
                            path,
                            table: source.source_table.clone(),
                        });
                        continue;
                    };

                    let Some(fk) = source_table.foreign_keys.get(&source.source_fk_name) else {
                        errors.push(GenLogicError::UnknownForeignKey {
                            path,
                            table: source.source_table.clone(),
                            fk: source.source_fk_name.clone(),
                        });
                        continue;
                    };

                    if fk.parent_table != table.name {
                        errors.push(GenLogicError::AutomationFkMismatch {
                            table: table.name.clone(),
                            column: column.name.clone(),
                            detail: format!(
                                "foreign key '{}' on '{}' does not point at '{}'",
                                source.source_fk_name, source.source_table, table.name
                            ),
                        });
                    }
                }
                _ => continue,
            }
        }
    }

    errors
}
