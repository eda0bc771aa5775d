//! The trigger compiler: assembles the four-step UPDATE body plus the
//! INSERT/DELETE specializations for every table with at least one
//! automation, following the fixed order (push-children, pull-parents,
//! evaluate-calc, push-parents) and the change-detection guards that are
//! the sole runtime cycle-termination mechanism.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::compile::automations::TableAutomations;
use crate::config::CompileOptions;
use crate::error::Result;
use crate::expr;
use crate::model::types::{AggregationKind, ColumnRole, ForeignKey, ResolvedSchema, TableSpec};

/// Emit DROP/CREATE statements for every trigger function and trigger the
/// schema needs, in table declaration order.
pub fn emit(
    schema: &ResolvedSchema,
    automations: &IndexMap<String, TableAutomations>,
    options: &CompileOptions,
) -> Result<Vec<String>> {
    let needs_updated_at = crate::compile::tables_needing_updated_at(schema);
    let mut statements = Vec::new();

    for table in schema.tables.values() {
        let table_automations = &automations[&table.name];
        if table_automations.is_empty() && !needs_updated_at.contains(&table.name) {
            continue;
        }

        let synthesize_updated_at = options.synthesize_updated_at && needs_updated_at.contains(&table.name);

        statements.extend(emit_operation(
            schema,
            table,
            table_automations,
            options,
            Operation::Insert,
            synthesize_updated_at,
        ));
        statements.extend(emit_operation(
            schema,
            table,
            table_automations,
            options,
            Operation::Update,
            synthesize_updated_at,
        ));
        statements.extend(emit_operation(
            schema,
            table,
            table_automations,
            options,
            Operation::Delete,
            synthesize_updated_at,
        ));
    }

    Ok(statements)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    fn sql_name(self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    fn path_name(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

fn emit_operation(
    schema: &ResolvedSchema,
    table: &TableSpec,
    automations: &TableAutomations,
    options: &CompileOptions,
    op: Operation,
    synthesize_updated_at: bool,
) -> Vec<String> {
    let body = match op {
        Operation::Insert => insert_body(schema, table, automations, options, synthesize_updated_at),
        Operation::Update => update_body(schema, table, automations, options, synthesize_updated_at),
        Operation::Delete => delete_body(schema, table, automations, options),
    };

    if body.trim().is_empty() {
        return Vec::new();
    }

    let name = format!("{}_after_{}_genlogic", table.name, op.path_name());
    let qualified_table = options.qualify(&table.name);
    let return_value = if op == Operation::Delete { "OLD" } else { "NEW" };

    vec![
        format!("DROP TRIGGER IF EXISTS {name} ON {qualified_table};"),
        format!("DROP FUNCTION IF EXISTS {name}();"),
        format!(
            "CREATE OR REPLACE FUNCTION {name}() RETURNS TRIGGER AS $$\nBEGIN\n{body}  RETURN {return_value};\nEND;\n$$ LANGUAGE plpgsql;"
        ),
        format!(
            "CREATE TRIGGER {name} AFTER {op} ON {qualified_table} FOR EACH ROW EXECUTE FUNCTION {name}();",
            op = op.sql_name(),
        ),
    ]
}

fn foreign_key<'a>(schema: &'a ResolvedSchema, table_name: &str, fk_name: &str) -> &'a ForeignKey {
    schema.tables[table_name]
        .foreign_keys
        .get(fk_name)
        .expect("automations are assembled only from foreign keys present in the schema")
}

fn insert_body(
    schema: &ResolvedSchema,
    table: &TableSpec,
    automations: &TableAutomations,
    options: &CompileOptions,
    synthesize_updated_at: bool,
) -> String {
    let mut body = String::new();

    // Step 1: unconditional cascade of NEW values (no OLD to guard against).
    for push in &automations.push_to_children {
        let fk = foreign_key(schema, &push.child_table, &push.fk_name);
        body.push_str(&cascade_update(push, fk, options));
    }

    // Step 3: calculated columns, same as UPDATE.
    body.push_str(&calculated_assignments(&automations.calculated_columns, table, options));

    // Step 4: unconditional add to parent aggregations.
    for push in &automations.push_to_parents {
        let fk = foreign_key(schema, &table.name, &push.fk_name);
        body.push_str(&aggregation_insert(push, fk, options));
    }

    if synthesize_updated_at {
        body.push_str(&format!("  NEW.{} := now();\n", options.quote("_updated_at")));
    }

    body
}

fn update_body(
    schema: &ResolvedSchema,
    table: &TableSpec,
    automations: &TableAutomations,
    options: &CompileOptions,
    synthesize_updated_at: bool,
) -> String {
    let mut body = String::new();

    for push in &automations.push_to_children {
        let fk = foreign_key(schema, &push.child_table, &push.fk_name);
        let guard = push
            .mappings
            .iter()
            .map(|m| is_distinct(&m.parent_column, options))
            .collect::<Vec<_>>()
            .join(" OR ");
        body.push_str(&format!("  IF {guard} THEN\n"));
        body.push_str(&indent(&cascade_update(push, fk, options), 2));
        body.push_str("  END IF;\n");
    }

    for pull in &automations.pull_from_parents {
        let fk = foreign_key(schema, &table.name, &pull.fk_name);
        let guard = fk
            .child_columns
            .iter()
            .map(|c| is_distinct(c, options))
            .collect::<Vec<_>>()
            .join(" OR ");
        body.push_str(&format!("  IF {guard} THEN\n"));
        body.push_str(&indent(&pull_select(pull, fk, options), 2));
        body.push_str("  END IF;\n");
    }

    body.push_str(&calculated_assignments(&automations.calculated_columns, table, options));

    for push in &automations.push_to_parents {
        let fk = foreign_key(schema, &table.name, &push.fk_name);
        body.push_str(&aggregation_update(push, fk, &table.name, options));
    }

    if synthesize_updated_at {
        body.push_str(&format!("  NEW.{} := now();\n", options.quote("_updated_at")));
    }

    body
}

fn delete_body(
    schema: &ResolvedSchema,
    table: &TableSpec,
    automations: &TableAutomations,
    options: &CompileOptions,
) -> String {
    let mut body = String::new();
    for push in &automations.push_to_parents {
        let fk = foreign_key(schema, &table.name, &push.fk_name);
        body.push_str(&aggregation_delete(push, fk, &table.name, options));
    }
    body
}

fn is_distinct(column: &str, options: &CompileOptions) -> String {
    let quoted = options.quote(column);
    format!("OLD.{quoted} IS DISTINCT FROM NEW.{quoted}")
}

fn cascade_update(
    push: &crate::compile::automations::PushToChild,
    fk: &ForeignKey,
    options: &CompileOptions,
) -> String {
    let assignments = push
        .mappings
        .iter()
        .map(|m| {
            format!(
                "{} = NEW.{}",
                options.quote(&m.child_column),
                options.quote(&m.parent_column)
            )
        })
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = fk
        .child_columns
        .iter()
        .zip(fk.parent_columns.iter())
        .map(|(child, parent)| format!("{} = NEW.{}", options.quote(child), options.quote(parent)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "UPDATE {} SET {assignments} WHERE {where_clause};\n",
        options.qualify(&push.child_table),
    )
}

fn pull_select(
    pull: &crate::compile::automations::PullFromParent,
    fk: &ForeignKey,
    options: &CompileOptions,
) -> String {
    let columns = pull
        .mappings
        .iter()
        .map(|m| options.quote(&m.parent_column))
        .collect::<Vec<_>>()
        .join(", ");
    let targets = pull
        .mappings
        .iter()
        .map(|m| format!("NEW.{}", options.quote(&m.child_column)))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = fk
        .parent_columns
        .iter()
        .zip(fk.child_columns.iter())
        .map(|(parent, child)| format!("{} = NEW.{}", options.quote(parent), options.quote(child)))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "SELECT {columns} INTO {targets} FROM {} WHERE {where_clause};\n",
        options.qualify(&pull.parent_table),
    )
}

fn calculated_assignments(
    columns: &[crate::compile::automations::CalculatedColumn],
    table: &TableSpec,
    options: &CompileOptions,
) -> String {
    let declared: HashSet<String> = table.columns.keys().cloned().collect();
    let mut body = String::new();
    for calc in columns {
        let rewritten = expr::rewrite_with_prefix(&calc.expression, &declared, "NEW", options);
        body.push_str(&format!("  NEW.{} := {rewritten};\n", options.quote(&calc.column)));
    }
    body
}

/// Unconditional additions for an INSERT: the new child row always
/// contributes to whatever it aggregates into.
fn aggregation_insert(
    push: &crate::compile::automations::PushToParent,
    fk: &ForeignKey,
    options: &CompileOptions,
) -> String {
    let parent = options.qualify(&push.parent_table);
    let where_clause = fk
        .parent_columns
        .iter()
        .zip(fk.child_columns.iter())
        .map(|(p, c)| format!("{} = NEW.{}", options.quote(p), options.quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut body = String::new();
    for mapping in &push.mappings {
        let column = options.quote(&mapping.parent_column);
        let src = options.quote(&mapping.source_child_column);
        match mapping.kind {
            AggregationKind::Sum => {
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = {column} + COALESCE(NEW.{src}, 0) WHERE {where_clause};\n"
                ));
            }
            AggregationKind::Count => {
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = {column} + (CASE WHEN NEW.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {where_clause};\n"
                ));
            }
            AggregationKind::Max | AggregationKind::Min => {
                let comparison = if mapping.kind == AggregationKind::Max { ">" } else { "<" };
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = CASE WHEN NEW.{src} {comparison} {column} THEN NEW.{src} ELSE {column} END WHERE {where_clause};\n"
                ));
            }
            AggregationKind::Avg => {
                let (sum_col, count_col) = sum_count_columns(mapping, options);
                body.push_str(&format!(
                    "  UPDATE {parent} SET {sum_col} = {sum_col} + COALESCE(NEW.{src}, 0), {count_col} = {count_col} + (CASE WHEN NEW.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {where_clause};\n"
                ));
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = CASE WHEN {count_col} = 0 THEN 0 ELSE {sum_col}::numeric / {count_col} END WHERE {where_clause};\n"
                ));
            }
        }
    }
    body
}

fn aggregation_update(
    push: &crate::compile::automations::PushToParent,
    fk: &ForeignKey,
    child_table: &str,
    options: &CompileOptions,
) -> String {
    let parent = options.qualify(&push.parent_table);
    let child = options.qualify(child_table);
    let where_clause = |which: &str| {
        fk.parent_columns
            .iter()
            .zip(fk.child_columns.iter())
            .map(|(p, c)| format!("{} = {which}.{}", options.quote(p), options.quote(c)))
            .collect::<Vec<_>>()
            .join(" AND ")
    };
    // Scopes the recompute subquery to the remaining children of one parent
    // (whichever side of a reparent it is evaluated against): the row under
    // trigger already carries its committed fk value, so filtering the child
    // table by that same column against OLD or NEW correctly in/excludes it.
    let child_where = |which: &str| {
        fk.child_columns
            .iter()
            .map(|c| format!("{} = {which}.{}", options.quote(c), options.quote(c)))
            .collect::<Vec<_>>()
            .join(" AND ")
    };

    let mut body = String::new();
    let fk_changed = fk
        .child_columns
        .iter()
        .map(|c| is_distinct(c, options))
        .collect::<Vec<_>>()
        .join(" OR ");

    for mapping in &push.mappings {
        let column = options.quote(&mapping.parent_column);
        let src = options.quote(&mapping.source_child_column);

        let src_changed = is_distinct(&mapping.source_child_column, options);
        body.push_str(&format!("  IF {src_changed} OR ({fk_changed}) THEN\n"));
        match mapping.kind {
            AggregationKind::Sum => {
                body.push_str(&format!(
                    "    UPDATE {parent} SET {column} = {column} - COALESCE(OLD.{src}, 0) WHERE {};\n",
                    where_clause("OLD")
                ));
                body.push_str(&format!(
                    "    UPDATE {parent} SET {column} = {column} + COALESCE(NEW.{src}, 0) WHERE {};\n",
                    where_clause("NEW")
                ));
            }
            AggregationKind::Count => {
                body.push_str(&format!(
                    "    UPDATE {parent} SET {column} = {column} - (CASE WHEN OLD.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {};\n",
                    where_clause("OLD")
                ));
                body.push_str(&format!(
                    "    UPDATE {parent} SET {column} = {column} + (CASE WHEN NEW.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {};\n",
                    where_clause("NEW")
                ));
            }
            AggregationKind::Max | AggregationKind::Min => {
                let func = if mapping.kind == AggregationKind::Max { "MAX" } else { "MIN" };
                let comparison = if mapping.kind == AggregationKind::Max { ">=" } else { "<=" };
                let better = if mapping.kind == AggregationKind::Max { ">" } else { "<" };
                // Reparent: the row leaves the old parent's child set entirely
                // (recompute the old parent if it held the extremum) and joins
                // the new parent's (bump in place, since it can only raise the
                // new parent's max / lower its min, never invalidate it).
                body.push_str(&format!("    IF {fk_changed} THEN\n"));
                body.push_str(&format!(
                    "      IF OLD.{src} {comparison} {column} THEN\n        UPDATE {parent} SET {column} = (SELECT {func}({src}) FROM {child} WHERE {}) WHERE {};\n      END IF;\n",
                    child_where("OLD"),
                    where_clause("OLD"),
                ));
                body.push_str(&format!(
                    "      UPDATE {parent} SET {column} = CASE WHEN NEW.{src} {better} {column} THEN NEW.{src} ELSE {column} END WHERE {};\n",
                    where_clause("NEW"),
                ));
                body.push_str("    ELSE\n");
                body.push_str(&format!(
                    "      IF OLD.{src} {comparison} {column} THEN\n        UPDATE {parent} SET {column} = (SELECT {func}({src}) FROM {child} WHERE {}) WHERE {};\n      ELSE\n        UPDATE {parent} SET {column} = CASE WHEN NEW.{src} {better} {column} THEN NEW.{src} ELSE {column} END WHERE {};\n      END IF;\n",
                    child_where("NEW"),
                    where_clause("NEW"),
                    where_clause("NEW"),
                ));
                body.push_str("    END IF;\n");
            }
            AggregationKind::Avg => {
                let (sum_col, count_col) = sum_count_columns(mapping, options);
                body.push_str(&format!(
                    "    UPDATE {parent} SET {sum_col} = {sum_col} - COALESCE(OLD.{src}, 0), {count_col} = {count_col} - (CASE WHEN OLD.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {};\n",
                    where_clause("OLD"),
                ));
                body.push_str(&format!(
                    "    UPDATE {parent} SET {sum_col} = {sum_col} + COALESCE(NEW.{src}, 0), {count_col} = {count_col} + (CASE WHEN NEW.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {};\n",
                    where_clause("NEW"),
                ));
                body.push_str(&format!(
                    "    UPDATE {parent} SET {column} = CASE WHEN {count_col} = 0 THEN 0 ELSE {sum_col}::numeric / {count_col} END WHERE {};\n",
                    where_clause("NEW"),
                ));
            }
        }
        body.push_str("  END IF;\n");
    }
    body
}

fn aggregation_delete(
    push: &crate::compile::automations::PushToParent,
    fk: &ForeignKey,
    child_table: &str,
    options: &CompileOptions,
) -> String {
    let parent = options.qualify(&push.parent_table);
    let child = options.qualify(child_table);
    let where_clause = fk
        .parent_columns
        .iter()
        .zip(fk.child_columns.iter())
        .map(|(p, c)| format!("{} = OLD.{}", options.quote(p), options.quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    // The deleted row is already gone from `child_table` by the time an
    // AFTER DELETE trigger runs, so filtering the remaining children by
    // OLD's own fk value naturally excludes it.
    let child_where = fk
        .child_columns
        .iter()
        .map(|c| format!("{} = OLD.{}", options.quote(c), options.quote(c)))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut body = String::new();
    for mapping in &push.mappings {
        let column = options.quote(&mapping.parent_column);
        let src = options.quote(&mapping.source_child_column);
        match mapping.kind {
            AggregationKind::Sum => {
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = {column} - COALESCE(OLD.{src}, 0) WHERE {where_clause};\n"
                ));
            }
            AggregationKind::Count => {
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = {column} - (CASE WHEN OLD.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {where_clause};\n"
                ));
            }
            AggregationKind::Max | AggregationKind::Min => {
                let comparison = if mapping.kind == AggregationKind::Max { ">=" } else { "<=" };
                let func = if mapping.kind == AggregationKind::Max { "MAX" } else { "MIN" };
                body.push_str(&format!(
                    "  IF OLD.{src} {comparison} {column} THEN\n    UPDATE {parent} SET {column} = (SELECT {func}({src}) FROM {child} WHERE {child_where}) WHERE {where_clause};\n  END IF;\n",
                ));
            }
            AggregationKind::Avg => {
                let (sum_col, count_col) = sum_count_columns(mapping, options);
                body.push_str(&format!(
                    "  UPDATE {parent} SET {sum_col} = {sum_col} - COALESCE(OLD.{src}, 0), {count_col} = {count_col} - (CASE WHEN OLD.{src} IS NOT NULL THEN 1 ELSE 0 END) WHERE {where_clause};\n"
                ));
                body.push_str(&format!(
                    "  UPDATE {parent} SET {column} = CASE WHEN {count_col} = 0 THEN 0 ELSE {sum_col}::numeric / {count_col} END WHERE {where_clause};\n"
                ));
            }
        }
    }
    body
}

/// Hidden companion columns an AVG aggregation maintains alongside its
/// visible ratio column, so the ratio itself never needs incremental
/// division — maintained as ordinary SUM/COUNT instead.
fn sum_count_columns(
    mapping: &crate::compile::automations::AggregationMapping,
    options: &CompileOptions,
) -> (String, String) {
    (
        options.quote(&format!("{}_sum", mapping.parent_column)),
        options.quote(&format!("{}_count", mapping.parent_column)),
    )
}

fn indent(text: &str, spaces: usize) -> String {
    let pad = " ".repeat(spaces);
    text.lines()
        .map(|line| format!("{pad}{line}\n"))
        .collect()
}
