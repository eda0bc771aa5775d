//! DDL emission: `CREATE TABLE` statements with inline constraints and
//! indexes on every foreign key column.

use crate::compile::tables_needing_updated_at;
use crate::config::CompileOptions;
use crate::model::types::{AggregationKind, ColumnRole, ColumnSpec, ResolvedSchema, TableSpec};

/// Emit one `CREATE TABLE` statement (plus trailing `CREATE INDEX`
/// statements) per table, in schema declaration order.
pub fn emit(schema: &ResolvedSchema, options: &CompileOptions) -> Vec<String> {
    let needs_updated_at = tables_needing_updated_at(schema);
    let mut statements = Vec::new();
    for table in schema.tables.values() {
        let synthesize_updated_at = options.synthesize_updated_at && needs_updated_at.contains(&table.name);
        statements.push(create_table(table, options, synthesize_updated_at));
        statements.extend(create_indexes(table, options));
    }
    statements
}

fn create_table(table: &TableSpec, options: &CompileOptions, synthesize_updated_at: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    for column in table.columns.values() {
        lines.push(column_definition(column, options));
        if let ColumnRole::Aggregation {
            kind: AggregationKind::Avg,
            ..
        } = column.role
        {
            lines.extend(avg_companion_columns(column, options));
        }
    }

    if synthesize_updated_at {
        lines.push(format!(
            "{} timestamptz NOT NULL DEFAULT now()",
            options.quote("_updated_at")
        ));
    }

    if !table.primary_key.is_empty() {
        let columns = table
            .primary_key
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("PRIMARY KEY ({columns})"));
    }

    for unique in &table.uniques {
        let columns = unique
            .columns
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("UNIQUE ({columns})"));
    }

    for fk in table.foreign_keys.values() {
        let child_columns = fk
            .child_columns
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        let parent_columns = fk
            .parent_columns
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!(
            "FOREIGN KEY ({child_columns}) REFERENCES {} ({parent_columns}) ON DELETE {}",
            options.qualify(&fk.parent_table),
            fk.on_delete.sql(),
        ));
    }

    format!(
        "CREATE TABLE {} (\n  {}\n);",
        options.qualify(&table.name),
        lines.join(",\n  ")
    )
}

fn column_definition(column: &ColumnSpec, options: &CompileOptions) -> String {
    let mut parts = vec![options.quote(&column.name), sql_type(column)];

    if column.sequence {
        parts.push("GENERATED ALWAYS AS IDENTITY".to_string());
    }
    if column.required {
        parts.push("NOT NULL".to_string());
    }
    if column.unique {
        parts.push("UNIQUE".to_string());
    }
    if let Some(default) = aggregation_default_policy(column) {
        parts.push(format!("DEFAULT {default}"));
    } else if let Some(default) = &column.default {
        parts.push(format!("DEFAULT {default}"));
    }

    parts.join(" ")
}

/// AVG is maintained as a `(sum, count)` pair rather than recomputed, so the
/// ratio column's own DEFAULT-0 storage needs two hidden companions.
fn avg_companion_columns(column: &ColumnSpec, options: &CompileOptions) -> Vec<String> {
    vec![
        format!("{} numeric NOT NULL DEFAULT 0", options.quote(&format!("{}_sum", column.name))),
        format!("{} bigint NOT NULL DEFAULT 0", options.quote(&format!("{}_count", column.name))),
    ]
}

fn sql_type(column: &ColumnSpec) -> String {
    match (column.size, column.decimal) {
        (Some(size), Some(decimal)) => format!("{}({}, {})", column.base_type.sql_name(), size, decimal),
        (Some(size), None) => format!("{}({})", column.base_type.sql_name(), size),
        (None, _) => column.base_type.sql_name().to_string(),
    }
}

/// Aggregation columns always get their type's zero-element default so
/// incremental trigger arithmetic never needs `COALESCE` on the parent side.
fn aggregation_default_policy(column: &ColumnSpec) -> Option<&'static str> {
    match column.role {
        ColumnRole::Aggregation { .. } => Some(column.base_type.aggregation_default()),
        _ => None,
    }
}

fn create_indexes(table: &TableSpec, options: &CompileOptions) -> Vec<String> {
    let mut statements = Vec::new();
    for fk in table.foreign_keys.values() {
        let columns = fk
            .child_columns
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(format!(
            "CREATE INDEX {} ON {} ({});",
            options.quote(&format!("{}_{}_idx", table.name, fk.name)),
            options.qualify(&table.name),
            columns
        ));
    }
    for index in &table.indexes {
        let columns = index
            .columns
            .iter()
            .map(|c| options.quote(c))
            .collect::<Vec<_>>()
            .join(", ");
        statements.push(format!(
            "CREATE INDEX {} ON {} ({});",
            options.quote(&format!("{}_{}_idx", table.name, index.columns.join("_"))),
            options.qualify(&table.name),
            columns
        ));
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::{AggregationKind, AutomationSource};

    fn plain(name: &str, base_type: crate::model::types::BaseType) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            base_type,
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
    fn aggregation_column_gets_zero_default() {
        let column = ColumnSpec {
            role: ColumnRole::Aggregation {
                kind: AggregationKind::Sum,
                source: AutomationSource {
                    source_table: "ledger".into(),
                    source_fk_name: "account_fk".into(),
                    source_column: "amount".into(),
                },
            },
            ..plain("balance", crate::model::types::BaseType::Numeric)
        };
        let options = CompileOptions::default();
        let rendered = column_definition(&column, &options);
        assert!(rendered.contains("DEFAULT 0"));
    }

    #[test]
    fn create_table_includes_primary_key_clause() {
        let mut table = TableSpec::new("accounts");
        let mut id = plain("id", crate::model::types::BaseType::Integer);
        id.primary_key = true;
        table.columns.insert("id".into(), id);
        table.primary_key = vec!["id".into()];
        let options = CompileOptions::default();
        let sql = create_table(&table, &options, false);
        assert!(sql.contains("PRIMARY KEY (id)"));
    }

    #[test]
    fn synthesized_updated_at_column_is_declared() {
        let table = TableSpec::new("accounts");
        let options = CompileOptions::default();
        let sql = create_table(&table, &options, true);
        assert!(sql.contains("_updated_at timestamptz NOT NULL DEFAULT now()"));
    }

    #[test]
    fn emit_adds_updated_at_only_for_latest_source_tables() {
        use crate::model::types::AutomationSource;

        let mut accounts = TableSpec::new("accounts");
        accounts.columns.insert("id".into(), plain("id", crate::model::types::BaseType::Integer));

        let mut orders = TableSpec::new("orders");
        orders.columns.insert(
            "last_status".into(),
            ColumnSpec {
                role: ColumnRole::Latest(AutomationSource {
                    source_table: "accounts".into(),
                    source_fk_name: "account_fk".into(),
                    source_column: "status".into(),
                }),
                ..plain("last_status", crate::model::types::BaseType::Text)
            },
        );

        let mut schema = ResolvedSchema::default();
        schema.tables.insert("accounts".into(), accounts);
        schema.tables.insert("orders".into(), orders);

        let statements = emit(&schema, &CompileOptions::default());
        let accounts_ddl = statements.iter().find(|s| s.contains("CREATE TABLE accounts")).unwrap();
        let orders_ddl = statements.iter().find(|s| s.contains("CREATE TABLE orders")).unwrap();
        assert!(accounts_ddl.contains("_updated_at"));
        assert!(!orders_ddl.contains("_updated_at"));
    }
}
