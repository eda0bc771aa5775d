//! Schema resolver: expands inheritance references against the reusable
//! column dictionary into a fully-qualified `ResolvedSchema`, validates
//! per-type size rules, attaches automation/calculated roles, and
//! materializes implicit foreign-key columns.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::error::{self, GenLogicError, Result};
use crate::expr;
use crate::model::input::{
    AutomationDeclaration, AutomationKind, ColumnDeclaration, ForeignKeyDeclaration, InlineColumn,
    ParsedSchema,
};
use crate::model::types::{
    is_valid_identifier, AutomationSource, BaseType, ColumnRole, ColumnSpec, ForeignKey,
    IndexDef, ResolvedSchema, TableSpec, UniqueConstraint,
};

/// Resolve a parsed schema into its canonical form. Every problem found is
/// collected before returning, rather than failing on the first one.
pub fn resolve(parsed: &ParsedSchema) -> Result<ResolvedSchema> {
    let mut errors = Vec::new();
    let mut tables = IndexMap::new();

    for table_name in &parsed.tables.duplicates {
        errors.push(GenLogicError::DuplicateTable {
            table: table_name.clone(),
        });
    }

    for (table_name, declaration) in &parsed.tables {
        if !is_valid_identifier(table_name) {
            errors.push(GenLogicError::InvalidIdentifier {
                path: "tables".to_string(),
                name: table_name.clone(),
            });
        }

        for column_name in &declaration.columns.duplicates {
            errors.push(GenLogicError::DuplicateColumn {
                table: table_name.clone(),
                column: column_name.clone(),
            });
        }

        let mut table = TableSpec::new(table_name.clone());

        for (column_name, column_decl) in &declaration.columns {
            if !is_valid_identifier(column_name) {
                errors.push(GenLogicError::InvalidIdentifier {
                    path: format!("tables.{table_name}.columns"),
                    name: column_name.clone(),
                });
                continue;
            }

            let Some(inline) = resolve_reference(
                &parsed.columns,
                table_name,
                column_name,
                column_decl,
                &mut errors,
            ) else {
                continue;
            };

            if let Some(spec) = build_column_spec(table_name, column_name, &inline, &mut errors) {
                table.columns.insert(column_name.clone(), spec);
            }
        }

        table.primary_key = if !declaration.primary_key.is_empty() {
            declaration.primary_key.clone()
        } else {
            table
                .columns
                .values()
                .filter(|c| c.primary_key)
                .map(|c| c.name.clone())
                .collect()
        };
        table.uniques = declaration
            .uniques
            .iter()
            .map(|columns| UniqueConstraint {
                columns: columns.clone(),
            })
            .collect();
        table.indexes = declaration
            .indexes
            .iter()
            .map(|columns| IndexDef {
                columns: columns.clone(),
            })
            .collect();

        tables.insert(table_name.clone(), table);
    }

    let table_names: Vec<String> = tables.keys().cloned().collect();
    for table_name in &table_names {
        for (fk_name, fk_decl) in &parsed.tables[table_name].foreign_keys {
            materialize_foreign_key(&mut tables, table_name, fk_name, fk_decl, &mut errors);
        }
    }

    fill_calculated_dependencies(&mut tables);

    error::aggregate(ResolvedSchema { tables }, errors)
}

/// Apply the four resolution rules from the schema document: null (inherit
/// same name), string (inherit named column), object with `$ref` (inherit
/// plus override), object without `$ref` (inline).
fn resolve_reference(
    dictionary: &IndexMap<String, InlineColumn>,
    table_name: &str,
    column_name: &str,
    decl: &ColumnDeclaration,
    errors: &mut Vec<GenLogicError>,
) -> Option<InlineColumn> {
    let lookup = |reference: &str, errors: &mut Vec<GenLogicError>| -> Option<InlineColumn> {
        match dictionary.get(reference) {
            Some(base) => Some(base.clone()),
            None => {
                errors.push(GenLogicError::UnknownReference {
                    table: table_name.to_string(),
                    column: column_name.to_string(),
                    reference: reference.to_string(),
                });
                None
            }
        }
    };

    match decl {
        ColumnDeclaration::InheritSameName(()) => lookup(column_name, errors),
        ColumnDeclaration::Inherit(reference) => lookup(reference, errors),
        ColumnDeclaration::Object(obj) => match &obj.reference {
            Some(reference) => lookup(reference, errors).map(|base| base.merged_with(&obj.fields)),
            None => Some(obj.fields.clone()),
        },
    }
}

/// Validate type/size rules and attach the column's role. `referenced_columns`
/// for `Calculated` roles is left empty here and filled in once every column
/// name in the table is known (`fill_calculated_dependencies`).
fn build_column_spec(
    table_name: &str,
    column_name: &str,
    inline: &InlineColumn,
    errors: &mut Vec<GenLogicError>,
) -> Option<ColumnSpec> {
    let Some(raw_type) = inline.base_type.as_deref() else {
        errors.push(GenLogicError::TypeSizeViolation {
            table: table_name.to_string(),
            column: column_name.to_string(),
            rule: "base_type is required".to_string(),
        });
        return None;
    };
    let base_type = match BaseType::parse(raw_type) {
        Some(base_type) => base_type,
        None => {
            errors.push(GenLogicError::TypeSizeViolation {
                table: table_name.to_string(),
                column: column_name.to_string(),
                rule: format!("unknown base_type '{raw_type}'"),
            });
            return None;
        }
    };

    validate_size_rules(table_name, column_name, base_type, inline, errors);

    let role = determine_role(inline);

    Some(ColumnSpec {
        name: column_name.to_string(),
        base_type,
        size: inline.size,
        decimal: inline.decimal,
        required: inline.required.unwrap_or(false),
        unique: inline.unique.unwrap_or(false),
        primary_key: inline.primary_key.unwrap_or(false),
        sequence: inline.sequence.unwrap_or(false),
        default: inline.default.clone(),
        role,
    })
}

fn validate_size_rules(
    table_name: &str,
    column_name: &str,
    base_type: BaseType,
    inline: &InlineColumn,
    errors: &mut Vec<GenLogicError>,
) {
    let mut violation = |rule: String| {
        errors.push(GenLogicError::TypeSizeViolation {
            table: table_name.to_string(),
            column: column_name.to_string(),
            rule,
        });
    };

    if base_type.requires_size() {
        if inline.size.is_none() {
            violation(format!("size is required for {}", base_type.sql_name()));
        }
        if inline.decimal.is_some() {
            violation(format!("decimal is forbidden for {}", base_type.sql_name()));
        }
    } else if base_type.allows_optional_size_and_decimal() {
        if inline.decimal.is_some() && inline.size.is_none() {
            violation("size is required when decimal is present".to_string());
        }
    } else {
        if inline.size.is_some() {
            violation(format!("size is forbidden for {}", base_type.sql_name()));
        }
        if inline.decimal.is_some() {
            violation(format!("decimal is forbidden for {}", base_type.sql_name()));
        }
    }
}

fn determine_role(inline: &InlineColumn) -> ColumnRole {
    if let Some(automation) = &inline.automation {
        return role_from_automation(automation);
    }
    if let Some(expression) = &inline.calculated {
        return ColumnRole::Calculated {
            expression: expression.clone(),
            referenced_columns: Vec::new(),
        };
    }
    if inline.sequence == Some(true) {
        return ColumnRole::Sequence;
    }
    ColumnRole::Plain
}

fn role_from_automation(automation: &AutomationDeclaration) -> ColumnRole {
    let source = AutomationSource {
        source_table: automation.table.clone(),
        source_fk_name: automation.foreign_key.clone(),
        source_column: automation.column.clone(),
    };
    match automation.kind {
        AutomationKind::Latest => ColumnRole::Latest(source),
        AutomationKind::Fetch => ColumnRole::Fetch(source),
        AutomationKind::FetchUpdates => ColumnRole::FetchUpdates(source),
        kind => ColumnRole::Aggregation {
            kind: kind
                .aggregation_kind()
                .expect("non-aggregation kinds handled above"),
            source,
        },
    }
}

/// Materialize the implicit foreign key column(s) for `fk_name` on
/// `table_name` if the user did not declare them directly, inheriting type
/// from the parent's primary key. Single-column parent keys name the child
/// column after the FK itself (or its `prefix`); composite keys name each
/// child column `<fk_or_prefix>_<parent_pk_column>`.
fn materialize_foreign_key(
    tables: &mut IndexMap<String, TableSpec>,
    table_name: &str,
    fk_name: &str,
    fk_decl: &ForeignKeyDeclaration,
    errors: &mut Vec<GenLogicError>,
) {
    let path = format!("tables.{table_name}.foreign_keys.{fk_name}");
    if !is_valid_identifier(fk_name) {
        errors.push(GenLogicError::InvalidIdentifier {
            path: path.clone(),
            name: fk_name.to_string(),
        });
    }

    let Some(parent) = tables.get(&fk_decl.table) else {
        errors.push(GenLogicError::UnknownTable {
            path,
            table: fk_decl.table.clone(),
        });
        return;
    };

    if parent.primary_key.is_empty() {
        errors.push(GenLogicError::Config {
            message: format!("{path}: parent table '{}' has no primary key", fk_decl.table),
        });
        return;
    }

    let parent_pk = parent.primary_key.clone();
    let parent_pk_specs: Vec<ColumnSpec> = parent_pk
        .iter()
        .map(|pk| {
            parent
                .column(pk)
                .expect("primary_key only names declared columns")
                .clone()
        })
        .collect();

    let root = fk_decl.prefix.clone().unwrap_or_else(|| fk_name.to_string());
    let child_columns: Vec<String> = if parent_pk.len() == 1 {
        vec![root]
    } else {
        parent_pk.iter().map(|pk| format!("{root}_{pk}")).collect()
    };

    let table = tables
        .get_mut(table_name)
        .expect("table_name came from this schema's own table list");

    for (child_column, parent_pk_spec) in child_columns.iter().zip(parent_pk_specs.iter()) {
        table
            .columns
            .entry(child_column.clone())
            .and_modify(|existing| {
                if matches!(existing.role, ColumnRole::Plain) {
                    existing.role = ColumnRole::ForeignKey {
                        fk_name: fk_name.to_string(),
                    };
                }
            })
            .or_insert_with(|| ColumnSpec {
                name: child_column.clone(),
                base_type: parent_pk_spec.base_type,
                size: parent_pk_spec.size,
                decimal: parent_pk_spec.decimal,
                required: fk_decl.required.unwrap_or(true),
                unique: false,
                primary_key: false,
                sequence: false,
                default: None,
                role: ColumnRole::ForeignKey {
                    fk_name: fk_name.to_string(),
                },
            });
    }

    table.foreign_keys.insert(
        fk_name.to_string(),
        ForeignKey {
            name: fk_name.to_string(),
            parent_table: fk_decl.table.clone(),
            child_columns,
            parent_columns: parent_pk,
            on_delete: fk_decl.delete,
        },
    );
}

/// Second pass over every table: now that every column name is known,
/// extract each calculated column's referenced identifiers and keep only
/// the ones naming another declared column of the same table.
fn fill_calculated_dependencies(tables: &mut IndexMap<String, TableSpec>) {
    for table in tables.values_mut() {
        let declared: HashSet<String> = table.columns.keys().cloned().collect();
        let updates: Vec<(String, String, Vec<String>)> = table
            .columns
            .values()
            .filter_map(|column| {
                column
                    .calculated_expression()
                    .map(|(expression, _)| (column.name.clone(), expression.to_string()))
            })
            .map(|(name, expression)| {
                let referenced = expr::extract_identifiers(&expression)
                    .into_iter()
                    .filter(|id| *id != name && declared.contains(id))
                    .collect();
                (name, expression, referenced)
            })
            .collect();

        for (name, expression, referenced_columns) in updates {
            if let Some(column) = table.columns.get_mut(&name) {
                column.role = ColumnRole::Calculated {
                    expression,
                    referenced_columns,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::input::{ColumnDeclaration, ObjectColumn, TableDeclaration};

    fn schema_with_one_column(decl: ColumnDeclaration) -> ParsedSchema {
        let mut tables = IndexMap::new();
        let mut table = TableDeclaration::default();
        table.columns.insert("amount".to_string(), decl);
        tables.insert("ledger".to_string(), table);
        ParsedSchema {
            columns: IndexMap::new(),
            tables: tables.into(),
        }
    }

    #[test]
    fn inline_column_resolves_directly() {
        let decl = ColumnDeclaration::Object(ObjectColumn {
            reference: None,
            fields: InlineColumn {
                base_type: Some("integer".into()),
                required: Some(true),
                ..Default::default()
            },
        });
        let resolved = resolve(&schema_with_one_column(decl)).unwrap();
        let column = resolved.table("ledger").unwrap().column("amount").unwrap();
        assert_eq!(column.base_type, BaseType::Integer);
        assert!(column.required);
    }

    #[test]
    fn unknown_string_reference_errors() {
        let decl = ColumnDeclaration::Inherit("money".into());
        let err = resolve(&schema_with_one_column(decl)).unwrap_err();
        assert!(matches!(err, GenLogicError::UnknownReference { .. }));
    }

    #[test]
    fn varchar_without_size_is_rejected() {
        let decl = ColumnDeclaration::Object(ObjectColumn {
            reference: None,
            fields: InlineColumn {
                base_type: Some("varchar".into()),
                ..Default::default()
            },
        });
        let err = resolve(&schema_with_one_column(decl)).unwrap_err();
        assert!(matches!(err, GenLogicError::TypeSizeViolation { .. }));
    }

    #[test]
    fn single_column_fk_materializes_named_after_fk() {
        let mut tables = IndexMap::new();

        let mut accounts = TableDeclaration::default();
        accounts.columns.insert(
            "id".into(),
            ColumnDeclaration::Object(ObjectColumn {
                reference: None,
                fields: InlineColumn {
                    base_type: Some("integer".into()),
                    primary_key: Some(true),
                    ..Default::default()
                },
            }),
        );
        tables.insert("accounts".into(), accounts);

        let mut ledger = TableDeclaration::default();
        ledger.foreign_keys.insert(
            "account_fk".into(),
            ForeignKeyDeclaration {
                table: "accounts".into(),
                delete: Default::default(),
                prefix: None,
                required: None,
            },
        );
        tables.insert("ledger".into(), ledger);

        let parsed = ParsedSchema {
            columns: IndexMap::new(),
            tables: tables.into(),
        };
        let resolved = resolve(&parsed).unwrap();
        let ledger = resolved.table("ledger").unwrap();
        let fk_column = ledger.column("account_fk").unwrap();
        assert_eq!(fk_column.base_type, BaseType::Integer);
        assert!(matches!(fk_column.role, ColumnRole::ForeignKey { .. }));
        assert_eq!(ledger.foreign_keys["account_fk"].parent_table, "accounts");
    }

    #[test]
    fn calculated_column_dependency_extracted_after_resolution() {
        let mut tables = IndexMap::new();
        let mut table = TableDeclaration::default();
        table.columns.insert(
            "unit_price".into(),
            ColumnDeclaration::Object(ObjectColumn {
                reference: None,
                fields: InlineColumn {
                    base_type: Some("numeric".into()),
                    ..Default::default()
                },
            }),
        );
        table.columns.insert(
            "total".into(),
            ColumnDeclaration::Object(ObjectColumn {
                reference: None,
                fields: InlineColumn {
                    base_type: Some("numeric".into()),
                    calculated: Some("unit_price * 2".into()),
                    ..Default::default()
                },
            }),
        );
        tables.insert("items".into(), table);
        let parsed = ParsedSchema {
            columns: IndexMap::new(),
            tables: tables.into(),
        };
        let resolved = resolve(&parsed).unwrap();
        let total = resolved.table("items").unwrap().column("total").unwrap();
        let (_, referenced) = total.calculated_expression().unwrap();
        assert_eq!(referenced, ["unit_price".to_string()]);
    }

    #[test]
    fn repeated_table_key_in_source_document_is_reported() {
        let json = r#"{
            "tables": {
                "ledger": {"columns": {"id": {"base_type": "integer", "primary_key": true}}},
                "ledger": {"columns": {"id": {"base_type": "integer", "primary_key": true}}}
            }
        }"#;
        let parsed: ParsedSchema = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.tables.duplicates, vec!["ledger".to_string()]);
        let err = resolve(&parsed).unwrap_err();
        match err {
            GenLogicError::DuplicateTable { table } => assert_eq!(table, "ledger"),
            other => panic!("expected DuplicateTable, got {other:?}"),
        }
    }

    #[test]
    fn repeated_column_key_in_source_document_is_reported() {
        let json = r#"{
            "tables": {
                "ledger": {
                    "columns": {
                        "amount": {"base_type": "integer"},
                        "amount": {"base_type": "numeric", "size": 10, "decimal": 2}
                    }
                }
            }
        }"#;
        let parsed: ParsedSchema = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.tables["ledger"].columns.duplicates,
            vec!["amount".to_string()]
        );
        let err = resolve(&parsed).unwrap_err();
        match err {
            GenLogicError::DuplicateColumn { table, column } => {
                assert_eq!(table, "ledger");
                assert_eq!(column, "amount");
            }
            other => panic!("expected DuplicateColumn, got {other:?}"),
        }
    }
}
