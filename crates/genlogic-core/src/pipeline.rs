//! Top-level pipeline: `ParsedSchema -> ResolvedSchema -> validated graphs ->
//! DDL text + trigger text`, in the fixed order C1 -> C2 -> C3 -> C4.

use crate::compile::{automations, ddl, trigger};
use crate::config::CompileOptions;
use crate::error::Result;
use crate::graph::fk;
use crate::model::input::ParsedSchema;
use crate::resolve;

/// The emitted statement sequence, in the order an external driver should
/// execute them inside one transaction: DDL first (tables must exist before
/// the triggers that reference them), then trigger functions and triggers.
#[derive(Debug, Clone, Default)]
pub struct CompiledArtifacts {
    pub ddl: Vec<String>,
    pub triggers: Vec<String>,
}

impl CompiledArtifacts {
    /// All statements in execution order.
    pub fn statements(&self) -> impl Iterator<Item = &String> {
        self.ddl.iter().chain(self.triggers.iter())
    }
}

/// Run the full pipeline over a parsed schema: resolve inheritance, validate
/// the FK graph (C2), assemble and validate per-table calc graphs (C3) while
/// building `TableAutomations`, then emit DDL and trigger text (C4).
pub fn compile_schema(parsed: &ParsedSchema, options: &CompileOptions) -> Result<CompiledArtifacts> {
    options.validate()?;

    let resolved = resolve::resolve(parsed)?;
    tracing::debug!(tables = resolved.tables.len(), "schema resolved");

    fk::validate(&resolved)?;
    tracing::debug!("foreign key graph acyclic");

    let table_automations = automations::assemble(&resolved)?;
    tracing::debug!("calculated-column graphs acyclic, automations assembled");

    let ddl_statements = ddl::emit(&resolved, options);
    let trigger_statements = trigger::emit(&resolved, &table_automations, options)?;

    Ok(CompiledArtifacts {
        ddl: ddl_statements,
        triggers: trigger_statements,
    })
}
