//! # Compiler Configuration
//!
//! `CompileOptions` carries compiler-wide knobs that are orthogonal to the
//! schema itself: identifier quoting, an optional schema namespace prefix,
//! and whether to synthesize the hidden `_updated_at` column that LATEST
//! aggregations need (see the Open Question in the design notes).
//!
//! Deliberately does not read a file from disk — parsing the schema document
//! itself is an external driver's job; this only shapes *how* the already
//! parsed schema is compiled.

use serde::Deserialize;

use crate::error::{GenLogicError, Result};
use crate::model::types::is_valid_identifier;

/// Compiler-wide options, independent of any one schema.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Wrap identifiers in double quotes in emitted SQL.
    pub quote_identifiers: bool,
    /// Optional schema/namespace qualifier prepended to emitted table and
    /// trigger names (e.g. `"app"` -> `"app".accounts`).
    pub schema_qualifier: Option<String>,
    /// When true (the default), tables that are the source of a `Latest`
    /// aggregation get a hidden `_updated_at` column maintained by their
    /// own UPDATE trigger, used to decide which child row "wins".
    pub synthesize_updated_at: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            quote_identifiers: false,
            schema_qualifier: None,
            synthesize_updated_at: true,
        }
    }
}

impl CompileOptions {
    /// Validate semantic constraints serde cannot enforce. Call immediately
    /// after construction, before the resolve/validate/compile pipeline runs.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref qualifier) = self.schema_qualifier {
            if !is_valid_identifier(qualifier) {
                return Err(GenLogicError::Config {
                    message: format!("schema_qualifier '{qualifier}' is not a valid identifier"),
                });
            }
        }
        Ok(())
    }

    /// Render a bare name as a (possibly quoted, possibly schema-qualified)
    /// SQL identifier.
    pub fn qualify(&self, name: &str) -> String {
        let rendered = self.quote(name);
        match &self.schema_qualifier {
            Some(schema) => format!("{}.{}", self.quote(schema), rendered),
            None => rendered,
        }
    }

    /// Render a bare name as a quoted-or-not SQL identifier (no schema prefix).
    pub fn quote(&self, name: &str) -> String {
        if self.quote_identifiers {
            format!("\"{name}\"")
        } else {
            name.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unquoted_unqualified() {
        let opts = CompileOptions::default();
        assert_eq!(opts.qualify("accounts"), "accounts");
        assert!(opts.synthesize_updated_at);
    }

    #[test]
    fn quoting_wraps_identifiers() {
        let opts = CompileOptions {
            quote_identifiers: true,
            ..Default::default()
        };
        assert_eq!(opts.quote("accounts"), "\"accounts\"");
    }

    #[test]
    fn schema_qualifier_prefixes_name() {
        let opts = CompileOptions {
            schema_qualifier: Some("app".to_string()),
            ..Default::default()
        };
        assert_eq!(opts.qualify("accounts"), "app.accounts");
    }

    #[test]
    fn invalid_schema_qualifier_rejected() {
        let opts = CompileOptions {
            schema_qualifier: Some("not valid!".to_string()),
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn deserializes_from_partial_toml_like_struct() {
        let json = r#"{"quote_identifiers": true}"#;
        let opts: CompileOptions = serde_json::from_str(json).unwrap();
        assert!(opts.quote_identifiers);
        assert!(opts.synthesize_updated_at);
    }
}
