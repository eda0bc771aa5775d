//! Identifier extraction and rewriting for calculated/check expressions.
//! A light lexer is sufficient here; full SQL parsing is unnecessary since
//! expressions are emitted back out verbatim except for identifier prefixes.

use std::collections::HashSet;

use crate::config::CompileOptions;

/// Scan `expression` for identifier tokens (`[A-Za-z_][A-Za-z0-9_]*`),
/// in first-occurrence order with duplicates removed. Identifiers inside
/// single-quoted string literals are skipped. Tokens that don't name a
/// declared column (function names, keywords) are filtered out by the
/// caller, not here.
pub fn extract_identifiers(expression: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokenize(expression) {
        if let Token::Identifier(name) = token {
            if seen.insert(name.clone()) {
                out.push(name);
            }
        }
    }
    out
}

/// Rewrite every identifier in `expression` that names a column in
/// `declared_columns` to `<prefix>.<identifier>` (e.g. `col` -> `NEW.col`,
/// or `NEW."col"` with `options.quote_identifiers` set), leaving everything
/// else — operators, literals, function names, unrecognized identifiers —
/// untouched. `prefix` itself (`NEW`/`OLD`) is a PL/pgSQL record variable,
/// never quoted.
pub fn rewrite_with_prefix(
    expression: &str,
    declared_columns: &HashSet<String>,
    prefix: &str,
    options: &CompileOptions,
) -> String {
    let mut output = String::with_capacity(expression.len());
    for token in tokenize(expression) {
        match token {
            Token::Identifier(name) => {
                if declared_columns.contains(&name) {
                    output.push_str(prefix);
                    output.push('.');
                    output.push_str(&options.quote(&name));
                } else {
                    output.push_str(&name);
                }
            }
            Token::Other(text) => output.push_str(&text),
        }
    }
    output
}

enum Token {
    Identifier(String),
    Other(String),
}

fn tokenize(expression: &str) -> Vec<Token> {
    let chars: Vec<char> = expression.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Identifier(chars[start..i].iter().collect()));
        } else if c == '\'' {
            // String literal: copy verbatim through the closing quote.
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                i += 1;
            }
            if i < chars.len() {
                i += 1; // consume closing quote
            }
            tokens.push(Token::Other(chars[start..i].iter().collect()));
        } else {
            let start = i;
            i += 1;
            tokens.push(Token::Other(chars[start..i].iter().collect()));
        }
    }
    tokens
}
