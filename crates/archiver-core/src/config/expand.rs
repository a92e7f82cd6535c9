use std::fmt;
use std::path::Path;

use serde_yaml::Value;

use crate::error::{ArchiverError, Result};

/// Expand `${VAR}` and `${VAR:-default}` placeholders in raw config text.
///
/// Document references (`${section.key}`) are left untouched here; they are
/// resolved against the parsed YAML tree by [`resolve_document_refs`].
pub fn expand_env_placeholders(input: &str, path: &Path) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("${") {
        let start = cursor + offset;
        out.push_str(&input[cursor..start]);

        let token_start = start + 2;
        let Some(token_end_rel) = input[token_start..].find('}') else {
            return Err(expand_error(
                path,
                input,
                start,
                "unterminated placeholder",
            ));
        };
        let token_end = token_start + token_end_rel;
        let token = &input[token_start..token_end];

        if is_document_ref(token) {
            // Keep verbatim for the second pass.
            out.push_str(&input[start..=token_end]);
        } else {
            out.push_str(&resolve_env_token(token, path, input, start)?);
        }
        cursor = token_end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn resolve_env_token(token: &str, path: &Path, input: &str, start: usize) -> Result<String> {
    if token.is_empty() {
        return Err(expand_error(path, input, start, "empty placeholder"));
    }

    if let Some(split_at) = token.find(":-") {
        let name = &token[..split_at];
        let default = &token[split_at + 2..];
        if !is_valid_env_var_name(name) {
            return Err(expand_error(
                path,
                input,
                start,
                format!("invalid environment variable name '{name}'"),
            ));
        }

        return match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            Ok(_) => Ok(default.to_string()),
            Err(std::env::VarError::NotPresent) => Ok(default.to_string()),
            Err(std::env::VarError::NotUnicode(_)) => Err(expand_error(
                path,
                input,
                start,
                format!("environment variable '{name}' is not valid UTF-8"),
            )),
        };
    }

    if !is_valid_env_var_name(token) {
        return Err(expand_error(
            path,
            input,
            start,
            format!("invalid placeholder '{token}'"),
        ));
    }

    match std::env::var(token) {
        Ok(value) => Ok(value),
        Err(std::env::VarError::NotPresent) => Err(expand_error(
            path,
            input,
            start,
            format!("environment variable '{token}' is not set"),
        )),
        Err(std::env::VarError::NotUnicode(_)) => Err(expand_error(
            path,
            input,
            start,
            format!("environment variable '{token}' is not valid UTF-8"),
        )),
    }
}

/// A token is a document reference when it is a dotted path of plain
/// identifiers (`app.work_dir`). Environment variable names cannot contain
/// dots, so the two namespaces never collide.
fn is_document_ref(token: &str) -> bool {
    token.contains('.')
        && !token.contains(":-")
        && token
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()))
}

fn is_valid_env_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first == '_' || first.is_ascii_alphabetic()) {
        return false;
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

fn expand_error(path: &Path, input: &str, start: usize, message: impl fmt::Display) -> ArchiverError {
    let (line, column) = byte_offset_to_line_col(input, start);
    ArchiverError::Config(format!(
        "invalid config '{}': {message} at line {line}, column {column}",
        path.display()
    ))
}

fn byte_offset_to_line_col(input: &str, byte_offset: usize) -> (usize, usize) {
    let mut line = 1usize;
    let mut column = 1usize;
    for ch in input[..byte_offset].chars() {
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line, column)
}

/// Resolve `${section.key}` references in every string scalar of the parsed
/// document. Targets are looked up in the original tree, so forward
/// references work; a reference chain that revisits a path is a cycle and a
/// configuration error.
pub fn resolve_document_refs(doc: &mut Value, path: &Path) -> Result<()> {
    let snapshot = doc.clone();
    rewrite_value(doc, &snapshot, path)
}

fn rewrite_value(value: &mut Value, snapshot: &Value, path: &Path) -> Result<()> {
    match value {
        Value::String(s) => {
            if s.contains("${") {
                let mut stack = Vec::new();
                *s = resolve_refs_in_str(s, snapshot, path, &mut stack)?;
            }
            Ok(())
        }
        Value::Sequence(seq) => {
            for item in seq {
                rewrite_value(item, snapshot, path)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                rewrite_value(v, snapshot, path)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn resolve_refs_in_str(
    input: &str,
    snapshot: &Value,
    path: &Path,
    stack: &mut Vec<String>,
) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut cursor = 0usize;

    while let Some(offset) = input[cursor..].find("${") {
        let start = cursor + offset;
        out.push_str(&input[cursor..start]);

        let token_start = start + 2;
        let Some(token_end_rel) = input[token_start..].find('}') else {
            // Env pass already rejected unterminated tokens.
            out.push_str(&input[start..]);
            return Ok(out);
        };
        let token_end = token_start + token_end_rel;
        let token = &input[token_start..token_end];

        if !is_document_ref(token) {
            out.push_str(&input[start..=token_end]);
            cursor = token_end + 1;
            continue;
        }

        if stack.iter().any(|seen| seen == token) {
            return Err(ArchiverError::Config(format!(
                "invalid config '{}': circular reference '${{{token}}}' (chain: {})",
                path.display(),
                stack.join(" -> ")
            )));
        }

        let target = lookup_scalar(snapshot, token).ok_or_else(|| {
            ArchiverError::Config(format!(
                "invalid config '{}': reference '${{{token}}}' does not name a scalar value",
                path.display()
            ))
        })?;

        stack.push(token.to_string());
        let resolved = resolve_refs_in_str(&target, snapshot, path, stack)?;
        stack.pop();
        out.push_str(&resolved);
        cursor = token_end + 1;
    }

    out.push_str(&input[cursor..]);
    Ok(out)
}

fn lookup_scalar(snapshot: &Value, dotted: &str) -> Option<String> {
    let mut node = snapshot;
    for seg in dotted.split('.') {
        let key = Value::String(seg.to_string());
        node = node.as_mapping()?.get(&key)?;
    }
    match node {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
