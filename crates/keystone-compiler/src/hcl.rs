//! Minimal HCL writer.
//!
//! Only the subset needed for generated Terraform: labelled blocks, nested
//! blocks and attributes whose values are already-rendered expressions.
//! Consecutive attributes are aligned on `=` the way `terraform fmt` does.

use serde_json::Value;

use crate::error::{CompileError, CompileResult};
use crate::graph::Node;

/// Quote a string as an HCL string literal.
///
/// Template sequences are escaped so user input is never interpolated.
#[must_use]
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a list of strings as an HCL tuple of string literals.
#[must_use]
pub fn string_list<S: AsRef<str>>(items: &[S]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s.as_ref())).collect();
    format!("[{}]", quoted.join(", "))
}

/// A `terraform`-style block with an ordered body.
#[derive(Debug, Clone)]
pub struct Block {
    header: String,
    items: Vec<Item>,
}

#[derive(Debug, Clone)]
enum Item {
    Attr(String, String),
    Block(Block),
}

impl Block {
    /// Create a block from its header, e.g. `ingress` or `terraform`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            items: Vec::new(),
        }
    }

    /// Create a block with one quoted label, e.g. `variable "tags"`.
    #[must_use]
    pub fn labelled(keyword: &str, label: &str) -> Self {
        Self::new(format!("{keyword} {}", quote(label)))
    }

    /// Create a `resource "<kind>" "<name>"` block.
    #[must_use]
    pub fn resource(kind: &str, name: &str) -> Self {
        Self::new(format!("resource {} {}", quote(kind), quote(name)))
    }

    /// Append an attribute whose value is a raw expression.
    #[must_use]
    pub fn attr(mut self, key: &str, expr: impl Into<String>) -> Self {
        self.push_attr(key, expr);
        self
    }

    /// Append an attribute whose value is a string literal.
    #[must_use]
    pub fn string(self, key: &str, value: &str) -> Self {
        self.attr(key, quote(value))
    }

    /// Append a nested block.
    #[must_use]
    pub fn block(mut self, block: Self) -> Self {
        self.push_block(block);
        self
    }

    /// Append an attribute in place.
    pub fn push_attr(&mut self, key: &str, expr: impl Into<String>) {
        self.items.push(Item::Attr(key.to_owned(), expr.into()));
    }

    /// Append a string literal attribute in place.
    pub fn push_string(&mut self, key: &str, value: &str) {
        self.push_attr(key, quote(value));
    }

    /// Append a nested block in place.
    pub fn push_block(&mut self, block: Self) {
        self.items.push(Item::Block(block));
    }

    /// Render the block and its body.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out, 0);
        out
    }

    fn write_to(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        let inner = "  ".repeat(depth + 1);
        out.push_str(&format!("{pad}{} {{\n", self.header));

        let mut idx = 0;
        while idx < self.items.len() {
            if idx > 0 {
                out.push('\n');
            }
            match &self.items[idx] {
                Item::Block(block) => {
                    block.write_to(out, depth + 1);
                    idx += 1;
                }
                Item::Attr(..) => {
                    let run_end = self.items[idx..]
                        .iter()
                        .position(|item| matches!(item, Item::Block(_)))
                        .map_or(self.items.len(), |n| idx + n);
                    let width = self.items[idx..run_end]
                        .iter()
                        .filter_map(|item| match item {
                            Item::Attr(key, _) => Some(key.len()),
                            Item::Block(_) => None,
                        })
                        .max()
                        .unwrap_or(0);
                    for item in &self.items[idx..run_end] {
                        if let Item::Attr(key, expr) = item {
                            out.push_str(&format!("{inner}{key:<width$} = {expr}\n"));
                        }
                    }
                    idx = run_end;
                }
            }
        }

        out.push_str(&format!("{pad}}}\n"));
    }
}

/// Plain text of any JSON value: strings verbatim, everything else as JSON.
#[must_use]
pub fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Render a required property as a string literal. Never fails.
#[must_use]
pub fn required_string(value: &Value) -> String {
    quote(&text(value))
}

/// Render a required numeric property.
///
/// Numbers and numeric strings render bare; anything else renders as a
/// string literal and is left for the tool to reject.
#[must_use]
pub fn required_number(value: &Value) -> String {
    match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) if s.trim().parse::<f64>().is_ok() => s.trim().to_owned(),
        other => required_string(other),
    }
}

/// Render a scalar property as a string literal.
///
/// Strings are used verbatim, numbers and booleans by their JSON text.
pub fn string_property(node: &Node, field: &str, value: &Value) -> CompileResult<String> {
    match value {
        Value::String(s) => Ok(quote(s)),
        Value::Number(n) => Ok(quote(&n.to_string())),
        Value::Bool(b) => Ok(quote(&b.to_string())),
        _ => Err(CompileError::invalid_property(
            &node.id,
            field,
            "expected a string",
        )),
    }
}

/// Render a numeric property. Numeric strings such as `"22"` are accepted.
pub fn number_property(node: &Node, field: &str, value: &Value) -> CompileResult<String> {
    match value {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if s.trim().parse::<f64>().is_ok() => Ok(s.trim().to_owned()),
        _ => Err(CompileError::invalid_property(
            &node.id,
            field,
            "expected a number",
        )),
    }
}

/// Render a boolean property.
pub fn bool_property(node: &Node, field: &str, value: &Value) -> CompileResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| CompileError::invalid_property(&node.id, field, "expected a boolean"))
}

/// Read a property holding one string or a list of strings.
pub fn strings_property(node: &Node, field: &str, value: &Value) -> CompileResult<Vec<String>> {
    let invalid =
        || CompileError::invalid_property(&node.id, field, "expected a string or list of strings");
    match value {
        Value::String(s) => Ok(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(ToOwned::to_owned).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}
