//! Fragment splitter — decodes a request's wire text and partitions it into
//! macro-definition blocks and statement text.
//!
//! The splitter validates nothing about block contents: malformed fragments
//! pass through untouched and fail later in the compiler. Its only job is the
//! partition — `{% macro %}...{% endmacro %}` blocks on one side, everything
//! else (plain SQL, `{{ ... }}` expressions, non-macro tags) on the other,
//! both preserving source order.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::{Result, RpcError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Macro,
    Data,
}

/// One top-level block of the request source.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub kind: BlockKind,
    pub text: String,
}

/// The split request source: the primary statement and the macro overrides.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitSource {
    /// Non-macro blocks concatenated with no separator, in source order.
    pub statement: String,
    /// Macro blocks joined with newlines, in source order.
    pub macros: String,
}

/// Decode a request source from its wire representation (base64 over UTF-8).
pub fn decode_source(raw: &str) -> Result<String> {
    let bytes = BASE64
        .decode(raw.trim())
        .map_err(|e| RpcError::Parse(format!("invalid base64 request body: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| RpcError::Parse(format!("request body is not valid UTF-8: {}", e)))
}

/// Decode and partition a raw request source.
pub fn split_request_source(raw: &str) -> Result<SplitSource> {
    let decoded = decode_source(raw)?;
    Ok(split_blocks(&decoded))
}

/// Partition already-decoded source text.
pub fn split_blocks(source: &str) -> SplitSource {
    let mut macro_blocks: Vec<String> = Vec::new();
    let mut statement = String::new();

    for block in extract_toplevel_blocks(source) {
        match block.kind {
            BlockKind::Macro => macro_blocks.push(block.text),
            BlockKind::Data => statement.push_str(&block.text),
        }
    }

    SplitSource {
        statement,
        macros: macro_blocks.join("\n"),
    }
}

/// Borrowed view of one top-level block, used internally to avoid copying.
struct RawBlock<'a> {
    kind: BlockKind,
    text: &'a str,
}

/// Scan the source into top-level blocks.
///
/// A `{% macro %}` tag opens a macro block that runs through its matching
/// `{% endmacro %}` tag; an unterminated macro block extends to end of input
/// (it will fail in the macro parser, not here). All other text belongs to
/// data blocks.
pub fn extract_toplevel_blocks(source: &str) -> Vec<Block> {
    raw_blocks(source)
        .into_iter()
        .map(|b| Block {
            kind: b.kind,
            text: b.text.to_string(),
        })
        .collect()
}

fn raw_blocks(source: &str) -> Vec<RawBlock<'_>> {
    let bytes = source.as_bytes();
    let mut blocks = Vec::new();
    let mut data_start = 0;
    let mut i = 0;

    while i + 1 < bytes.len() {
        if bytes[i] == b'{' && bytes[i + 1] == b'%' && tag_name(source, i) == Some("macro") {
            if data_start < i {
                blocks.push(RawBlock {
                    kind: BlockKind::Data,
                    text: &source[data_start..i],
                });
            }
            let end = macro_block_end(source, i);
            blocks.push(RawBlock {
                kind: BlockKind::Macro,
                text: &source[i..end],
            });
            i = end;
            data_start = end;
        } else {
            i += 1;
        }
    }

    if data_start < source.len() {
        blocks.push(RawBlock {
            kind: BlockKind::Data,
            text: &source[data_start..],
        });
    }

    blocks
}

/// Read the tag word of a `{% ... %}` tag starting at `open`.
fn tag_name(source: &str, open: usize) -> Option<&str> {
    let rest = source.get(open + 2..)?;
    // Whitespace-control dash is allowed: `{%- macro ... -%}`
    let rest = rest.strip_prefix('-').unwrap_or(rest);
    let rest = rest.trim_start();
    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if end == 0 {
        None
    } else {
        Some(&rest[..end])
    }
}

/// Find the end of a macro block opened at `open`: one past the closing
/// `%}` of the matching `{% endmacro %}` tag, or end of input.
fn macro_block_end(source: &str, open: usize) -> usize {
    let mut j = open + 2;
    while let Some(found) = source[j..].find("{%") {
        let pos = j + found;
        if tag_name(source, pos) == Some("endmacro") {
            if let Some(close) = source[pos..].find("%}") {
                return pos + close + 2;
            }
            return source.len();
        }
        j = pos + 2;
    }
    source.len()
}
