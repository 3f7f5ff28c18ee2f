use crate::Expr;
use serde::{Deserialize, Serialize};

// The parsed form of a configuration file, as delivered by the reader.
// The text grammar and the reader itself live outside of this crate;
// the decoder consumes this tree and nothing else.

/// Pos is a cursor position within a configuration source file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    /// One-based line number.
    pub line: u32,
    /// One-based column, in characters.
    pub column: u32,
    /// Zero-based byte offset.
    pub byte: usize,
}

/// Range is a half-open span of configuration source.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Pos,
    pub end: Pos,
}

impl Range {
    pub fn new(start: Pos, end: Pos) -> Self {
        Self { start, end }
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.start.line, self.start.column)
    }
}

/// Attribute is a `name = expression` assignment within a body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub expr: Expr,
    #[serde(default)]
    pub range: Range,
}

/// Block is a labeled body, such as `resource "type" "name" { ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(rename = "type")]
    pub type_: String,
    pub labels: Vec<String>,
    pub body: Body,
    /// Range of the block header, used to anchor diagnostics about the
    /// block as a whole.
    #[serde(default)]
    pub range: Range,
}

impl Block {
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            labels: Vec::new(),
            body: Body::default(),
            range: Range::default(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.labels.push(label.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, expr: Expr) -> Self {
        self.body.attributes.push(Attribute {
            name: name.into(),
            expr,
            range: Range::default(),
        });
        self
    }

    pub fn block(mut self, block: Block) -> Self {
        self.body.blocks.push(block);
        self
    }
}

/// Body is a sequence of attributes and nested blocks. The root body of
/// a configuration holds only blocks.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Body {
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            attributes: Vec::new(),
            blocks,
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}
