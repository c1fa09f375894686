//! Layout descriptions for packed per-vertex algorithm output
//!
//! Workers describe their output buffer with a string such as
//! `"dl pagerank label"`: one type letter per column, followed by the
//! column names in the same order. Every column holds one element per
//! vertex, and columns are packed back to back:
//!
//! ```text
//! offset(k) = sum over j < k of vertex_count * size_of(type_j)
//! ```
//!
//! This is the only module that computes byte offsets into a buffer.

use serde::Serialize;

use crate::column::TypedColumnView;
use crate::error::{Result, ServerError};

/// Element type of a column, keyed by its description letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ElementType {
    /// `f`: 32-bit float
    F32,
    /// `d`: 64-bit float
    F64,
    /// `i`: 32-bit signed int
    I32,
    /// `l`: 64-bit signed int
    I64,
    /// `b`: byte
    U8,
}

impl ElementType {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'f' => Some(ElementType::F32),
            'd' => Some(ElementType::F64),
            'i' => Some(ElementType::I32),
            'l' => Some(ElementType::I64),
            'b' => Some(ElementType::U8),
            _ => None,
        }
    }

    pub fn code(&self) -> char {
        match self {
            ElementType::F32 => 'f',
            ElementType::F64 => 'd',
            ElementType::I32 => 'i',
            ElementType::I64 => 'l',
            ElementType::U8 => 'b',
        }
    }

    /// Size of one element in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::F64 | ElementType::I64 => 8,
            ElementType::U8 => 1,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, ElementType::I32 | ElementType::I64 | ElementType::U8)
    }

    /// Human-readable name for descriptions sent to clients
    pub fn type_name(&self) -> &'static str {
        match self {
            ElementType::F32 => "float",
            ElementType::F64 => "double",
            ElementType::I32 => "int32",
            ElementType::I64 => "int64",
            ElementType::U8 => "byte",
        }
    }
}

/// Position and type of one resolved column.
///
/// Holds no reference to the buffer, so it can be memoized across
/// requests and re-bound while the owning algorithm state is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub offset: usize,
    pub element_type: ElementType,
    /// Elements in the column (the vertex count)
    pub len: usize,
}

impl ColumnLayout {
    /// Bytes spanned by the column, saturating at `usize::MAX`
    pub fn byte_len(&self) -> usize {
        self.len.saturating_mul(self.element_type.size())
    }

    /// Bind this layout to the buffer it was resolved against.
    pub fn bind<'a>(&self, bytes: &'a [u8]) -> Result<TypedColumnView<'a>> {
        let end = self
            .len
            .checked_mul(self.element_type.size())
            .and_then(|n| self.offset.checked_add(n))
            .filter(|end| *end <= bytes.len())
            .ok_or(ServerError::ColumnOutOfBounds {
                offset: self.offset,
                len: self.byte_len(),
                buffer_len: bytes.len(),
            })?;
        Ok(TypedColumnView::new(&bytes[self.offset..end], self.element_type, self.len))
    }
}

/// Locate `column` inside a buffer laid out by `description`.
///
/// Walks the names in lock-step with the type letters, accumulating the
/// byte offset of every column skipped.
pub fn resolve_layout(description: &str, vertex_count: usize, column: &str) -> Result<ColumnLayout> {
    let mut tokens = description.split_whitespace();
    let codes = tokens
        .next()
        .ok_or_else(|| ServerError::InvalidDescription("empty description".to_string()))?;
    let mut codes = codes.chars();
    let mut offset = 0usize;

    for name in tokens {
        let code = codes
            .next()
            .ok_or_else(|| ServerError::ColumnNotFound(column.to_string()))?;
        let element_type = ElementType::from_code(code).ok_or_else(|| ServerError::UnknownTypeCode {
            code,
            description: description.to_string(),
        })?;

        let span = vertex_count
            .checked_mul(element_type.size())
            .ok_or_else(|| overflow(description, vertex_count))?;
        if name == column {
            offset
                .checked_add(span)
                .ok_or_else(|| overflow(description, vertex_count))?;
            return Ok(ColumnLayout { offset, element_type, len: vertex_count });
        }
        offset = offset
            .checked_add(span)
            .ok_or_else(|| overflow(description, vertex_count))?;
    }

    Err(ServerError::ColumnNotFound(column.to_string()))
}

fn overflow(description: &str, vertex_count: usize) -> ServerError {
    ServerError::ResourceExhausted(format!(
        "layout '{}' for {} vertices exceeds the address space",
        description, vertex_count
    ))
}

/// Resolve `column` and bind it to `bytes` in one step.
pub fn resolve<'a>(
    description: &str,
    bytes: &'a [u8],
    vertex_count: usize,
    column: &str,
) -> Result<TypedColumnView<'a>> {
    resolve_layout(description, vertex_count, column)?.bind(bytes)
}

/// Fully parsed description, for listing columns to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub columns: Vec<(String, ElementType)>,
}

impl Schema {
    /// Parse and validate a description: every letter known and exactly
    /// one letter per name.
    pub fn parse(description: &str) -> Result<Self> {
        let mut tokens = description.split_whitespace();
        let codes = tokens
            .next()
            .ok_or_else(|| ServerError::InvalidDescription("empty description".to_string()))?;
        let names: Vec<&str> = tokens.collect();

        if codes.chars().count() != names.len() {
            return Err(ServerError::InvalidDescription(format!(
                "{} type codes for {} columns",
                codes.chars().count(),
                names.len()
            )));
        }

        let columns = codes
            .chars()
            .zip(names)
            .map(|(code, name)| {
                ElementType::from_code(code)
                    .map(|t| (name.to_string(), t))
                    .ok_or_else(|| ServerError::UnknownTypeCode {
                        code,
                        description: description.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { columns })
    }

    /// Bytes used per vertex across all columns
    pub fn bytes_per_vertex(&self) -> usize {
        self.columns.iter().map(|(_, t)| t.size()).sum()
    }
}
