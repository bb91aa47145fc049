// SPDX-License-Identifier: MIT
//! Error types shared by the reader, writer and orchestration layers

use crate::format::ShapeType;

/// Errors that can occur while reading or writing shapefile sets
#[derive(Debug, thiserror::Error)]
pub enum ShapefileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid input: bad signature or version, shape-type
    /// mismatch mid-file, undersized records, schema not first, ...
    #[error("Invalid format: {0}")]
    Format(String),

    /// The stream ended in the middle of a record
    #[error("Truncated {context}: needed {needed} bytes, {available} available")]
    Truncated {
        context: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Unsupported geometry: {0}")]
    UnsupportedGeometry(String),

    #[error("Feature list must contain geometry of one type: expected {expected}, found {found}")]
    HeterogeneousBucket { expected: ShapeType, found: ShapeType },

    #[error("Projection parse error: {0}")]
    Projection(String),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Spill buffer error: {0}")]
    Spill(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ShapefileError {
    /// Whether the error is confined to the current shapefile set
    ///
    /// The read orchestrator can move on to the next set after any of these.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ShapefileError::Format(_)
                | ShapefileError::Truncated { .. }
                | ShapefileError::UnsupportedGeometry(_)
                | ShapefileError::Projection(_)
        )
    }
}

/// Result type for shapefile operations
pub type Result<T> = std::result::Result<T, ShapefileError>;
