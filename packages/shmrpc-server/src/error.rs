//! Error types for the serving layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// JSON-RPC 2.0 error codes used on the wire.
pub mod rpc_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

#[derive(Error, Debug)]
pub enum ServerError {
    // Unavailable: nothing published for the current epoch
    #[error("Graph is not available")]
    GraphUnavailable,

    #[error("Algorithm '{0}' is not running")]
    AlgorithmNotRunning(String),

    // Decode: client expectations disagree with the published layout
    #[error("Column '{0}' not found in data description")]
    ColumnNotFound(String),

    #[error("Unknown type code '{code}' in description '{description}'")]
    UnknownTypeCode { code: char, description: String },

    #[error("Column '{column}' has type '{actual}', expected '{expected}'")]
    ColumnTypeMismatch {
        column: String,
        expected: char,
        actual: char,
    },

    #[error("Column at offset {offset} with {len} bytes exceeds buffer of {buffer_len} bytes")]
    ColumnOutOfBounds {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    #[error("Invalid data description: {0}")]
    InvalidDescription(String),

    // Parameter errors
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),

    #[error("Parameter '{name}' must be of type {expected}")]
    ParamTypeMismatch { name: String, expected: &'static str },

    #[error("Parameter '{param}'[{index}]: vertex '{name}' not found")]
    UnresolvedVertexName {
        param: String,
        index: usize,
        name: String,
    },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Session {0} not found")]
    SessionNotFound(u64),

    // Resource and I/O
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Protocol
    #[error("Method '{0}' not found")]
    MethodNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Ingest is disabled on this server")]
    IngestDisabled,
}

impl ServerError {
    /// Numeric JSON-RPC code for error responses.
    pub fn rpc_code(&self) -> i64 {
        use rpc_codes::*;
        match self {
            ServerError::GraphUnavailable
            | ServerError::AlgorithmNotRunning(_)
            | ServerError::ResourceExhausted(_)
            | ServerError::Io(_)
            | ServerError::Json(_)
            | ServerError::Serialization(_) => INTERNAL_ERROR,

            ServerError::ColumnNotFound(_)
            | ServerError::UnknownTypeCode { .. }
            | ServerError::ColumnTypeMismatch { .. }
            | ServerError::ColumnOutOfBounds { .. }
            | ServerError::InvalidDescription(_)
            | ServerError::IngestDisabled => INVALID_REQUEST,

            ServerError::MissingParameter(_)
            | ServerError::ParamTypeMismatch { .. }
            | ServerError::UnresolvedVertexName { .. }
            | ServerError::InvalidParameter(_)
            | ServerError::SessionNotFound(_) => INVALID_PARAMS,

            ServerError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ServerError::ParseError(_) => PARSE_ERROR,
        }
    }

    /// Stable string tag, used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::GraphUnavailable => "GRAPH_UNAVAILABLE",
            ServerError::AlgorithmNotRunning(_) => "ALGORITHM_NOT_RUNNING",
            ServerError::ColumnNotFound(_)
            | ServerError::UnknownTypeCode { .. }
            | ServerError::ColumnTypeMismatch { .. }
            | ServerError::ColumnOutOfBounds { .. }
            | ServerError::InvalidDescription(_) => "DECODE_ERROR",
            ServerError::MissingParameter(_)
            | ServerError::ParamTypeMismatch { .. }
            | ServerError::UnresolvedVertexName { .. }
            | ServerError::InvalidParameter(_) => "INVALID_PARAMETER",
            ServerError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            ServerError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            ServerError::MethodNotFound(_) => "METHOD_NOT_FOUND",
            ServerError::ParseError(_) => "PARSE_ERROR",
            ServerError::IngestDisabled => "INGEST_DISABLED",
            _ => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_unavailable_maps_to_internal() {
        assert_eq!(ServerError::GraphUnavailable.rpc_code(), rpc_codes::INTERNAL_ERROR);
        assert_eq!(
            ServerError::AlgorithmNotRunning("pagerank".into()).rpc_code(),
            rpc_codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn test_parameter_errors_map_to_invalid_params() {
        let err = ServerError::UnresolvedVertexName {
            param: "set".into(),
            index: 2,
            name: "alice".into(),
        };
        assert_eq!(err.rpc_code(), rpc_codes::INVALID_PARAMS);
        assert_eq!(err.code(), "INVALID_PARAMETER");
        assert_eq!(err.to_string(), "Parameter 'set'[2]: vertex 'alice' not found");
    }

    #[test]
    fn test_decode_errors_share_code() {
        let err = ServerError::UnknownTypeCode {
            code: 'z',
            description: "zl a b".into(),
        };
        assert_eq!(err.code(), "DECODE_ERROR");
        assert_eq!(err.rpc_code(), rpc_codes::INVALID_REQUEST);
    }
}
