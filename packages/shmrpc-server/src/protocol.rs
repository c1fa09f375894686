//! Wire protocol: JSON-RPC 2.0 objects in length-prefixed MessagePack frames
//!
//! Each frame is a 4-byte big-endian payload length followed by the
//! `rmp-serde` encoding of one request or response.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{rpc_codes, ServerError};

/// Frames larger than this are rejected before allocation.
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Echoed back verbatim; requests without an id still get a response
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<&ServerError> for RpcError {
    fn from(e: &ServerError) -> Self {
        Self {
            code: e.rpc_code(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: &ServerError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Response to a frame that could not be decoded at all.
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Value::Null,
            result: None,
            error: Some(RpcError {
                code: rpc_codes::PARSE_ERROR,
                message: message.into(),
            }),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub fn read_message<R: Read>(stream: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_message<W: Write>(stream: &mut W, data: &[u8]) -> io::Result<()> {
    let len = u32::try_from(data.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("Message too large: {} bytes", data.len()))
        })?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()
}

pub fn decode_request(frame: &[u8]) -> Result<RpcRequest, ServerError> {
    rmp_serde::from_slice(frame).map_err(|e| ServerError::ParseError(e.to_string()))
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ServerError> {
    rmp_serde::to_vec_named(message).map_err(|e| ServerError::Serialization(e.to_string()))
}

pub fn decode_response(frame: &[u8]) -> Result<RpcResponse, ServerError> {
    rmp_serde::from_slice(frame).map_err(|e| ServerError::ParseError(e.to_string()))
}

#[cfg(test)]
mod protocol_tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    #[test]
    fn test_frame_round_trip() {
        let mut wire = Vec::new();
        write_message(&mut wire, b"hello").unwrap();
        write_message(&mut wire, b"").unwrap();
        assert_eq!(&wire[..4], &[0, 0, 0, 5]);

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_message(&mut cursor).unwrap().unwrap(), b"hello");
        assert_eq!(read_message(&mut cursor).unwrap().unwrap(), b"");
        assert!(read_message(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let mut cursor = Cursor::new(len.to_vec());
        let err = read_message(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let mut wire = 10u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");
        assert!(read_message(&mut Cursor::new(wire)).is_err());
    }

    #[test]
    fn test_request_through_msgpack() {
        let request = RpcRequest::new(7, "request", json!({"session_id": 3}));
        let decoded = decode_request(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded.method, "request");
        assert_eq!(decoded.id, json!(7));
        assert_eq!(decoded.params["session_id"], json!(3));
    }

    #[test]
    fn test_request_without_params() {
        #[derive(Serialize)]
        struct Bare {
            method: &'static str,
        }
        let decoded = decode_request(&encode(&Bare { method: "get_algorithms" }).unwrap()).unwrap();
        assert_eq!(decoded.params, Value::Null);
        assert_eq!(decoded.id, Value::Null);
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = decode_request(&[0xc1]).unwrap_err();
        assert_eq!(err.rpc_code(), rpc_codes::PARSE_ERROR);
    }

    #[test]
    fn test_failure_carries_code() {
        let response = RpcResponse::failure(json!("a"), &ServerError::MissingParameter("source".into()));
        let decoded = decode_response(&encode(&response).unwrap()).unwrap();
        assert!(decoded.result.is_none());
        let error = decoded.error.unwrap();
        assert_eq!(error.code, rpc_codes::INVALID_PARAMS);
        assert!(error.message.contains("source"));
    }
}
