//! Wire frame decoding.
//!
//! A frame is one JSON value. Accepted shapes:
//!
//! - a single operation `{"op": "...", "path": "...", "value": ...}`
//! - a batch, either a bare array of operations or `{"JsonPatch": [...]}`
//! - `{"Ready": true}`: the operations sent so far form the initial state
//! - `{"finished": true}`: the server ended the stream on purpose
//!
//! Decoding is pure and never panics; anything unexpected becomes a
//! [`DecodeError`] that keeps the raw frame around.

use serde_json::{Map, Value};

use crate::error::{DecodeError, DecodeErrorKind};
use crate::pointer::Pointer;

const ENVELOPE_PATCH: &str = "JsonPatch";
const ENVELOPE_READY: &str = "Ready";
const ENVELOPE_FINISHED: &str = "finished";

/// One decoded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Root replace: the whole document, used for initial sync and resync.
    Snapshot(Value),
    Add { path: Pointer, value: Value },
    Replace { path: Pointer, value: Value },
    Remove { path: Pointer },
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::Snapshot(_) => "snapshot",
            Operation::Add { .. } => "add",
            Operation::Replace { .. } => "replace",
            Operation::Remove { .. } => "remove",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Operation::Snapshot(_) => "",
            Operation::Add { path, .. }
            | Operation::Replace { path, .. }
            | Operation::Remove { path } => path.as_str(),
        }
    }
}

/// One decoded wire frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Operations in delivery order. May be empty.
    Patch(Vec<Operation>),
    Ready,
    Finished,
}

/// Decodes a frame that must hold exactly one operation.
pub fn decode(frame: &str) -> Result<Operation, DecodeError> {
    let value = parse_json(frame)?;
    decode_operation(&value).map_err(|kind| DecodeError::new(kind, frame))
}

/// Decodes any recognized frame shape.
pub fn decode_frame(frame: &str) -> Result<Frame, DecodeError> {
    let value = parse_json(frame)?;
    classify(value).map_err(|kind| DecodeError::new(kind, frame))
}

fn parse_json(frame: &str) -> Result<Value, DecodeError> {
    serde_json::from_str(frame)
        .map_err(|err| DecodeError::new(DecodeErrorKind::Json(err.to_string()), frame))
}

fn classify(value: Value) -> Result<Frame, DecodeErrorKind> {
    match value {
        Value::Array(items) => decode_batch(&items).map(Frame::Patch),
        Value::Object(map) => classify_object(map),
        _ => Err(DecodeErrorKind::UnrecognizedFrame),
    }
}

fn classify_object(map: Map<String, Value>) -> Result<Frame, DecodeErrorKind> {
    if map.contains_key("op") {
        return decode_fields(&map).map(|op| Frame::Patch(vec![op]));
    }
    if map.len() != 1 {
        return Err(DecodeErrorKind::UnrecognizedFrame);
    }
    match map.iter().next() {
        Some((key, Value::Array(items))) if key == ENVELOPE_PATCH => {
            decode_batch(items).map(Frame::Patch)
        }
        Some((key, flag)) if key == ENVELOPE_READY && is_set(flag) => Ok(Frame::Ready),
        Some((key, flag)) if key == ENVELOPE_FINISHED && is_set(flag) => Ok(Frame::Finished),
        _ => Err(DecodeErrorKind::UnrecognizedFrame),
    }
}

fn is_set(flag: &Value) -> bool {
    matches!(flag, Value::Bool(true))
}

// Batches decode atomically: one bad element rejects the whole frame.
fn decode_batch(items: &[Value]) -> Result<Vec<Operation>, DecodeErrorKind> {
    items.iter().map(decode_operation).collect()
}

fn decode_operation(value: &Value) -> Result<Operation, DecodeErrorKind> {
    match value {
        Value::Object(map) => decode_fields(map),
        _ => Err(DecodeErrorKind::NotAnObject),
    }
}

fn decode_fields(map: &Map<String, Value>) -> Result<Operation, DecodeErrorKind> {
    let op = string_field(map, "op")?;
    let raw_path = string_field(map, "path")?;
    let path = Pointer::parse(raw_path).map_err(|reason| DecodeErrorKind::InvalidPath {
        path: raw_path.to_string(),
        reason,
    })?;
    // An explicit `null` is a real value (e.g. clearing an error field).
    let value = map.get("value").cloned();

    match op {
        "add" | "replace" => {
            let kind = if op == "add" { "add" } else { "replace" };
            let value = value.ok_or(DecodeErrorKind::MissingValue(kind))?;
            if path.is_root() {
                Ok(Operation::Snapshot(value))
            } else if kind == "add" {
                Ok(Operation::Add { path, value })
            } else {
                Ok(Operation::Replace { path, value })
            }
        }
        "remove" if path.is_root() => Err(DecodeErrorKind::RootRemove),
        "remove" => Ok(Operation::Remove { path }),
        other => Err(DecodeErrorKind::UnsupportedOp(other.to_string())),
    }
}

fn string_field<'a>(
    map: &'a Map<String, Value>,
    name: &'static str,
) -> Result<&'a str, DecodeErrorKind> {
    match map.get(name) {
        Some(Value::String(text)) => Ok(text),
        Some(_) => Err(DecodeErrorKind::NotAString(name)),
        None => Err(DecodeErrorKind::MissingField(name)),
    }
}
