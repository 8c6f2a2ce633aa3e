//! Reconciler: applies decoded operations to the in-memory document.

use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::decoder::Operation;
use crate::error::ApplyError;
use crate::pointer::{parse_index, Pointer};

const APPEND: &str = "-";

/// An immutable, cheaply clonable document value.
///
/// Mutation goes through copy-on-write, so a `Document` handed to a consumer
/// never changes underneath it. Two documents with the same identity
/// ([`Document::ptr_eq`]) are guaranteed equal.
#[derive(Debug, Clone)]
pub struct Document(Arc<Value>);

impl Document {
    pub fn new(value: Value) -> Self {
        Self(Arc::new(value))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn ptr_eq(a: &Document, b: &Document) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Deserializes the document into a feature's typed shape.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(self.value())
    }
}

impl Deref for Document {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.0
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        Document::ptr_eq(self, other) || self.0 == other.0
    }
}

impl From<Value> for Document {
    fn from(value: Value) -> Self {
        Document::new(value)
    }
}

/// What an applied operation did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// A snapshot replaced the whole document.
    Replaced,
    Changed,
    /// Nothing to do, e.g. removing a path that does not exist.
    Unchanged,
}

/// Applies one operation and returns the resulting document. `doc` is left as is.
pub fn apply(doc: &Document, op: &Operation) -> Result<Document, ApplyError> {
    let mut next = doc.clone();
    apply_in_place(&mut next, op)?;
    Ok(next)
}

/// Applies one operation to `doc`, cloning the underlying value only when it
/// is shared and the operation actually changes something.
pub fn apply_in_place(doc: &mut Document, op: &Operation) -> Result<Effect, ApplyError> {
    let (kind, path, value) = match op {
        Operation::Snapshot(value) => {
            *doc = Document::new(value.clone());
            return Ok(Effect::Replaced);
        }
        Operation::Add { path, value } => (OpKind::Add, path, Some(value)),
        Operation::Replace { path, value } => (OpKind::Replace, path, Some(value)),
        Operation::Remove { path } => (OpKind::Remove, path, None),
    };

    let Some((parents, last)) = path.split_last() else {
        // Root paths decode to snapshots; a hand-built root op behaves the same.
        return match value {
            Some(value) => {
                *doc = Document::new(value.clone());
                Ok(Effect::Replaced)
            }
            None => Ok(Effect::Unchanged),
        };
    };

    let slot = match plan(doc.value(), kind, path, parents, last) {
        Ok(slot) => slot,
        // A missing parent means the removed path does not exist either.
        Err(_) if kind == OpKind::Remove => Slot::Nothing,
        Err(err) => return Err(err),
    };
    if slot == Slot::Nothing {
        return Ok(Effect::Unchanged);
    }

    let root = Arc::make_mut(&mut doc.0);
    let parent = resolve_mut(root, parents).ok_or_else(|| ApplyError::ParentMissing {
        pointer: path.to_string(),
        segment: last.to_string(),
    })?;
    let new_value = || value.cloned().unwrap_or(Value::Null);
    match (slot, parent) {
        (Slot::ObjectInsert, Value::Object(map)) => {
            map.insert(last.to_string(), new_value());
        }
        (Slot::ObjectRemove, Value::Object(map)) => {
            map.remove(last);
        }
        (Slot::ArrayPush, Value::Array(items)) => items.push(new_value()),
        (Slot::ArrayInsert(index), Value::Array(items)) => items.insert(index, new_value()),
        (Slot::ArraySet(index), Value::Array(items)) => items[index] = new_value(),
        (Slot::ArrayRemove(index), Value::Array(items)) => {
            items.remove(index);
        }
        _ => {
            return Err(ApplyError::NotAContainer {
                pointer: path.to_string(),
            })
        }
    }
    Ok(Effect::Changed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Add,
    Replace,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    ObjectInsert,
    ObjectRemove,
    ArrayPush,
    ArrayInsert(usize),
    ArraySet(usize),
    ArrayRemove(usize),
    Nothing,
}

// Validates the operation against the current value without touching it.
fn plan(
    root: &Value,
    kind: OpKind,
    path: &Pointer,
    parents: &[String],
    last: &str,
) -> Result<Slot, ApplyError> {
    match resolve(root, parents, path)? {
        Value::Object(map) => Ok(match kind {
            // `replace` of a missing key is treated as `add`.
            OpKind::Add | OpKind::Replace => Slot::ObjectInsert,
            OpKind::Remove if map.contains_key(last) => Slot::ObjectRemove,
            OpKind::Remove => Slot::Nothing,
        }),
        Value::Array(items) => plan_array(items.len(), kind, path, last),
        _ => Err(ApplyError::NotAContainer {
            pointer: path.to_string(),
        }),
    }
}

fn plan_array(len: usize, kind: OpKind, path: &Pointer, last: &str) -> Result<Slot, ApplyError> {
    if last == APPEND {
        return Ok(match kind {
            OpKind::Add | OpKind::Replace => Slot::ArrayPush,
            OpKind::Remove => Slot::Nothing,
        });
    }
    let Some(index) = parse_index(last) else {
        return match kind {
            OpKind::Remove => Ok(Slot::Nothing),
            _ => Err(ApplyError::InvalidIndex {
                pointer: path.to_string(),
                segment: last.to_string(),
            }),
        };
    };
    match kind {
        OpKind::Add if index == len => Ok(Slot::ArrayPush),
        OpKind::Add if index < len => Ok(Slot::ArrayInsert(index)),
        OpKind::Replace if index == len => Ok(Slot::ArrayPush),
        OpKind::Replace if index < len => Ok(Slot::ArraySet(index)),
        OpKind::Remove if index < len => Ok(Slot::ArrayRemove(index)),
        OpKind::Remove => Ok(Slot::Nothing),
        OpKind::Add | OpKind::Replace => Err(ApplyError::IndexOutOfBounds {
            pointer: path.to_string(),
            index,
            len,
        }),
    }
}

fn resolve<'a>(
    root: &'a Value,
    segments: &[String],
    path: &Pointer,
) -> Result<&'a Value, ApplyError> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => {
                let index = parse_index(segment).ok_or_else(|| ApplyError::InvalidIndex {
                    pointer: path.to_string(),
                    segment: segment.clone(),
                })?;
                items.get(index)
            }
            _ => {
                return Err(ApplyError::NotAContainer {
                    pointer: path.to_string(),
                })
            }
        }
        .ok_or_else(|| ApplyError::ParentMissing {
            pointer: path.to_string(),
            segment: segment.clone(),
        })?;
    }
    Ok(current)
}

fn resolve_mut<'a>(root: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(parse_index(segment)?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Per-subscription document state.
///
/// Every connection starts a fresh working document seeded from the
/// placeholder. Consumers see the working document only once it is synced on
/// that connection (a snapshot arrived, or the server said `Ready`); until
/// then they keep whatever was published before, which is the placeholder on
/// the first connection and stale-but-present data after a reconnect.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    placeholder: Document,
    working: Document,
    published: Document,
    initialized: bool,
    synced: bool,
}

impl DocumentStore {
    pub fn new(placeholder: impl Into<Document>) -> Self {
        let placeholder = placeholder.into();
        Self {
            working: placeholder.clone(),
            published: placeholder.clone(),
            placeholder,
            initialized: false,
            synced: false,
        }
    }

    /// Starts over for a new physical connection. Published data is kept.
    pub fn begin_connection(&mut self) {
        self.working = self.placeholder.clone();
        self.synced = false;
    }

    pub fn apply(&mut self, op: &Operation) -> Result<Effect, ApplyError> {
        let effect = apply_in_place(&mut self.working, op)?;
        if effect == Effect::Replaced {
            self.synced = true;
            self.initialized = true;
        }
        Ok(effect)
    }

    /// The operations received so far on this connection are the initial state.
    pub fn mark_ready(&mut self) {
        self.synced = true;
        self.initialized = true;
    }

    /// Publishes the working document. Returns true when consumers see a new value.
    pub fn commit(&mut self) -> bool {
        if !self.synced || Document::ptr_eq(&self.working, &self.published) {
            return false;
        }
        self.published = self.working.clone();
        true
    }

    /// Drops everything back to the placeholder.
    pub fn reset(&mut self) {
        self.working = self.placeholder.clone();
        self.published = self.placeholder.clone();
        self.initialized = false;
        self.synced = false;
    }

    pub fn data(&self) -> &Document {
        &self.published
    }

    pub fn placeholder(&self) -> &Document {
        &self.placeholder
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Whether the current connection has delivered its initial state.
    pub fn is_synced(&self) -> bool {
        self.synced
    }
}
