use serde::de::DeserializeOwned;

use crate::document::Document;
use crate::error::SyncError;
use crate::state::ConnectionState;

/// What a consumer sees of a subscription at one instant.
///
/// Views are cheap to clone and never change after they are published; a new
/// view is published whenever any of the four read fields changes.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncView {
    pub(crate) data: Document,
    pub(crate) state: ConnectionState,
    pub(crate) initialized: bool,
    pub(crate) error: Option<SyncError>,
}

impl SyncView {
    pub(crate) fn placeholder(data: Document, state: ConnectionState) -> Self {
        Self {
            data,
            state,
            initialized: false,
            error: None,
        }
    }

    /// Current document, or the placeholder until the first sync.
    pub fn data(&self) -> &Document {
        &self.data
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn error(&self) -> Option<&SyncError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.data.to_typed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn placeholder_view_is_neither_connected_nor_initialized() {
        let view = SyncView::placeholder(Document::new(json!({"commands": []})), ConnectionState::Idle);
        assert!(!view.is_connected());
        assert!(!view.is_initialized());
        assert!(view.error().is_none());
        let decoded: serde_json::Map<String, serde_json::Value> = view.decode().unwrap();
        assert!(decoded.contains_key("commands"));
    }
}
