//! Streaming JSON-patch synchronization.
//!
//! A server owns a JSON document and streams changes to it as patch
//! operations over a long-lived connection. This crate keeps a local,
//! read-only replica of that document up to date and exposes it through a
//! small contract: [`SyncView::data`], [`SyncView::is_connected`],
//! [`SyncView::is_initialized`] and [`SyncView::error`].
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use patch_sync::features::execution_processes::{self, ExecutionProcesses};
//! use patch_sync::{SyncClient, SyncConfig};
//!
//! let client = SyncClient::websocket(SyncConfig::from_env());
//! let base = url::Url::parse("http://127.0.0.1:3000")?;
//! let mut processes = client.subscribe(execution_processes::placeholder());
//! processes.update(
//!     Some(&execution_processes::endpoint(&base, uuid::Uuid::new_v4(), false)),
//!     true,
//! )?;
//!
//! let mut views = processes.watch();
//! while views.changed().await.is_ok() {
//!     let view = views.borrow_and_update().clone();
//!     let typed: ExecutionProcesses = view.decode()?;
//!     println!("{} processes, running: {}", typed.execution_processes.len(), typed.is_any_running());
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod config;
pub mod decoder;
pub mod diagnostics;
pub mod document;
pub mod endpoint;
pub mod error;
pub mod features;
pub mod metrics;
pub mod pointer;
pub mod registry;
pub mod state;
pub mod subscription;
pub mod transport;
pub mod view;

pub use backoff::{Backoff, BackoffConfig};
pub use config::SyncConfig;
pub use decoder::{decode, decode_frame, Frame, Operation};
pub use diagnostics::{CounterSnapshot, SyncCounters};
pub use document::{apply, Document, DocumentStore, Effect};
pub use endpoint::{Endpoint, ResolvedEndpoint, SubscriptionKey};
pub use error::{
    ApplyError, ConnectionError, DecodeError, DecodeErrorKind, EndpointError, SyncError,
};
pub use pointer::Pointer;
pub use registry::{ActiveSubscription, SlotId};
pub use state::{ConnectionState, InvalidTransition, StateEvent};
pub use subscription::{Subscription, SyncClient};
pub use transport::{ConnectionId, Connector, FrameStream, WebSocketConnector, WireMessage};
pub use view::SyncView;
