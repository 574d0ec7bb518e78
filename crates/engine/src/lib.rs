// ABOUTME: Main library entry point for the snapdeck widget extraction and refresh engine.
// ABOUTME: Re-exports the public API: Engine, EngineBuilder, Artifact, stores, and the bulk coordinator.

//! snapdeck - capture fragments of web pages and keep them fresh.
//!
//! An [`Artifact`] records where a widget lives (page URL, CSS selector and a
//! short heading fingerprint) together with its last sanitized HTML. The
//! [`Engine`] re-extracts it through a chain of fallbacks and only replaces the
//! cache with content that passes verification.
//!
//! # Example
//!
//! ```no_run
//! use snapdeck_engine::{bulk, Engine, SplitFileStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), snapdeck_engine::RefreshError> {
//!     let engine = Engine::builder().cookie("session=abc").build();
//!     let store = SplitFileStore::new("./deck");
//!     let summary = bulk::refresh_store(&engine, &store, &bulk::NoProgress).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod bulk;
pub mod capture;
pub mod dom;
pub mod error;
pub mod fingerprint;
pub mod locate;
pub mod model;
pub mod options;
pub mod policy;
pub mod refresh;
pub mod resource;
pub mod sanitize;
pub mod staleness;
pub mod store;
pub mod tabs;

pub use crate::bulk::{BulkSummary, ProgressObserver};
pub use crate::capture::{capture_element, capture_selector};
pub use crate::error::{ErrorCode, RefreshError};
pub use crate::model::{Artifact, LocalRecord, SyncRecord};
pub use crate::options::{EngineBuilder, Options};
pub use crate::policy::{load_builtin_policies, SitePolicy, SitePolicyRegistry, TabPolicy};
pub use crate::refresh::{Engine, RefreshOutcome, Stage};
pub use crate::sanitize::{sanitize, SanitizeOptions};
pub use crate::store::{ArtifactStore, MemoryStore, SplitFileStore, StoreError};
pub use crate::tabs::cdp::CdpTabDriver;
pub use crate::tabs::{TabDriver, TabError, TabHandle, TabOptions, TabWaits};
