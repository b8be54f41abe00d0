//! Dep Frame is a dependency-driven component lifecycle engine.
//!
//! A component is one or more plain structs implementing [`Lifecycle`], plus
//! a list of dependencies. The [`Engine`] tracks each dependency's
//! availability and walks the component through `init`, `start`, `stop` and
//! `destroy` as requirements become satisfied or break, publishing the
//! component's service while it is active. All state transitions for one
//! engine run on a single FIFO queue with one worker, so lifecycle code never
//! observes interleaved transitions no matter which thread reported the
//! change.
//!
//! This example gates a component on one external signal and drives it up
//! and down:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use dep_frame::{
//!     component::ComponentSpec,
//!     dependency::{Toggle, ToggleDependency},
//!     dispatcher::Lifecycle,
//!     engine::{Engine, EngineConfig},
//! };
//!
//! struct Cache;
//!
//! impl Lifecycle for Cache {}
//!
//! async fn tokio_main() -> anyhow::Result<()> {
//!     let engine = Engine::new(EngineConfig::default());
//!     let storage = Arc::new(Toggle::new());
//!
//!     engine.add_component(
//!         ComponentSpec::new()
//!             .instance(Arc::new(Cache))
//!             .dependency(Arc::new(ToggleDependency::new(storage.clone(), true)))
//!             .provides("cache")
//!             .property("region", "us-east"),
//!     )?;
//!
//!     storage.set_available(true); // Cache runs init, then start
//!     engine.settle().await;
//!
//!     storage.set_available(false); // Cache runs stop, then destroy
//!     engine.settle().await;
//!     engine.terminate().await;
//!     Ok(())
//! }
//! ```

/// The component state machine and the spec builder used to register one.
pub mod component;
/// Manual activation and deactivation handles for a component.
pub mod controller;
/// The dependency abstraction, availability tracking, and the toggle signal.
pub mod dependency;
/// Lifecycle callbacks and their per-instance failure isolation.
pub mod dispatcher;
/// The engine, its identifiers, and the service registry boundary.
pub mod engine;
/// Simple and versatile error handling and logging.
pub mod error;
/// Published property values and the init-time customization map.
pub mod properties;
/// FIFO task queue with a single worker and panic isolation.
pub mod task_queue;

/// misc items that are too small to get their own files,
/// kept out of this file to reduce clutter.
mod util;
pub use util::*;
