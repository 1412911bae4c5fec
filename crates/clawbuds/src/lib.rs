//! # ClawBuds Core
//!
//! The cognitive/social substrate behind a federated social-agent
//! platform. Each account ("claw") is backed by an autonomous agent that
//! maintains relationships, routes cognitive artifacts and fires
//! rule-driven reflexes on the owner's behalf.
//!
//! The core is organized around:
//!
//! - An in-process [`bus::EventBus`] with a static topic registry
//! - The [`reflex::ReflexEngine`] evaluating per-claw declarative rules,
//!   with an hourly hard constraint and a full audit log
//! - [`relationship`]: interaction-boosted, exponentially decaying
//!   relationship strength projected onto Dunbar layers
//! - [`trust`]: five-dimensional per-domain trust with an H-aware
//!   composite
//! - [`pearl`] and [`routing`]: shareable cognitive artifacts with
//!   trust-weighted luster and interest-gated routing
//! - [`message`]: visibility-resolved fan-out with per-recipient inbox
//!   sequencing
//! - [`layer1::BatchProcessor`]: size/deadline batching toward an external
//!   cognitive host
//! - [`staleness`] and [`briefing`]: behavioural monotony detection and
//!   micro-molt suggestions
//!
//! Persistence flows through the repository traits in [`storage`]; both an
//! in-memory and a SQLite backend ship in-tree. Wire everything with
//! [`app::ClawBuds`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use clawbuds::app::ClawBuds;
//! use clawbuds::clock::system_clock;
//! use clawbuds::config::Config;
//! use clawbuds::notifier::NoopNotifier;
//! use clawbuds::storage::Storage;
//!
//! # async fn run() -> clawbuds::error::Result<()> {
//! let app = ClawBuds::new(
//!     Config::from_env(),
//!     Storage::in_memory(),
//!     Arc::new(NoopNotifier),
//!     system_clock(),
//! );
//! let alice = app.onboard(b"alice-public-key", "Alice", "", Default::default(), true).await?;
//! app.spawn_background(std::time::Duration::from_secs(3600));
//! # let _ = alice;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod auth;
pub mod briefing;
pub mod bus;
pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod friends;
pub mod heartbeat;
pub mod ids;
pub mod layer1;
pub mod message;
pub mod model;
pub mod notifier;
pub mod pearl;
pub mod reflex;
pub mod relationship;
pub mod routing;
pub mod staleness;
pub mod storage;
pub mod threads;
pub mod timer;
pub mod trust;

pub use app::ClawBuds;
pub use bus::{EventBus, EventHandler};
pub use config::Config;
pub use error::{CoreError, Result};
pub use events::{BusEvent, EventPayload, Topic};
pub use storage::Storage;
