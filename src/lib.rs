//! RepoWatch - GitHub Change Notification Daemon
//!
//! RepoWatch polls GitHub resources on behalf of chat subscribers and
//! delivers a notification whenever something new appears: a published
//! release, a freshly opened issue, or a repository newly starred by a
//! tracked account.
//!
//! ## Core Features
//!
//! - **Change Detection**: Snapshot diffing with per-item last-seen markers
//! - **Per-Subscriber Credentials**: Polls run under subscribers' own tokens
//! - **Fan-Out Delivery**: Users, channels and forum topics per tracked item
//! - **Failure Escalation**: Repeated not-found results retire an item after
//!   a final notice to its destinations
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//!
//! ## Modules
//!
//! - [`store`]: Tracked items, subscriptions and markers (SQLite)
//! - [`detector`]: Pure snapshot-diff logic
//! - [`monitor`]: The polling scheduler and failure escalator
//! - [`service`]: The subscribe/unsubscribe/list surface

pub mod config;
pub mod detector;
pub mod dispatch;
pub mod error;
pub mod github;
pub mod monitor;
pub mod render;
pub mod resolver;
pub mod service;
pub mod store;
pub mod telegram;
pub mod tokens;

pub use config::Config;
pub use dispatch::{Dispatcher, Messenger};
pub use error::{DeliveryError, FetchError};
pub use github::{GitHubFetcher, ResourceClient};
pub use monitor::{Monitor, PassSummary};
pub use service::WatchService;
pub use store::{Destination, ItemKey, Marker, TrackedItem, TrackerDb, WatchKind};
pub use telegram::TelegramNotifier;
pub use tokens::{CredentialStore, TokenDb};
