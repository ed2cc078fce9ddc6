//! # hermes-sync
//!
//! One sync run, end to end: fetch the document, cache it, evaluate alarms,
//! and present the result.
//!
//! [`Orchestrator::run_once`] is the single entry point both cadences call.
//! Everything it talks to sits behind a trait ([`Fetcher`], [`PayloadCache`],
//! [`NotificationSink`], [`EventPublisher`]) with a default implementation in
//! this crate.

pub mod cache;
pub mod events;
pub mod fetcher;
pub mod orchestrator;
pub mod payload;
pub mod presenter;

pub use cache::{CacheWrite, CachedPayload, FileCache, PayloadCache};
pub use events::{EventPublisher, NoopPublisher, SyncEvent};
pub use fetcher::{Fetcher, HttpFetcher};
pub use hermes_core::SyncError;
pub use orchestrator::{alarm_message, Orchestrator, Session, SessionToken, ALARM_TITLE};
pub use presenter::{
    Channel, FileSink, Importance, LogSink, Notification, NotificationKind, NotificationSink,
    StatusPresenter, ALARM_CHANNEL, STATUS_CHANNEL,
};
