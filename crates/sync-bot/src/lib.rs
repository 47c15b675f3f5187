//! Sync bot engine
//!
//! Replays the changes of a pull request onto other branches when asked to
//! with a `/sync <branch>...` comment, opens one follow-up pull request per
//! branch and reports the outcome back on the original pull request.
//!
//! # Architecture
//!
//! ```text
//! webhook delivery ─► events ─► Dispatcher ─► CommandParser
//!                                   │
//!                                   ▼
//!                            SyncOrchestrator ─► ForgeClient (API)
//!                                   │
//!                                   ▼
//!                       GitClient (cached, locked working copies)
//! ```

pub mod command;
pub mod dispatcher;
pub mod events;
pub mod git;
pub mod logger;
pub mod orchestrator;
pub mod render;
pub mod retry;

#[cfg(test)]
mod fakes;

pub use command::{CommandParseError, CommandParser, SyncRequest};
pub use dispatcher::{Dispatcher, Event, EventKind};
pub use orchestrator::{SyncError, SyncOrchestrator, SyncOutcome, SyncSettings, SyncStatus};
pub use retry::{with_retry, RetryPolicy};
