use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    #[error("html parse error: {0}")]
    HtmlParse(String),
    #[error("missing required anchor: {0}")]
    MissingAnchor(String),
    #[error("goto called with no registered continuation")]
    NoContinuation,
    #[error("unknown navigation target: {0}")]
    UnknownTarget(String),
    #[error("file read failed for field {0}")]
    FileRead(String),
    #[error("causal order violated: {0}")]
    CausalOrder(String),
    #[error("page handler failed: {0}")]
    PageHandler(String),
}

mod bridge;
mod debug_panel;
mod dom;
mod error_report;
mod history;
mod hotkeys;
mod intent;
mod request;
mod session;
mod tab;
mod telemetry;

pub use bridge::{Continuation, HandlerResult, HandlerTurn};
pub use debug_panel::{DebugPanel, DiffEntry, HistoryRow, TestRecord};
pub use dom::{Dom, NodeId};
pub use error_report::{ExceptionCategory, PageException, TraceFrame, TOP_LEVEL_FILE};
pub use history::HistoryFrame;
pub use hotkeys::{HotkeyDispatcher, KeyPress, CHORD_WINDOW_MS};
pub use intent::{IntentKind, NavigationIntent, FORM_ID, MOUNT_ID, NAVIGATE_ATTR};
pub use request::{FileField, FormValue, Request, Response};
pub use session::Session;
pub use tab::Tab;
pub use telemetry::{
    Correlation, EventBus, Level, Subscriber, TelemetryEvent, TelemetryKind, EVENT_VERSION,
};
