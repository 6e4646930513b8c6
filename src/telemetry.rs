use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::Result;

pub const EVENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// Causal links to earlier events and domain objects. Every field is optional;
/// absent ids are omitted from the wire shape entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Correlation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom_id: Option<String>,
}

impl Correlation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn for_request(request_id: u64) -> Self {
        Self {
            request_id: Some(request_id),
            ..Self::default()
        }
    }

    pub fn with_route(mut self, route: &str) -> Self {
        self.route = Some(route.to_string());
        self
    }

    pub fn with_response(mut self, response_id: u64) -> Self {
        self.response_id = Some(response_id);
        self
    }

    pub fn with_causation(mut self, causation_id: u64) -> Self {
        self.causation_id = Some(causation_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum TelemetryKind {
    RouteRegistered { name: String, pattern: String },
    RequestIssued { action: String, url: String },
    RequestParsed { action: String },
    ResponseProduced { url: String, status: u16 },
    StateUpdated { snapshot: Value },
    TestCaseEvaluated {
        name: String,
        passed: bool,
        expected: Value,
        actual: Value,
    },
    Message { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryEvent {
    pub id: u64,
    #[serde(flatten)]
    pub kind: TelemetryKind,
    pub correlation: Correlation,
    pub source: String,
    pub version: u32,
    pub level: Level,
    pub timestamp: u64,
}

pub type Subscriber = Box<dyn FnMut(&TelemetryEvent) -> Result<()>>;

/// Session-wide publish point. Delivery is fire-and-forget; the bus stamps ids
/// and timestamps but retains no history — retention is the consumers' job.
pub struct EventBus {
    subscribers: RefCell<Vec<Subscriber>>,
    next_id: Cell<u64>,
    clock: Rc<Cell<u64>>,
}

impl EventBus {
    pub(crate) fn new(clock: Rc<Cell<u64>>) -> Self {
        Self {
            subscribers: RefCell::new(Vec::new()),
            next_id: Cell::new(1),
            clock,
        }
    }

    pub fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.borrow_mut().push(subscriber);
    }

    /// Stamps and delivers an event to every current subscriber. A failing
    /// subscriber is logged and isolated; it never blocks the others. The
    /// list is never borrowed across a callback, so a subscriber may publish
    /// derived events or subscribe from inside its callback; the running
    /// subscriber is detached for the duration and skips the events it
    /// publishes itself.
    pub fn publish(
        &self,
        kind: TelemetryKind,
        correlation: Correlation,
        level: Level,
        source: &str,
    ) -> TelemetryEvent {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let event = TelemetryEvent {
            id,
            kind,
            correlation,
            source: source.to_string(),
            version: EVENT_VERSION,
            level,
            timestamp: self.clock.get(),
        };
        let mut index = 0;
        loop {
            let mut subscriber = {
                let mut subscribers = self.subscribers.borrow_mut();
                if index >= subscribers.len() {
                    break;
                }
                subscribers.remove(index)
            };
            let outcome = subscriber(&event);
            self.subscribers.borrow_mut().insert(index, subscriber);
            if let Err(error) = outcome {
                warn!(event_id = event.id, %error, "telemetry subscriber failed");
            }
            index += 1;
        }
        event
    }
}
