use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, error, warn};

use crate::bridge::{BridgeState, Continuation, HandlerTurn};
use crate::debug_panel::DebugPanel;
use crate::error_report::PageException;
use crate::history::{add_to_history, classify_popstate, HistoryFrame, PopDirective};
use crate::hotkeys::{HotkeyDispatcher, KeyPress};
use crate::intent::{self, CaptureSource, FieldCapture, IntentKind, NavigationCapture,
    NavigationIntent};
use crate::request::{build_request, RequestCounter};
use crate::tab::Tab;
use crate::telemetry::{Correlation, EventBus, Level, TelemetryKind};
use crate::{Error, Result};

const INDEX_ROUTE: &str = "index";

/// One page load's worth of state: the tab, the bus, the bridge, the hotkey
/// registry and the request counter, all fields of one object so several
/// sessions can coexist in one process.
pub struct Session {
    tab: Tab,
    bus: Rc<EventBus>,
    capture: NavigationCapture,
    hotkeys: HotkeyDispatcher,
    bridge: BridgeState,
    counter: RequestCounter,
    site_title: String,
    initial_replayed: bool,
}

impl Session {
    pub fn open(document_url: &str, site_title: &str) -> Self {
        let tab = Tab::new(
            document_url,
            HistoryFrame {
                request_id: None,
                url: INDEX_ROUTE.to_string(),
            },
        );
        let bus = Rc::new(EventBus::new(tab.clock()));
        let hotkeys = HotkeyDispatcher::new(tab.clock());
        Self {
            tab,
            bus,
            capture: NavigationCapture::new(),
            hotkeys,
            bridge: BridgeState::new(),
            counter: RequestCounter::new(),
            site_title: site_title.to_string(),
            initial_replayed: false,
        }
    }

    pub fn tab(&self) -> &Tab {
        &self.tab
    }

    pub fn bus(&self) -> Rc<EventBus> {
        Rc::clone(&self.bus)
    }

    pub fn advance_clock(&self, millis: u64) {
        self.tab.advance_clock(millis);
    }

    /// Binds the interpreter's continuation, completing the setup handshake.
    /// The first registration replays a present `route` query parameter as the
    /// initial visit; later registrations just rebind (a new top-level run
    /// supersedes the old continuation).
    pub async fn register(&mut self, continuation: Continuation) -> Result<()> {
        let generation = self.bridge.bind(continuation);
        debug!(generation, "continuation registered");
        if self.initial_replayed {
            return Ok(());
        }
        self.initial_replayed = true;
        if let Some(route) = self.tab.route_param() {
            self.initiate_request(restoration_intent(&route), false, true)
                .await?;
        }
        Ok(())
    }

    /// Navigates like page code would: build a request from the url and the
    /// given values, record it in history, resume the interpreter. Failures
    /// replace the page with the rendered error report.
    pub async fn goto(&mut self, url: &str, form_values: &[(&str, &str)]) -> Result<()> {
        self.initiate_request(direct_intent(url, form_values), true, true)
            .await
    }

    /// Like [`goto`](Self::goto), but a handler failure mutates no DOM and
    /// comes back as `Err(Error::PageHandler(..))` instead — for automated
    /// harnesses.
    pub async fn goto_silent(&mut self, url: &str, form_values: &[(&str, &str)]) -> Result<()> {
        self.initiate_request(direct_intent(url, form_values), true, false)
            .await
    }

    /// Activates the element with `element_id`. Returns false when the element
    /// exists but carries no navigate marker.
    pub async fn click(&mut self, element_id: &str) -> Result<bool> {
        match self.capture.intent_for_click(&self.tab, element_id)? {
            Some(intent) => {
                self.initiate_request(intent, true, true).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Submits the designated form.
    pub async fn submit(&mut self) -> Result<()> {
        let intent = self.capture.intent_for_submit(&self.tab)?;
        self.initiate_request(intent, true, true).await
    }

    /// Browser back: restores the previous frame and replays it, trusting only
    /// the frame's request id and url.
    pub async fn back(&mut self) -> Result<bool> {
        let Some(frame) = self.tab.step_back() else {
            return Ok(false);
        };
        self.handle_popstate(frame).await?;
        Ok(true)
    }

    pub async fn forward(&mut self) -> Result<bool> {
        let Some(frame) = self.tab.step_forward() else {
            return Ok(false);
        };
        self.handle_popstate(frame).await?;
        Ok(true)
    }

    /// Restores the persisted url and title to the stepped-to frame with
    /// replace semantics, then replays the visit without pushing a frame.
    async fn handle_popstate(&mut self, frame: HistoryFrame) -> Result<()> {
        match classify_popstate(&frame) {
            PopDirective::Revisit(url) => {
                self.tab.set_route_param(Some(&url));
                self.tab.set_title(format!("{} - {url}", self.site_title));
                self.initiate_request(restoration_intent(&url), false, true)
                    .await
            }
            PopDirective::IndexFallback => {
                self.tab.set_route_param(None);
                self.tab
                    .set_title(format!("{} - {INDEX_ROUTE}", self.site_title));
                self.initiate_request(restoration_intent(INDEX_ROUTE), false, true)
                    .await
            }
        }
    }

    /// The coupling point. Within one navigation the order is fixed: build and
    /// await the request, record history for remembered intents, invoke the
    /// continuation, await its turn, mount.
    async fn initiate_request(
        &mut self,
        intent: NavigationIntent,
        remember: bool,
        present_errors: bool,
    ) -> Result<()> {
        if !self.bridge.is_bound() {
            return Err(Error::NoContinuation);
        }

        let request = build_request(&self.tab, &intent, &self.counter).await?;
        let issued = self.bus.publish(
            TelemetryKind::RequestIssued {
                action: request.action.clone(),
                url: request.url.clone(),
            },
            Correlation::for_request(request.id).with_route(&request.action),
            Level::Info,
            "bridge",
        );

        if remember {
            add_to_history(&mut self.tab, &request, &self.site_title);
        }

        let (continuation, generation) = self.bridge.take()?;
        debug!(request_id = request.id, url = %request.url, "invoking continuation");
        let request_id = request.id;
        match continuation(request).await {
            Ok(turn) => self.update_site(turn, generation, issued.id),
            Err(exception) => {
                self.report_failure(exception, request_id, issued.id, present_errors)
            }
        }
    }

    /// Mounts a finished turn. A turn from a superseded binding is dropped
    /// whole; otherwise the scroll offset is saved right before the subtree
    /// swap and restored right after, and the capture registry is rebuilt
    /// against the new subtree.
    fn update_site(&mut self, turn: HandlerTurn, generation: u64, causation_id: u64) -> Result<()> {
        if generation != self.bridge.generation() {
            warn!(
                stale = generation,
                current = self.bridge.generation(),
                "dropping turn from superseded continuation"
            );
            return Ok(());
        }

        let response = turn.response;
        let scroll = self.tab.scroll_offset();
        self.tab.replace_mount(&response.body)?;
        self.tab.scroll_to(scroll.0, scroll.1);
        self.capture.rebuild_bindings(&self.tab)?;
        self.bridge.bind(turn.next);

        self.bus.publish(
            TelemetryKind::ResponseProduced {
                url: response.url.clone(),
                status: response.status,
            },
            Correlation::for_request(response.request_id)
                .with_response(response.id)
                .with_causation(causation_id),
            Level::Info,
            "bridge",
        );
        Ok(())
    }

    fn report_failure(
        &mut self,
        exception: PageException,
        request_id: u64,
        causation_id: u64,
        present: bool,
    ) -> Result<()> {
        self.bus.publish(
            TelemetryKind::Message {
                text: exception.headline(),
            },
            Correlation::for_request(request_id).with_causation(causation_id),
            Level::Error,
            "bridge",
        );
        if present {
            error!(request_id, headline = %exception.headline(), "page handler failed");
            self.tab.replace_page(&exception.to_html())?;
            Ok(())
        } else {
            Err(Error::PageHandler(exception.to_text()))
        }
    }

    /// Subscribes a fresh debug panel to the bus and returns the shared handle.
    /// A panel that hits a consistency violation is isolated by the bus like
    /// any other subscriber.
    pub fn attach_debug_panel(&mut self) -> Rc<RefCell<DebugPanel>> {
        let panel = Rc::new(RefCell::new(DebugPanel::new()));
        let handle = Rc::clone(&panel);
        self.bus
            .subscribe(Box::new(move |event| handle.borrow_mut().handle_event(event)));
        panel
    }

    pub fn hotkeys(&mut self) -> &mut HotkeyDispatcher {
        &mut self.hotkeys
    }

    pub fn press_key(&mut self, press: &KeyPress) -> bool {
        self.hotkeys.on_key(press)
    }

    pub fn set_field(&mut self, name: &str, value: &str) -> Result<()> {
        let node = intent::field_node(&self.tab, name)?;
        if let Some(element) = self.tab.dom.element_mut(node) {
            element.value = value.to_string();
        }
        Ok(())
    }

    pub fn set_checked(&mut self, name: &str, checked: bool) -> Result<()> {
        let node = intent::field_node(&self.tab, name)?;
        if let Some(element) = self.tab.dom.element_mut(node) {
            element.checked = checked;
        }
        Ok(())
    }

    pub fn attach_file(
        &mut self,
        input_id: &str,
        filename: &str,
        content_type: &str,
        content: Vec<u8>,
    ) {
        self.tab.attach_file(input_id, filename, content_type, content);
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.tab.scroll_to(x, y);
    }
}

fn restoration_intent(url: &str) -> NavigationIntent {
    NavigationIntent {
        kind: IntentKind::Link,
        url: url.to_string(),
        fields: Vec::new(),
        submitter: None,
    }
}

fn direct_intent(url: &str, form_values: &[(&str, &str)]) -> NavigationIntent {
    NavigationIntent {
        kind: IntentKind::Link,
        url: url.to_string(),
        fields: form_values
            .iter()
            .map(|(name, value)| FieldCapture {
                name: (*name).to_string(),
                source: CaptureSource::Text((*value).to_string()),
            })
            .collect(),
        submitter: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::HandlerResult;
    use crate::request::{Request, Response};
    use crate::telemetry::TelemetryEvent;
    use futures::executor::block_on;
    use futures::FutureExt;
    use std::cell::Cell;

    /// A tiny fake interpreter: renders the request url and a form, threads a
    /// response counter, and rebinds itself every turn.
    fn echo_handler(response_ids: Rc<Cell<u64>>) -> Continuation {
        Box::new(move |request: Request| {
            let response_ids = Rc::clone(&response_ids);
            async move {
                let id = response_ids.get();
                response_ids.set(id + 1);
                let body = format!(
                    "<form id=\"page-form\" data-action=\"echo/save\">\
                     <input name=\"name\" value=\"\"></form>\
                     <p id=\"where\">{}</p>\
                     <a id=\"next\" data-navigate=\"echo/next\">next</a>",
                    request.url
                );
                let turn: HandlerResult = Ok(HandlerTurn {
                    response: Response::new(id, request.id, &request.url, &body, 200),
                    next: echo_handler(response_ids),
                });
                turn
            }
            .boxed_local()
        })
    }

    fn booted_session() -> Session {
        let mut session = Session::open("https://app.local/", "Echo");
        block_on(session.register(echo_handler(Rc::new(Cell::new(1))))).expect("register");
        session
    }

    #[test]
    fn goto_without_registration_is_fatal() {
        let mut session = Session::open("https://app.local/", "Echo");
        let result = block_on(session.goto("index", &[]));
        assert_eq!(result.unwrap_err(), Error::NoContinuation);
    }

    #[test]
    fn goto_mounts_records_history_and_sets_title() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("orders/42", &[]))?;
        assert!(session.tab().mount_html()?.contains("orders/42"));
        assert_eq!(session.tab().title(), "Echo - orders/42");
        assert_eq!(session.tab().route_param().as_deref(), Some("orders/42"));
        assert_eq!(session.tab().history_len(), 2);
        assert_eq!(session.tab().current_frame().request_id, Some(1));
        Ok(())
    }

    #[test]
    fn click_navigates_through_the_rebuilt_registry() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("start", &[]))?;
        assert!(block_on(session.click("next"))?);
        assert!(session.tab().mount_html()?.contains("echo/next"));
        Ok(())
    }

    #[test]
    fn scroll_offset_survives_the_subtree_swap() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("start", &[]))?;
        session.scroll_to(0.0, 480.0);
        block_on(session.goto("elsewhere", &[]))?;
        assert_eq!(session.tab().scroll_offset(), (0.0, 480.0));
        Ok(())
    }

    #[test]
    fn back_replays_without_growing_history() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("first", &[]))?;
        block_on(session.goto("second", &[]))?;
        assert_eq!(session.tab().history_len(), 3);
        assert!(block_on(session.back())?);
        assert_eq!(session.tab().history_len(), 3);
        assert!(session.tab().mount_html()?.contains("first"));
        assert_eq!(session.tab().current_frame().url, "first");
        Ok(())
    }

    #[test]
    fn restoration_rewrites_the_persisted_route_and_title() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("first", &[]))?;
        block_on(session.goto("second", &[]))?;
        assert_eq!(session.tab().route_param().as_deref(), Some("second"));

        assert!(block_on(session.back())?);
        assert_eq!(session.tab().route_param().as_deref(), Some("first"));
        assert_eq!(session.tab().title(), "Echo - first");
        assert_eq!(session.tab().current_frame().url, "first");

        assert!(block_on(session.forward())?);
        assert_eq!(session.tab().route_param().as_deref(), Some("second"));
        assert_eq!(session.tab().title(), "Echo - second");
        Ok(())
    }

    #[test]
    fn back_past_recorded_frames_falls_back_to_index() -> Result<()> {
        let mut session = booted_session();
        block_on(session.goto("first", &[]))?;
        assert!(block_on(session.back())?);
        assert!(session.tab().mount_html()?.contains("index"));
        assert_eq!(session.tab().route_param(), None);
        assert!(!block_on(session.back())?);
        Ok(())
    }

    #[test]
    fn route_parameter_replays_on_register() -> Result<()> {
        let mut session = Session::open("https://app.local/?route=orders%2F7", "Echo");
        block_on(session.register(echo_handler(Rc::new(Cell::new(1)))))?;
        assert!(session.tab().mount_html()?.contains("orders/7"));
        // Replay semantics: no frame was pushed for the restoration visit.
        assert_eq!(session.tab().history_len(), 1);
        Ok(())
    }

    #[test]
    fn handler_failure_replaces_the_page_with_the_report() -> Result<()> {
        let mut session = Session::open("https://app.local/", "Echo");
        let failing: Continuation = Box::new(|_request| {
            async {
                let turn: HandlerResult = Err(PageException::new(
                    "ValueError",
                    vec!["bad order id".to_string()],
                    Vec::new(),
                ));
                turn
            }
            .boxed_local()
        });
        block_on(session.register(failing))?;
        block_on(session.goto("orders/nope", &[]))?;
        let page = session.tab().page_html();
        assert!(page.contains("ValueError: bad order id"));
        assert!(page.contains("error-report"));
        // The mount anchor went down with the page.
        assert!(session.tab().mount_html().is_err());
        Ok(())
    }

    #[test]
    fn silent_failure_rejects_and_leaves_the_dom_alone() -> Result<()> {
        let mut session = Session::open("https://app.local/", "Echo");
        let failing: Continuation = Box::new(|_request| {
            async {
                let turn: HandlerResult = Err(PageException::new("KeyError", Vec::new(), Vec::new()));
                turn
            }
            .boxed_local()
        });
        block_on(session.register(failing))?;
        let before = session.tab().page_html();
        let result = block_on(session.goto_silent("orders/nope", &[]));
        match result {
            Err(Error::PageHandler(text)) => assert!(text.contains("KeyError")),
            other => panic!("expected a rejected result, got {other:?}"),
        }
        assert_eq!(session.tab().page_html(), before);
        Ok(())
    }

    #[test]
    fn responses_correlate_one_to_one_with_requests() -> Result<()> {
        let mut session = booted_session();
        let log: Rc<RefCell<Vec<(Option<u64>, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        let log_clone = Rc::clone(&log);
        session.bus().subscribe(Box::new(move |event| {
            let is_response = matches!(event.kind, TelemetryKind::ResponseProduced { .. });
            if is_response || matches!(event.kind, TelemetryKind::RequestIssued { .. }) {
                log_clone
                    .borrow_mut()
                    .push((event.correlation.request_id, is_response));
            }
            Ok(())
        }));
        block_on(session.goto("a", &[]))?;
        block_on(session.goto("b", &[]))?;
        let log = log.borrow();
        let requests = log.iter().filter(|(_, r)| !r).collect::<Vec<_>>();
        let responses = log.iter().filter(|(_, r)| *r).collect::<Vec<_>>();
        assert_eq!(requests.len(), 2);
        assert_eq!(responses.len(), 2);
        for (request, response) in requests.iter().zip(responses.iter()) {
            assert_eq!(request.0, response.0);
        }
        Ok(())
    }

    #[test]
    fn response_events_cite_the_issuing_event() -> Result<()> {
        let mut session = booted_session();
        let events: Rc<RefCell<Vec<TelemetryEvent>>> = Rc::new(RefCell::new(Vec::new()));
        let events_clone = Rc::clone(&events);
        session.bus().subscribe(Box::new(move |event| {
            events_clone.borrow_mut().push(event.clone());
            Ok(())
        }));
        block_on(session.goto("orders/7", &[]))?;

        let events = events.borrow();
        let issued = events
            .iter()
            .find(|event| matches!(event.kind, TelemetryKind::RequestIssued { .. }))
            .expect("request event published");
        let produced = events
            .iter()
            .find(|event| matches!(event.kind, TelemetryKind::ResponseProduced { .. }))
            .expect("response event published");
        assert_eq!(produced.correlation.causation_id, Some(issued.id));
        Ok(())
    }
}
