use serde_json::Value;
use tracing::debug;

use crate::dom::escape_html;
use crate::telemetry::{TelemetryEvent, TelemetryKind};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct DiffEntry {
    pub path: String,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestRecord {
    pub name: String,
    pub passed: bool,
    pub diff: Option<Vec<DiffEntry>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub request_id: u64,
    pub action: String,
    pub url: String,
    pub parsed_action: Option<String>,
    pub response: Option<(Option<u64>, u16)>,
}

#[derive(Debug, Default)]
struct RoutesPanel {
    routes: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct HistoryPanel {
    rows: Vec<HistoryRow>,
}

impl HistoryPanel {
    fn row_mut(&mut self, request_id: u64) -> Result<&mut HistoryRow> {
        self.rows
            .iter_mut()
            .find(|row| row.request_id == request_id)
            .ok_or_else(|| {
                Error::CausalOrder(format!("no history entry for request {request_id}"))
            })
    }
}

#[derive(Debug, Default)]
struct StatePanel {
    snapshot: Option<Value>,
}

#[derive(Debug, Default)]
struct TestsPanel {
    records: Vec<TestRecord>,
    passed: usize,
    failed: usize,
}

impl TestsPanel {
    fn recount(&mut self) {
        self.passed = self.records.iter().filter(|record| record.passed).count();
        self.failed = self.records.len() - self.passed;
    }
}

/// Derived views over the telemetry stream. Panels hold no independent source
/// of truth; replaying the same events rebuilds the same state.
#[derive(Debug, Default)]
pub struct DebugPanel {
    routes: RoutesPanel,
    history: HistoryPanel,
    state: StatePanel,
    tests: TestsPanel,
}

impl DebugPanel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_event(&mut self, event: &TelemetryEvent) -> Result<()> {
        match &event.kind {
            TelemetryKind::RouteRegistered { name, pattern } => {
                // Duplicate registrations append; the list mirrors live
                // re-registration order.
                self.routes.routes.push((name.clone(), pattern.clone()));
            }
            TelemetryKind::RequestIssued { action, url } => {
                let request_id = event.correlation.request_id.ok_or_else(|| {
                    Error::CausalOrder("request event without a request id".to_string())
                })?;
                self.history.rows.push(HistoryRow {
                    request_id,
                    action: action.clone(),
                    url: url.clone(),
                    parsed_action: None,
                    response: None,
                });
            }
            TelemetryKind::RequestParsed { action } => {
                let request_id = event.correlation.request_id.ok_or_else(|| {
                    Error::CausalOrder("parse event without a request id".to_string())
                })?;
                self.history.row_mut(request_id)?.parsed_action = Some(action.clone());
            }
            TelemetryKind::ResponseProduced { status, .. } => {
                let request_id = event.correlation.request_id.ok_or_else(|| {
                    Error::CausalOrder("response event without a request id".to_string())
                })?;
                let row = self.history.row_mut(request_id)?;
                row.response = Some((event.correlation.response_id, *status));
            }
            TelemetryKind::StateUpdated { snapshot } => {
                self.state.snapshot = Some(snapshot.clone());
            }
            TelemetryKind::TestCaseEvaluated {
                name,
                passed,
                expected,
                actual,
            } => {
                let diff = if *passed {
                    None
                } else {
                    Some(structural_diff(expected, actual))
                };
                self.tests.records.push(TestRecord {
                    name: name.clone(),
                    passed: *passed,
                    diff,
                });
                self.tests.recount();
            }
            TelemetryKind::Message { text } => {
                debug!(event_id = event.id, %text, "unhandled telemetry event");
            }
        }
        Ok(())
    }

    pub fn routes(&self) -> &[(String, String)] {
        &self.routes.routes
    }

    pub fn history_rows(&self) -> &[HistoryRow] {
        &self.history.rows
    }

    pub fn state_snapshot(&self) -> Option<&Value> {
        self.state.snapshot.as_ref()
    }

    pub fn test_records(&self) -> &[TestRecord] {
        &self.tests.records
    }

    pub fn test_counts(&self) -> (usize, usize) {
        (self.tests.passed, self.tests.failed)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("<div class=\"debug-panel\">");

        out.push_str("<section class=\"routes\"><h3>Routes</h3><ul>");
        for (name, pattern) in &self.routes.routes {
            out.push_str(&format!(
                "<li>{} → {}</li>",
                escape_html(name),
                escape_html(pattern)
            ));
        }
        out.push_str("</ul></section>");

        out.push_str("<section class=\"history\"><h3>History</h3><ol>");
        for row in &self.history.rows {
            out.push_str(&format!(
                "<li>#{} {} {}",
                row.request_id,
                escape_html(&row.action),
                escape_html(&row.url)
            ));
            if let Some(parsed) = &row.parsed_action {
                out.push_str(&format!(" parsed={}", escape_html(parsed)));
            }
            if let Some((_, status)) = &row.response {
                out.push_str(&format!(" status={status}"));
            }
            out.push_str("</li>");
        }
        out.push_str("</ol></section>");

        out.push_str("<section class=\"state\"><h3>State</h3><pre>");
        if let Some(snapshot) = &self.state.snapshot {
            out.push_str(&escape_html(&snapshot.to_string()));
        }
        out.push_str("</pre></section>");

        let (passed, failed) = self.test_counts();
        out.push_str(&format!(
            "<section class=\"tests\"><h3>Tests ({passed} passed, {failed} failed)</h3><ul>"
        ));
        for record in &self.tests.records {
            let verdict = if record.passed { "pass" } else { "fail" };
            out.push_str(&format!(
                "<li class=\"{verdict}\">{}",
                escape_html(&record.name)
            ));
            if let Some(diff) = &record.diff {
                for entry in diff {
                    out.push_str(&format!(
                        "<div class=\"diff\">{}: expected {} actual {}</div>",
                        escape_html(&entry.path),
                        escape_html(&entry.expected.to_string()),
                        escape_html(&entry.actual.to_string())
                    ));
                }
            }
            out.push_str("</li>");
        }
        out.push_str("</ul></section></div>");
        out
    }
}

/// Paths where two JSON values disagree. Only computed for failing test cases.
pub(crate) fn structural_diff(expected: &Value, actual: &Value) -> Vec<DiffEntry> {
    let mut out = Vec::new();
    diff_at("$", expected, actual, &mut out);
    out
}

fn diff_at(path: &str, expected: &Value, actual: &Value, out: &mut Vec<DiffEntry>) {
    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            let mut keys = expected_map.keys().collect::<Vec<_>>();
            for key in actual_map.keys() {
                if !expected_map.contains_key(key) {
                    keys.push(key);
                }
            }
            for key in keys {
                let child = format!("{path}.{key}");
                diff_at(
                    &child,
                    expected_map.get(key).unwrap_or(&Value::Null),
                    actual_map.get(key).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            let len = expected_items.len().max(actual_items.len());
            for index in 0..len {
                let child = format!("{path}[{index}]");
                diff_at(
                    &child,
                    expected_items.get(index).unwrap_or(&Value::Null),
                    actual_items.get(index).unwrap_or(&Value::Null),
                    out,
                );
            }
        }
        (expected, actual) if expected != actual => out.push(DiffEntry {
            path: path.to_string(),
            expected: expected.clone(),
            actual: actual.clone(),
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Correlation, EventBus, Level};
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn bus() -> EventBus {
        EventBus::new(Rc::new(Cell::new(0)))
    }

    fn issued(bus: &EventBus, request_id: u64) -> TelemetryEvent {
        bus.publish(
            TelemetryKind::RequestIssued {
                action: "orders".to_string(),
                url: format!("orders/{request_id}"),
            },
            Correlation::for_request(request_id),
            Level::Info,
            "bridge",
        )
    }

    #[test]
    fn response_augments_only_its_own_entry() -> Result<()> {
        let bus = bus();
        let mut panel = DebugPanel::new();
        panel.handle_event(&issued(&bus, 7))?;
        panel.handle_event(&issued(&bus, 8))?;
        let response = bus.publish(
            TelemetryKind::ResponseProduced {
                url: "orders/7".to_string(),
                status: 200,
            },
            Correlation::for_request(7).with_response(71),
            Level::Info,
            "bridge",
        );
        panel.handle_event(&response)?;

        let rows = panel.history_rows();
        assert_eq!(rows[0].request_id, 7);
        assert_eq!(rows[0].response, Some((Some(71), 200)));
        assert_eq!(rows[1].request_id, 8);
        assert_eq!(rows[1].response, None);
        Ok(())
    }

    #[test]
    fn augmenting_a_missing_entry_is_a_causal_violation() {
        let bus = bus();
        let mut panel = DebugPanel::new();
        let response = bus.publish(
            TelemetryKind::ResponseProduced {
                url: "orders/7".to_string(),
                status: 200,
            },
            Correlation::for_request(7),
            Level::Info,
            "bridge",
        );
        assert_eq!(
            panel.handle_event(&response).unwrap_err(),
            Error::CausalOrder("no history entry for request 7".to_string())
        );
    }

    #[test]
    fn duplicate_route_registrations_append() -> Result<()> {
        let bus = bus();
        let mut panel = DebugPanel::new();
        for _ in 0..2 {
            let event = bus.publish(
                TelemetryKind::RouteRegistered {
                    name: "orders".to_string(),
                    pattern: "orders/<id>".to_string(),
                },
                Correlation::none(),
                Level::Info,
                "interpreter",
            );
            panel.handle_event(&event)?;
        }
        assert_eq!(panel.routes().len(), 2);
        Ok(())
    }

    #[test]
    fn state_snapshot_is_replaced_wholesale() -> Result<()> {
        let bus = bus();
        let mut panel = DebugPanel::new();
        for snapshot in [json!({"a": 1, "b": 2}), json!({"c": 3})] {
            let event = bus.publish(
                TelemetryKind::StateUpdated { snapshot },
                Correlation::none(),
                Level::Debug,
                "interpreter",
            );
            panel.handle_event(&event)?;
        }
        assert_eq!(panel.state_snapshot(), Some(&json!({"c": 3})));
        Ok(())
    }

    #[test]
    fn failing_test_cases_carry_a_structural_diff() -> Result<()> {
        let bus = bus();
        let mut panel = DebugPanel::new();
        let passing = bus.publish(
            TelemetryKind::TestCaseEvaluated {
                name: "ok".to_string(),
                passed: true,
                expected: json!(1),
                actual: json!(1),
            },
            Correlation::none(),
            Level::Info,
            "interpreter",
        );
        let failing = bus.publish(
            TelemetryKind::TestCaseEvaluated {
                name: "broken".to_string(),
                passed: false,
                expected: json!({"count": 2, "tags": ["a", "b"]}),
                actual: json!({"count": 3, "tags": ["a"]}),
            },
            Correlation::none(),
            Level::Warn,
            "interpreter",
        );
        panel.handle_event(&passing)?;
        panel.handle_event(&failing)?;

        assert_eq!(panel.test_counts(), (1, 1));
        let records = panel.test_records();
        assert_eq!(records[0].diff, None);
        let diff = records[1].diff.as_ref().expect("diff on failure");
        assert_eq!(
            diff.iter().map(|entry| entry.path.as_str()).collect::<Vec<_>>(),
            vec!["$.count", "$.tags[1]"]
        );
        Ok(())
    }

    #[test]
    fn render_reflects_panel_state() -> Result<()> {
        let bus = bus();
        let mut panel = DebugPanel::new();
        panel.handle_event(&issued(&bus, 1))?;
        let markup = panel.render();
        assert!(markup.contains("<section class=\"history\">"));
        assert!(markup.contains("#1 orders orders/1"));
        assert!(markup.contains("Tests (0 passed, 0 failed)"));
        Ok(())
    }
}
