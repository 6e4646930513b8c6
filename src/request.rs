use std::cell::Cell;

use futures::future::join_all;

use crate::intent::{CaptureSource, NavigationIntent};
use crate::tab::Tab;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileField {
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File(FileField),
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text.as_str()),
            Self::File(_) => None,
        }
    }
}

/// Immutable once built. The id comes from the session-wide counter and is
/// never reused; keyed values are an ordered multimap, so same-named fields
/// stay distinct and ordered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub action: String,
    pub url: String,
    pub positional_args: Vec<String>,
    pub keyed_values: Vec<(String, Vec<FormValue>)>,
    pub timestamp: u64,
}

impl Request {
    pub fn values(&self, name: &str) -> Option<&[FormValue]> {
        self.keyed_values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, values)| values.as_slice())
    }

    pub fn texts(&self, name: &str) -> Vec<&str> {
        self.values(name)
            .map(|values| values.iter().filter_map(FormValue::as_text).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u64,
    pub request_id: u64,
    pub url: String,
    pub body: String,
    pub status: u16,
}

impl Response {
    pub fn new(id: u64, request_id: u64, url: &str, body: &str, status: u16) -> Self {
        Self {
            id,
            request_id,
            url: url.to_string(),
            body: body.to_string(),
            status,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RequestCounter(Cell<u64>);

impl RequestCounter {
    pub(crate) fn new() -> Self {
        Self(Cell::new(1))
    }

    pub(crate) fn next(&self) -> u64 {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }
}

fn push_value(keyed: &mut Vec<(String, Vec<FormValue>)>, name: &str, value: FormValue) {
    if let Some((_, values)) = keyed.iter_mut().find(|(key, _)| key == name) {
        values.push(value);
    } else {
        keyed.push((name.to_string(), vec![value]));
    }
}

fn split_route(url: &str) -> (String, Vec<String>) {
    let mut segments = url.split('/').filter(|segment| !segment.is_empty());
    let action = segments.next().unwrap_or("index").to_string();
    (action, segments.map(str::to_string).collect())
}

/// Finalizes an intent into a Request. Every pending file read settles before
/// the id is drawn, so ids observe the order requests were completed in, not
/// the order gestures happened.
pub(crate) async fn build_request(
    tab: &Tab,
    intent: &NavigationIntent,
    counter: &RequestCounter,
) -> Result<Request> {
    let mut keyed: Vec<(String, Vec<FormValue>)> = Vec::new();

    for field in &intent.fields {
        match &field.source {
            CaptureSource::Text(text) => {
                push_value(&mut keyed, &field.name, FormValue::Text(text.clone()));
            }
            CaptureSource::Files { input_id, count } => {
                let mut reads = Vec::with_capacity(*count);
                for index in 0..*count {
                    reads.push(tab.read_file(input_id, index)?);
                }
                for received in join_all(reads).await {
                    let file = received.map_err(|_| Error::FileRead(field.name.clone()))?;
                    push_value(&mut keyed, &field.name, FormValue::File(file));
                }
            }
        }
    }

    if let Some((name, value)) = &intent.submitter {
        push_value(&mut keyed, name, FormValue::Text(value.clone()));
    }

    let (action, positional_args) = split_route(&intent.url);
    let id = counter.next();
    Ok(Request {
        id,
        action,
        url: intent.url.clone(),
        positional_args,
        keyed_values: keyed,
        timestamp: tab.now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryFrame;
    use crate::intent::{FieldCapture, IntentKind};
    use futures::executor::block_on;

    fn fresh_tab() -> Tab {
        Tab::new(
            "https://app.local/",
            HistoryFrame {
                request_id: None,
                url: "index".to_string(),
            },
        )
    }

    fn text_field(name: &str, value: &str) -> FieldCapture {
        FieldCapture {
            name: name.to_string(),
            source: CaptureSource::Text(value.to_string()),
        }
    }

    #[test]
    fn same_named_fields_coalesce_in_order() -> Result<()> {
        let tab = fresh_tab();
        let counter = RequestCounter::new();
        let intent = NavigationIntent {
            kind: IntentKind::Form,
            url: "tags/save".to_string(),
            fields: vec![text_field("tag", "a"), text_field("other", "x"), text_field("tag", "b")],
            submitter: None,
        };
        let request = block_on(build_request(&tab, &intent, &counter))?;
        assert_eq!(request.texts("tag"), vec!["a", "b"]);
        assert_eq!(request.texts("other"), vec!["x"]);
        assert_eq!(request.action, "tags");
        assert_eq!(request.positional_args, vec!["save".to_string()]);
        Ok(())
    }

    #[test]
    fn restoration_intent_yields_empty_keyed_values() -> Result<()> {
        let tab = fresh_tab();
        let counter = RequestCounter::new();
        let intent = NavigationIntent {
            kind: IntentKind::Link,
            url: "orders/42".to_string(),
            fields: Vec::new(),
            submitter: None,
        };
        let request = block_on(build_request(&tab, &intent, &counter))?;
        assert!(request.keyed_values.is_empty());
        assert_eq!(request.action, "orders");
        assert_eq!(request.positional_args, vec!["42".to_string()]);
        Ok(())
    }

    #[test]
    fn two_files_under_one_key_stay_an_ordered_list() -> Result<()> {
        let mut tab = fresh_tab();
        tab.replace_mount(
            r#"<input id="up1" type="file" name="doc"><input id="up2" type="file" name="doc">"#,
        )?;
        tab.attach_file("up1", "first.txt", "text/plain", b"1".to_vec());
        tab.attach_file("up2", "second.txt", "text/plain", b"22".to_vec());
        let counter = RequestCounter::new();
        let intent = NavigationIntent {
            kind: IntentKind::Form,
            url: "upload".to_string(),
            fields: vec![
                FieldCapture {
                    name: "doc".to_string(),
                    source: CaptureSource::Files {
                        input_id: "up1".to_string(),
                        count: 1,
                    },
                },
                FieldCapture {
                    name: "doc".to_string(),
                    source: CaptureSource::Files {
                        input_id: "up2".to_string(),
                        count: 1,
                    },
                },
            ],
            submitter: None,
        };
        let request = block_on(build_request(&tab, &intent, &counter))?;
        let docs = request.values("doc").expect("doc present");
        assert_eq!(docs.len(), 2);
        match (&docs[0], &docs[1]) {
            (FormValue::File(first), FormValue::File(second)) => {
                assert_eq!(first.filename, "first.txt");
                assert_eq!(second.filename, "second.txt");
                assert_eq!(second.size, 2);
            }
            other => panic!("expected two files, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn ids_strictly_increase() -> Result<()> {
        let tab = fresh_tab();
        let counter = RequestCounter::new();
        let intent = NavigationIntent {
            kind: IntentKind::Link,
            url: "index".to_string(),
            fields: Vec::new(),
            submitter: None,
        };
        let first = block_on(build_request(&tab, &intent, &counter))?;
        let second = block_on(build_request(&tab, &intent, &counter))?;
        assert_eq!(first.id + 1, second.id);
        Ok(())
    }

    #[test]
    fn submitter_participates_as_a_text_value() -> Result<()> {
        let tab = fresh_tab();
        let counter = RequestCounter::new();
        let intent = NavigationIntent {
            kind: IntentKind::Link,
            url: "orders/delete".to_string(),
            fields: vec![text_field("name", "Alice")],
            submitter: Some(("confirm".to_string(), "yes".to_string())),
        };
        let request = block_on(build_request(&tab, &intent, &counter))?;
        assert_eq!(request.texts("confirm"), vec!["yes"]);
        Ok(())
    }
}
