use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use futures::channel::oneshot;

use crate::dom::{parse_fragment, Dom};
use crate::history::HistoryFrame;
use crate::intent::MOUNT_ID;
use crate::request::FileField;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub(crate) struct StoredFile {
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) content: Vec<u8>,
}

/// The browser side of the bridge: one tab's document, history stack, scroll
/// offset and file blobs, all inspectable from tests. Time only moves when the
/// embedder advances the shared clock.
#[derive(Debug)]
pub struct Tab {
    pub(crate) dom: Dom,
    pub(crate) document_url: String,
    pub(crate) title: String,
    pub(crate) scroll: (f64, f64),
    pub(crate) frames: Vec<HistoryFrame>,
    pub(crate) frame_index: usize,
    pub(crate) files: HashMap<String, Vec<StoredFile>>,
    clock: Rc<Cell<u64>>,
}

impl Tab {
    pub(crate) fn new(document_url: &str, initial_frame: HistoryFrame) -> Self {
        let mut dom = Dom::new();
        let root = dom.root();
        let mut attrs = HashMap::new();
        attrs.insert("id".to_string(), MOUNT_ID.to_string());
        dom.create_element(root, "div".to_string(), attrs);
        Self {
            dom,
            document_url: document_url.to_string(),
            title: String::new(),
            scroll: (0.0, 0.0),
            frames: vec![initial_frame],
            frame_index: 0,
            files: HashMap::new(),
            clock: Rc::new(Cell::new(0)),
        }
    }

    pub fn now(&self) -> u64 {
        self.clock.get()
    }

    pub fn advance_clock(&self, millis: u64) {
        self.clock.set(self.clock.get() + millis);
    }

    pub(crate) fn clock(&self) -> Rc<Cell<u64>> {
        Rc::clone(&self.clock)
    }

    pub fn document_url(&self) -> &str {
        self.document_url.as_str()
    }

    pub fn title(&self) -> &str {
        self.title.as_str()
    }

    pub fn scroll_offset(&self) -> (f64, f64) {
        self.scroll
    }

    pub fn scroll_to(&mut self, x: f64, y: f64) {
        self.scroll = (x, y);
    }

    pub fn mount_html(&self) -> Result<String> {
        let mount = self
            .dom
            .by_id(MOUNT_ID)
            .ok_or_else(|| Error::MissingAnchor(MOUNT_ID.to_string()))?;
        Ok(self.dom.to_html(mount))
    }

    /// Wholesale subtree swap: the old mount content, its ids and its attached
    /// file blobs are all gone after this.
    pub(crate) fn replace_mount(&mut self, body: &str) -> Result<()> {
        let mount = self
            .dom
            .by_id(MOUNT_ID)
            .ok_or_else(|| Error::MissingAnchor(MOUNT_ID.to_string()))?;
        self.dom.clear_children(mount);
        self.files.clear();
        parse_fragment(&mut self.dom, mount, body)
    }

    /// Full-page replacement for fatal error presentation. The mount anchor is
    /// gone afterwards, so no further gestures can be captured.
    pub(crate) fn replace_page(&mut self, html: &str) -> Result<()> {
        let mut dom = Dom::new();
        let root = dom.root();
        parse_fragment(&mut dom, root, html)?;
        self.dom = dom;
        self.files.clear();
        Ok(())
    }

    pub fn page_html(&self) -> String {
        self.dom.to_html(self.dom.root())
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub fn history_len(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> &HistoryFrame {
        &self.frames[self.frame_index]
    }

    pub(crate) fn push_frame(&mut self, frame: HistoryFrame) {
        self.frames.truncate(self.frame_index + 1);
        self.frames.push(frame);
        self.frame_index = self.frames.len() - 1;
    }

    pub(crate) fn step_back(&mut self) -> Option<HistoryFrame> {
        if self.frame_index == 0 {
            return None;
        }
        self.frame_index -= 1;
        Some(self.frames[self.frame_index].clone())
    }

    pub(crate) fn step_forward(&mut self) -> Option<HistoryFrame> {
        if self.frame_index + 1 >= self.frames.len() {
            return None;
        }
        self.frame_index += 1;
        Some(self.frames[self.frame_index].clone())
    }

    pub fn route_param(&self) -> Option<String> {
        let query = self.document_url.split('#').next()?.split_once('?')?.1;
        for pair in query.split('&') {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            if name == "route" {
                return Some(decode_component(value));
            }
        }
        None
    }

    pub(crate) fn set_route_param(&mut self, route: Option<&str>) {
        let (without_fragment, fragment) = match self.document_url.split_once('#') {
            Some((head, tail)) => (head.to_string(), Some(tail.to_string())),
            None => (self.document_url.clone(), None),
        };
        let (base, query) = match without_fragment.split_once('?') {
            Some((base, query)) => (base.to_string(), query.to_string()),
            None => (without_fragment, String::new()),
        };

        let mut pairs = query
            .split('&')
            .filter(|pair| !pair.is_empty() && !pair.starts_with("route="))
            .map(str::to_string)
            .collect::<Vec<_>>();
        if let Some(route) = route {
            pairs.push(format!("route={}", encode_component(route)));
        }

        let mut url = base;
        if !pairs.is_empty() {
            url.push('?');
            url.push_str(&pairs.join("&"));
        }
        if let Some(fragment) = fragment {
            url.push('#');
            url.push_str(&fragment);
        }
        self.document_url = url;
    }

    pub fn attach_file(
        &mut self,
        input_id: &str,
        filename: &str,
        content_type: &str,
        content: Vec<u8>,
    ) {
        self.files.entry(input_id.to_string()).or_default().push(StoredFile {
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            content,
        });
    }

    pub(crate) fn file_count(&self, input_id: &str) -> usize {
        self.files.get(input_id).map(Vec::len).unwrap_or(0)
    }

    /// Starts materializing one attached blob. The bytes arrive through a
    /// oneshot, so the caller suspends on the receiver like any other pending
    /// read even though this mock settles immediately.
    pub(crate) fn read_file(
        &self,
        input_id: &str,
        index: usize,
    ) -> Result<oneshot::Receiver<FileField>> {
        let stored = self
            .files
            .get(input_id)
            .and_then(|list| list.get(index))
            .ok_or_else(|| Error::FileRead(input_id.to_string()))?;
        let field = FileField {
            filename: stored.filename.clone(),
            content_type: stored.content_type.clone(),
            size: stored.content.len() as u64,
            content: stored.content.clone(),
        };
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(field);
        Ok(rx)
    }
}

pub(crate) fn encode_component(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for byte in src.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

pub(crate) fn decode_component(src: &str) -> String {
    let bytes = src.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            if let Some(hex) = src.get(i + 1..i + 3) {
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_tab() -> Tab {
        Tab::new(
            "https://app.local/",
            HistoryFrame {
                request_id: None,
                url: "index".to_string(),
            },
        )
    }

    #[test]
    fn route_param_round_trips() {
        let mut tab = fresh_tab();
        tab.set_route_param(Some("orders/42"));
        assert_eq!(
            tab.document_url(),
            "https://app.local/?route=orders%2F42"
        );
        assert_eq!(tab.route_param().as_deref(), Some("orders/42"));

        tab.set_route_param(None);
        assert_eq!(tab.document_url(), "https://app.local/");
        assert_eq!(tab.route_param(), None);
    }

    #[test]
    fn route_rewrite_preserves_other_params_and_fragment() {
        let mut tab = Tab::new(
            "https://app.local/?theme=dark&route=a#top",
            HistoryFrame {
                request_id: None,
                url: "a".to_string(),
            },
        );
        tab.set_route_param(Some("b"));
        assert_eq!(
            tab.document_url(),
            "https://app.local/?theme=dark&route=b#top"
        );
    }

    #[test]
    fn pushing_a_frame_drops_forward_entries() {
        let mut tab = fresh_tab();
        tab.push_frame(HistoryFrame {
            request_id: Some(1),
            url: "a".to_string(),
        });
        tab.push_frame(HistoryFrame {
            request_id: Some(2),
            url: "b".to_string(),
        });
        assert!(tab.step_back().is_some());
        tab.push_frame(HistoryFrame {
            request_id: Some(3),
            url: "c".to_string(),
        });
        assert_eq!(tab.history_len(), 3);
        assert_eq!(tab.current_frame().url, "c");
        assert!(tab.step_forward().is_none());
    }

    #[test]
    fn replace_mount_clears_attached_files() -> Result<()> {
        let mut tab = fresh_tab();
        tab.replace_mount(r#"<input id="up" type="file" name="doc">"#)?;
        tab.attach_file("up", "a.txt", "text/plain", b"hello".to_vec());
        assert_eq!(tab.file_count("up"), 1);
        tab.replace_mount(r#"<p>gone</p>"#)?;
        assert_eq!(tab.file_count("up"), 0);
        Ok(())
    }

    #[test]
    fn read_file_delivers_bytes_through_the_channel() -> Result<()> {
        let mut tab = fresh_tab();
        tab.replace_mount(r#"<input id="up" type="file" name="doc">"#)?;
        tab.attach_file("up", "a.txt", "text/plain", b"hello".to_vec());
        let rx = tab.read_file("up", 0)?;
        let field = futures::executor::block_on(rx).expect("sender kept");
        assert_eq!(field.filename, "a.txt");
        assert_eq!(field.size, 5);
        assert_eq!(field.content, b"hello");
        Ok(())
    }

    #[test]
    fn reading_a_missing_blob_fails() {
        let tab = fresh_tab();
        assert_eq!(
            tab.read_file("up", 0).unwrap_err(),
            Error::FileRead("up".to_string())
        );
    }
}
