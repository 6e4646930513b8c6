use crate::request::Request;
use crate::tab::Tab;

/// The only two fields restoration may trust. Everything else is re-derived by
/// re-visiting `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFrame {
    pub request_id: Option<u64>,
    pub url: String,
}

/// Records an issued request in browser history. Runs strictly before the
/// continuation fires, so a reload mid-navigation reflects the most recently
/// initiated navigation.
pub(crate) fn add_to_history(tab: &mut Tab, request: &Request, site_title: &str) {
    tab.push_frame(HistoryFrame {
        request_id: Some(request.id),
        url: request.url.clone(),
    });
    tab.set_title(format!("{site_title} - {}", request.url));
    tab.set_route_param(Some(&request.url));
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PopDirective {
    /// The frame was recorded by a navigation; re-visit its url without
    /// pushing a new frame.
    Revisit(String),
    /// No state on the frame; fall back to the index visit and clear the
    /// route parameter.
    IndexFallback,
}

pub(crate) fn classify_popstate(frame: &HistoryFrame) -> PopDirective {
    if frame.request_id.is_some() {
        PopDirective::Revisit(frame.url.clone())
    } else {
        PopDirective::IndexFallback
    }
}
