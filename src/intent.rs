use std::collections::HashMap;

use crate::dom::{
    is_anchor_like, is_checkbox_input, is_file_input, is_form_control, is_radio_input, Dom, NodeId,
};
use crate::tab::Tab;
use crate::{Error, Result};

pub const MOUNT_ID: &str = "mount";
pub const FORM_ID: &str = "page-form";
pub const NAVIGATE_ATTR: &str = "data-navigate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    Link,
    Form,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CaptureSource {
    Text(String),
    Files { input_id: String, count: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FieldCapture {
    pub(crate) name: String,
    pub(crate) source: CaptureSource,
}

/// Ephemeral description of one gesture; consumed immediately by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationIntent {
    pub kind: IntentKind,
    pub url: String,
    pub(crate) fields: Vec<FieldCapture>,
    pub(crate) submitter: Option<(String, String)>,
}

#[derive(Debug, Clone)]
struct Binding {
    url: String,
    submitter: Option<(String, String)>,
}

/// Gesture classification over the mount subtree. Bindings are an explicit
/// id-to-target registry rebuilt after every mount replacement, so a binding
/// can never outlive the subtree it was captured from.
#[derive(Debug, Default)]
pub(crate) struct NavigationCapture {
    bindings: HashMap<String, Binding>,
}

impl NavigationCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn rebuild_bindings(&mut self, tab: &Tab) -> Result<()> {
        let mount = tab
            .dom
            .by_id(MOUNT_ID)
            .ok_or_else(|| Error::MissingAnchor(MOUNT_ID.to_string()))?;
        self.bindings.clear();
        for node in tab.dom.descendant_elements(mount) {
            let Some(url) = tab.dom.attr(node, NAVIGATE_ATTR) else {
                continue;
            };
            let Some(id) = tab.dom.attr(node, "id") else {
                continue;
            };
            let submitter = if is_anchor_like(&tab.dom, node) {
                None
            } else {
                tab.dom.attr(node, "name").map(|name| {
                    (
                        name.to_string(),
                        tab.dom.attr(node, "value").unwrap_or("").to_string(),
                    )
                })
            };
            self.bindings.insert(
                id.to_string(),
                Binding {
                    url: url.to_string(),
                    submitter,
                },
            );
        }
        Ok(())
    }

    /// Classifies a click on `element_id`. `Ok(None)` means the element exists
    /// but carries no navigate marker; the gesture falls through to the page.
    pub(crate) fn intent_for_click(
        &self,
        tab: &Tab,
        element_id: &str,
    ) -> Result<Option<NavigationIntent>> {
        let Some(binding) = self.bindings.get(element_id) else {
            if tab.dom.by_id(element_id).is_some() {
                return Ok(None);
            }
            return Err(Error::UnknownTarget(element_id.to_string()));
        };
        let fields = snapshot_form(tab)?;
        Ok(Some(NavigationIntent {
            kind: IntentKind::Link,
            url: binding.url.clone(),
            fields,
            submitter: binding.submitter.clone(),
        }))
    }

    pub(crate) fn intent_for_submit(&self, tab: &Tab) -> Result<NavigationIntent> {
        let form = tab
            .dom
            .by_id(FORM_ID)
            .ok_or_else(|| Error::MissingAnchor(FORM_ID.to_string()))?;
        let action = tab
            .dom
            .attr(form, "data-action")
            .or_else(|| tab.dom.attr(form, "action"))
            .ok_or_else(|| Error::MissingAnchor(format!("{FORM_ID} action")))?
            .to_string();
        let fields = snapshot_form(tab)?;
        Ok(NavigationIntent {
            kind: IntentKind::Form,
            url: action,
            fields,
            submitter: None,
        })
    }
}

/// Full field snapshot of the fixed-id form, in document order. The fixed id
/// is deliberate: the mount subtree is wholesale-replaced on every navigation,
/// so a stable id beats ancestry lookups.
pub(crate) fn snapshot_form(tab: &Tab) -> Result<Vec<FieldCapture>> {
    let form = tab
        .dom
        .by_id(FORM_ID)
        .ok_or_else(|| Error::MissingAnchor(FORM_ID.to_string()))?;

    let mut fields = Vec::new();
    for node in tab.dom.descendant_elements(form) {
        if !is_form_control(&tab.dom, node) {
            continue;
        }
        let Some(element) = tab.dom.element(node) else {
            continue;
        };
        if element.disabled {
            continue;
        }
        let Some(name) = element.attrs.get("name").cloned() else {
            continue;
        };

        if is_file_input(&tab.dom, node) {
            let Some(input_id) = element.attrs.get("id").cloned() else {
                continue;
            };
            let count = tab.file_count(&input_id);
            fields.push(FieldCapture {
                name,
                source: CaptureSource::Files { input_id, count },
            });
            continue;
        }

        if is_checkbox_input(&tab.dom, node) || is_radio_input(&tab.dom, node) {
            if element.checked {
                let value = element
                    .attrs
                    .get("value")
                    .cloned()
                    .unwrap_or_else(|| "on".to_string());
                fields.push(FieldCapture {
                    name,
                    source: CaptureSource::Text(value),
                });
            }
            continue;
        }

        if element.tag_name.eq_ignore_ascii_case("select") {
            if let Some(value) = selected_option_value(&tab.dom, node) {
                fields.push(FieldCapture {
                    name,
                    source: CaptureSource::Text(value),
                });
            }
            continue;
        }

        let value = if element.tag_name.eq_ignore_ascii_case("textarea")
            && element.value.is_empty()
        {
            tab.dom.text_content(node)
        } else {
            element.value.clone()
        };
        fields.push(FieldCapture {
            name,
            source: CaptureSource::Text(value),
        });
    }
    Ok(fields)
}

fn selected_option_value(dom: &Dom, select: NodeId) -> Option<String> {
    let options = dom
        .descendant_elements(select)
        .into_iter()
        .filter(|node| dom.tag_name(*node).is_some_and(|tag| tag.eq_ignore_ascii_case("option")))
        .collect::<Vec<_>>();
    let chosen = options
        .iter()
        .find(|node| dom.element(**node).is_some_and(|el| el.checked))
        .or_else(|| options.first())?;
    let element = dom.element(*chosen)?;
    if element.attrs.contains_key("value") {
        Some(element.value.clone())
    } else {
        Some(dom.text_content(*chosen).trim().to_string())
    }
}

/// Locates a named control inside the fixed-id form, for harness mutation.
pub(crate) fn field_node(tab: &Tab, name: &str) -> Result<NodeId> {
    let form = tab
        .dom
        .by_id(FORM_ID)
        .ok_or_else(|| Error::MissingAnchor(FORM_ID.to_string()))?;
    tab.dom
        .descendant_elements(form)
        .into_iter()
        .find(|node| {
            is_form_control(&tab.dom, *node) && tab.dom.attr(*node, "name") == Some(name)
        })
        .ok_or_else(|| Error::UnknownTarget(name.to_string()))
}
