use crate::dom::escape_html;

/// File name assigned to frames of the top-level executed page source.
pub const TOP_LEVEL_FILE: &str = "<page>";

const MAX_FULL_FRAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub file: String,
    pub line: usize,
    pub scope: String,
    /// Source text captured with the frame, if the interpreter had it.
    pub source_line: Option<String>,
}

impl TraceFrame {
    pub fn new(file: &str, line: usize, scope: &str) -> Self {
        Self {
            file: file.to_string(),
            line,
            scope: scope.to_string(),
            source_line: None,
        }
    }

    pub fn with_source(mut self, source_line: &str) -> Self {
        self.source_line = Some(source_line.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCategory {
    General,
    Timeout,
}

/// A page-handler exception as captured at the interpreter boundary: frames
/// are innermost-first and get reversed for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageException {
    pub type_name: String,
    pub args: Vec<String>,
    pub frames: Vec<TraceFrame>,
    /// The originally submitted page source, used to slice source lines for
    /// frames belonging to [`TOP_LEVEL_FILE`].
    pub source: Option<String>,
    pub category: ExceptionCategory,
}

enum DisplayItem<'a> {
    Frame(&'a TraceFrame, Option<String>),
    Elision(usize),
}

impl PageException {
    pub fn new(type_name: &str, args: Vec<String>, frames: Vec<TraceFrame>) -> Self {
        Self {
            type_name: type_name.to_string(),
            args,
            frames,
            source: None,
            category: ExceptionCategory::General,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = Some(source.to_string());
        self
    }

    pub fn timeout(mut self) -> Self {
        self.category = ExceptionCategory::Timeout;
        self
    }

    pub fn headline(&self) -> String {
        match self.args.first() {
            Some(first) => format!("{}: {first}", self.type_name),
            None => self.type_name.clone(),
        }
    }

    fn source_for(&self, frame: &TraceFrame) -> Option<String> {
        if let Some(line) = &frame.source_line {
            return Some(line.clone());
        }
        if frame.file != TOP_LEVEL_FILE {
            return None;
        }
        let source = self.source.as_deref()?;
        source
            .lines()
            .nth(frame.line.checked_sub(1)?)
            .map(|line| line.trim_end().to_string())
    }

    fn display_items(&self) -> Vec<DisplayItem<'_>> {
        let ordered = self.frames.iter().rev().collect::<Vec<_>>();
        let mut items = Vec::with_capacity(ordered.len() + 1);

        let elide =
            self.category == ExceptionCategory::Timeout && ordered.len() > MAX_FULL_FRAMES;
        if elide {
            for &frame in &ordered[..3] {
                items.push(DisplayItem::Frame(frame, self.source_for(frame)));
            }
            items.push(DisplayItem::Elision(ordered.len() - MAX_FULL_FRAMES));
            let last = ordered[ordered.len() - 1];
            items.push(DisplayItem::Frame(last, self.source_for(last)));
        } else {
            for &frame in &ordered {
                items.push(DisplayItem::Frame(frame, self.source_for(frame)));
            }
        }
        items
    }

    fn elision_marker(hidden: usize) -> String {
        let noun = if hidden == 1 {
            "stack frame"
        } else {
            "stack frames"
        };
        format!("...Hiding {hidden} other {noun}...")
    }

    /// Plain-text rendering for programmatic consumers.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        out.push_str("Traceback (most recent call last):\n");
        for item in self.display_items() {
            match item {
                DisplayItem::Frame(frame, source) => {
                    out.push_str(&format!(
                        "  File \"{}\", line {}, in {}\n",
                        frame.file, frame.line, frame.scope
                    ));
                    if let Some(source) = source {
                        out.push_str(&format!("    {}\n", source.trim()));
                    }
                }
                DisplayItem::Elision(hidden) => {
                    out.push_str(&format!("  {}\n", Self::elision_marker(hidden)));
                }
            }
        }
        out.push_str(&self.headline());
        out.push('\n');
        out
    }

    /// Markup rendering for on-page display, with generic troubleshooting
    /// advice for the full-page error case.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        out.push_str("<div class=\"error-report\">");
        out.push_str(&format!("<h2>{}</h2>", escape_html(&self.headline())));
        out.push_str("<p>Traceback (most recent call last):</p><div class=\"traceback\">");
        for item in self.display_items() {
            match item {
                DisplayItem::Frame(frame, source) => {
                    out.push_str(&format!(
                        "<div class=\"frame\">File &quot;{}&quot;, line {}, in {}</div>",
                        escape_html(&frame.file),
                        frame.line,
                        escape_html(&frame.scope)
                    ));
                    if let Some(source) = source {
                        out.push_str(&format!("<pre>{}</pre>", escape_html(source.trim())));
                    }
                }
                DisplayItem::Elision(hidden) => {
                    out.push_str(&format!(
                        "<div class=\"elision\">{}</div>",
                        escape_html(&Self::elision_marker(hidden))
                    ));
                }
            }
        }
        out.push_str("</div>");
        out.push_str(
            "<p class=\"advice\">The page handler stopped before it could render. \
             Going back or reloading the tab restarts it; if the error persists, \
             the route and form data above are the place to look.</p>",
        );
        out.push_str("</div>");
        out
    }
}
