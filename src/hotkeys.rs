use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

/// Two presses of the same combo within this window fire its callback.
pub const CHORD_WINDOW_MS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub key: String,
}

impl KeyPress {
    pub fn ctrl(key: &str) -> Self {
        Self {
            ctrl: true,
            alt: false,
            shift: false,
            key: key.to_string(),
        }
    }

    fn combo(&self) -> Option<String> {
        if !self.ctrl && !self.alt {
            return None;
        }
        let mut combo = String::new();
        if self.ctrl {
            combo.push_str("ctrl+");
        }
        if self.alt {
            combo.push_str("alt+");
        }
        if self.shift {
            combo.push_str("shift+");
        }
        combo.push_str(&self.key.to_lowercase());
        Some(combo)
    }
}

struct Binding {
    callback: Box<dyn FnMut()>,
    last_press: Option<u64>,
}

/// Double-press chord detector. The chord window is tracked per combo, so one
/// combo's half-chord cannot complete another's.
pub struct HotkeyDispatcher {
    bindings: HashMap<String, Binding>,
    clock: Rc<Cell<u64>>,
}

impl HotkeyDispatcher {
    pub(crate) fn new(clock: Rc<Cell<u64>>) -> Self {
        Self {
            bindings: HashMap::new(),
            clock,
        }
    }

    /// Registers `combo` ("ctrl+h" style, case-insensitive). Re-registering
    /// replaces the callback and resets the chord.
    pub fn register(&mut self, combo: &str, callback: Box<dyn FnMut()>) {
        self.bindings.insert(
            combo.to_lowercase(),
            Binding {
                callback,
                last_press: None,
            },
        );
    }

    /// Feeds one key press. Returns true when the chord completed and default
    /// browser handling should be suppressed. The timestamp updates on every
    /// matching press regardless of outcome.
    pub fn on_key(&mut self, press: &KeyPress) -> bool {
        let Some(combo) = press.combo() else {
            return false;
        };
        let Some(binding) = self.bindings.get_mut(&combo) else {
            return false;
        };
        let now = self.clock.get();
        let fired = binding
            .last_press
            .is_some_and(|previous| now.saturating_sub(previous) < CHORD_WINDOW_MS);
        binding.last_press = Some(now);
        if fired {
            debug!(%combo, "hotkey chord fired");
            (binding.callback)();
        }
        fired
    }
}
