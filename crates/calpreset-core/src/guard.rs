use std::cell::Cell;
use std::collections::HashMap;

use calpreset_shared::WindowId;

/// At most one DOM-mutating walk at a time. A second caller is refused, not
/// queued.
#[derive(Debug, Default)]
pub struct WalkGuard {
    busy: Cell<bool>,
}

/// Held for the duration of a walk; dropping it releases the guard on every
/// exit path.
#[derive(Debug)]
pub struct WalkPermit<'a> {
    busy: &'a Cell<bool>,
}

impl WalkGuard {
    pub fn try_acquire(&self) -> Option<WalkPermit<'_>> {
        if self.busy.replace(true) {
            return None;
        }
        Some(WalkPermit { busy: &self.busy })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }
}

impl Drop for WalkPermit<'_> {
    fn drop(&mut self) {
        self.busy.set(false);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WindowPanel {
    open: bool,
    processing: bool,
    last_invoked_ms: Option<i64>,
}

/// Per-window side panel state plus the toggle debounce.
#[derive(Debug)]
pub struct PanelRegistry {
    min_interval_ms: i64,
    windows: HashMap<WindowId, WindowPanel>,
}

impl PanelRegistry {
    pub fn new(min_interval_ms: i64) -> Self {
        Self {
            min_interval_ms,
            windows: HashMap::new(),
        }
    }

    /// Refuses while a toggle is in flight or when the last one started less
    /// than the minimum interval ago.
    pub fn can_process(&self, window: WindowId, now_ms: i64) -> bool {
        let Some(state) = self.windows.get(&window) else {
            return true;
        };
        if state.processing {
            return false;
        }
        match state.last_invoked_ms {
            Some(last) => now_ms - last >= self.min_interval_ms,
            None => true,
        }
    }

    pub fn mark_processing(&mut self, window: WindowId, now_ms: i64) {
        let state = self.windows.entry(window).or_default();
        state.processing = true;
        state.last_invoked_ms = Some(now_ms);
    }

    pub fn unmark_processing(&mut self, window: WindowId) {
        if let Some(state) = self.windows.get_mut(&window) {
            state.processing = false;
        }
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.windows.get(&window).is_some_and(|state| state.open)
    }

    pub fn set_open(&mut self, window: WindowId, open: bool) {
        self.windows.entry(window).or_default().open = open;
    }

    pub fn clear_window(&mut self, window: WindowId) {
        self.windows.remove(&window);
    }

    pub fn tracks(&self, window: WindowId) -> bool {
        self.windows.contains_key(&window)
    }
}
