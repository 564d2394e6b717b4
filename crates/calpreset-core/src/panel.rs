use std::cell::RefCell;

use calpreset_shared::WindowId;
use futures::future::LocalBoxFuture;
use tracing::{debug, error, info, instrument};

use crate::config::EngineConfig;
use crate::dom::Clock;
use crate::guard::PanelRegistry;

/// Side-panel show/hide surface of the extension platform.
///
/// Both methods issue the platform call before returning; the returned
/// future only waits for its result. Opening only works while the browser
/// still considers the caller part of a user gesture.
pub trait SidePanel {
    fn open(&self, window: WindowId) -> LocalBoxFuture<'static, anyhow::Result<()>>;
    /// Hides the panel and re-enables it so the next toggle can open it.
    fn close(&self, window: WindowId) -> LocalBoxFuture<'static, anyhow::Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Opened,
    Closed,
    /// Debounced or already in flight; nothing was called.
    Rejected,
    /// The platform call failed; the panel is now considered closed.
    Failed,
}

/// A toggle whose platform call has been issued but not yet settled.
pub struct PendingToggle {
    window: WindowId,
    closing: bool,
    call: LocalBoxFuture<'static, anyhow::Result<()>>,
}

/// Background-context owner of the per-window panel state.
pub struct PanelController<P, C> {
    panel: P,
    clock: C,
    calendar_host: String,
    windows: RefCell<PanelRegistry>,
}

impl<P: SidePanel, C: Clock> PanelController<P, C> {
    pub fn new(panel: P, clock: C, config: &EngineConfig) -> Self {
        Self {
            panel,
            clock,
            calendar_host: config.host.calendar_host.clone(),
            windows: RefCell::new(PanelRegistry::new(config.host.panel_min_interval_ms)),
        }
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn is_open(&self, window: WindowId) -> bool {
        self.windows.borrow().is_open(window)
    }

    /// Opens or closes the panel of `window`.
    pub async fn toggle(&self, window: WindowId) -> ToggleOutcome {
        match self.begin_toggle(window) {
            Some(pending) => self.finish_toggle(pending).await,
            None => ToggleOutcome::Rejected,
        }
    }

    /// Runs the toggle guard and starts the open or close call without
    /// suspending, so it can run inside a user-gesture callback. `None` when
    /// the toggle is debounced or already in flight.
    pub fn begin_toggle(&self, window: WindowId) -> Option<PendingToggle> {
        let now_ms = self.clock.now().timestamp_millis();
        let closing = {
            let mut windows = self.windows.borrow_mut();
            if !windows.can_process(window, now_ms) {
                debug!(window, "panel toggle rejected");
                return None;
            }
            windows.mark_processing(window, now_ms);
            windows.is_open(window)
        };

        let call = if closing {
            self.panel.close(window)
        } else {
            self.panel.open(window)
        };
        Some(PendingToggle {
            window,
            closing,
            call,
        })
    }

    /// Waits for the call started by [`begin_toggle`](Self::begin_toggle)
    /// and records the result.
    #[instrument(skip_all, fields(window = pending.window))]
    pub async fn finish_toggle(&self, pending: PendingToggle) -> ToggleOutcome {
        let PendingToggle {
            window,
            closing,
            call,
        } = pending;

        let outcome = match (call.await, closing) {
            (Ok(()), true) => ToggleOutcome::Closed,
            (Ok(()), false) => ToggleOutcome::Opened,
            (Err(err), true) => {
                error!(error = %err, "failed to close side panel");
                ToggleOutcome::Failed
            }
            (Err(err), false) => {
                error!(error = %err, "failed to open side panel");
                ToggleOutcome::Failed
            }
        };

        let mut windows = self.windows.borrow_mut();
        // The window may have closed while the call was pending.
        if windows.tracks(window) {
            windows.set_open(window, outcome == ToggleOutcome::Opened);
            windows.unmark_processing(window);
        }
        info!(?outcome, "side panel toggled");
        outcome
    }

    /// The platform cannot close the panel on its own when the user leaves
    /// the calendar, so the next toggle must start from "closed".
    pub fn tab_changed(&self, window: WindowId, url: Option<&str>) {
        let on_calendar = url.is_some_and(|url| url.contains(&self.calendar_host));
        if !on_calendar {
            self.windows.borrow_mut().set_open(window, false);
        }
    }

    pub fn window_removed(&self, window: WindowId) {
        debug!(window, "forgetting panel state");
        self.windows.borrow_mut().clear_window(window);
    }

    pub fn tracks(&self, window: WindowId) -> bool {
        self.windows.borrow().tracks(window)
    }
}
