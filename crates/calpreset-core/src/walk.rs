use std::collections::HashSet;

use tracing::{debug, trace};

use crate::config::ScrollConfig;
use crate::dom::{Clock, Dom, NodeId};
use crate::walker::ListWalker;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkReport {
    /// Eligible checkboxes handed to the action.
    pub processed: usize,
    /// Actions that changed a checkbox.
    pub changed: usize,
    /// Scroll steps taken; zero when the list did not need scrolling.
    pub steps: u32,
    pub scrolled: bool,
    pub stopped_early: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    Completed(WalkReport),
    /// Another walk held the guard; nothing was touched.
    Skipped,
}

impl WalkOutcome {
    pub fn report(self) -> Option<WalkReport> {
        match self {
            WalkOutcome::Completed(report) => Some(report),
            WalkOutcome::Skipped => None,
        }
    }
}

struct WalkSession {
    visited: HashSet<NodeId>,
    report: WalkReport,
}

impl WalkSession {
    fn new() -> Self {
        Self {
            visited: HashSet::new(),
            report: WalkReport::default(),
        }
    }

    /// Runs the action on every eligible checkbox not seen before and returns
    /// how many were new.
    fn sweep<D, F>(&mut self, walker: &ListWalker, dom: &D, action: &mut F) -> usize
    where
        D: Dom,
        F: FnMut(&D::Node) -> bool,
    {
        let mut fresh = 0;
        for checkbox in dom.query_selector_all(None, walker.checkbox_selector()) {
            let id = dom.identity(&checkbox);
            if self.visited.contains(&id) || !walker.is_eligible_checkbox(dom, &checkbox) {
                continue;
            }
            self.visited.insert(id);
            fresh += 1;
            self.report.processed += 1;
            if action(&checkbox) {
                self.report.changed += 1;
            }
        }
        fresh
    }
}

/// Scrolls a possibly virtualized calendar list top to bottom, handing each
/// eligible checkbox to `action` once. `action` returns whether it changed
/// the checkbox.
///
/// The container's scroll offset is restored afterwards.
#[tracing::instrument(skip_all)]
pub async fn walk_list<D, C, F>(
    walker: &ListWalker,
    scroll: &ScrollConfig,
    dom: &D,
    clock: &C,
    mut action: F,
) -> WalkReport
where
    D: Dom,
    C: Clock,
    F: FnMut(&D::Node) -> bool,
{
    let mut session = WalkSession::new();

    let Some(sample) = walker.find_representative_checkbox(dom) else {
        debug!("no calendar checkbox on the page");
        return session.report;
    };

    let Some(container) = walker.find_scrollable_ancestor(dom, &sample) else {
        session.sweep(walker, dom, &mut action);
        debug!(
            processed = session.report.processed,
            changed = session.report.changed,
            "walked unscrolled list"
        );
        return session.report;
    };

    session.report.scrolled = true;
    let original_top = dom.scroll_top(&container);
    let step = scroll.step_for(dom.client_height(&container));
    dom.set_scroll_top(&container, 0);

    let mut position = 0;
    let mut idle_steps = 0;
    while position <= dom.scroll_height(&container) {
        dom.set_scroll_top(&container, position);
        clock.sleep(scroll.step_delay()).await;
        session.report.steps += 1;

        let fresh = session.sweep(walker, dom, &mut action);
        trace!(position, fresh, "scroll step");
        if fresh == 0 {
            idle_steps += 1;
            if idle_steps >= scroll.idle_step_limit {
                session.report.stopped_early = true;
                break;
            }
        } else {
            idle_steps = 0;
        }

        position += step;
    }

    dom.set_scroll_top(&container, original_top);
    debug!(
        steps = session.report.steps,
        processed = session.report.processed,
        changed = session.report.changed,
        stopped_early = session.report.stopped_early,
        "walked virtualized list"
    );
    session.report
}
