use std::collections::HashSet;

use calpreset_shared::{CalendarState, ViewType};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::dom::{Clock, Dom};
use crate::guard::WalkGuard;
use crate::identity::Identity;
use crate::walk::{WalkOutcome, walk_list};
use crate::walker::ListWalker;

/// Events dispatched after a checkbox is flipped so the host page's own
/// listeners see the change.
const TOGGLE_EVENTS: [&str; 3] = ["change", "input", "click"];

/// Reads and rewrites the checked calendars of one host page.
pub struct CalendarEngine<D, C> {
    dom: D,
    clock: C,
    config: EngineConfig,
    identity: Identity,
    walker: ListWalker,
    guard: WalkGuard,
}

impl<D: Dom, C: Clock> CalendarEngine<D, C> {
    pub fn new(dom: D, clock: C, config: EngineConfig) -> anyhow::Result<Self> {
        let identity = Identity::new(&config)?;
        let walker = ListWalker::new(config.list.clone(), config.expand.clone());
        Ok(Self {
            dom,
            clock,
            config,
            identity,
            walker,
            guard: WalkGuard::default(),
        })
    }

    pub fn dom(&self) -> &D {
        &self.dom
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn walker(&self) -> &ListWalker {
        &self.walker
    }

    pub fn is_busy(&self) -> bool {
        self.guard.is_busy()
    }

    pub fn current_view_type(&self) -> Option<ViewType> {
        ViewType::from_url(&self.dom.location_href(), &self.config.transition.url_marker)
    }

    /// Ids of every checked calendar plus the page's view type. `None` when
    /// another walk is running.
    #[tracing::instrument(skip_all)]
    pub async fn current_state(&self) -> Option<CalendarState> {
        let _permit = self.guard.try_acquire()?;
        self.walker.expand_collapsed_groups(&self.dom, &self.clock).await;

        let mut calendars = Vec::new();
        walk_list(&self.walker, &self.config.scroll, &self.dom, &self.clock, |checkbox| {
            if self.dom.is_checked(checkbox) {
                let entry = self.identity.resolve_entry(&self.dom, checkbox);
                if !entry.id.is_empty() && !entry.name.is_empty() {
                    calendars.push(entry.id);
                }
            }
            false
        })
        .await;

        let view_type = self.current_view_type();
        info!(checked = calendars.len(), ?view_type, "read calendar state");
        Some(CalendarState {
            calendars,
            view_type,
        })
    }

    /// Checks exactly the calendars whose id is in `target`.
    #[tracing::instrument(skip_all, fields(targets = target.len()))]
    pub async fn apply_preset(&self, target: &HashSet<String>) -> WalkOutcome {
        self.guarded_walk(|checkbox| {
            let wanted = target.contains(&self.identity.resolve_id(&self.dom, checkbox));
            self.set_checkbox(checkbox, wanted)
        })
        .await
    }

    #[tracing::instrument(skip_all)]
    pub async fn select_all(&self) -> WalkOutcome {
        self.guarded_walk(|checkbox| self.set_checkbox(checkbox, true))
            .await
    }

    /// Unchecks every calendar. With `include_primary == false` the first
    /// eligible checkbox of the walk is left alone.
    #[tracing::instrument(skip_all, fields(include_primary = include_primary))]
    pub async fn deselect_all(&self, include_primary: bool) -> WalkOutcome {
        let mut primary = None;
        self.guarded_walk(|checkbox| {
            let id = self.dom.identity(checkbox);
            let is_primary = *primary.get_or_insert(id) == id;
            if is_primary && !include_primary {
                return false;
            }
            self.set_checkbox(checkbox, false)
        })
        .await
    }

    async fn guarded_walk<F>(&self, action: F) -> WalkOutcome
    where
        F: FnMut(&D::Node) -> bool,
    {
        let Some(_permit) = self.guard.try_acquire() else {
            debug!("walk already in progress; skipping");
            return WalkOutcome::Skipped;
        };
        self.walker.expand_collapsed_groups(&self.dom, &self.clock).await;
        let report = walk_list(&self.walker, &self.config.scroll, &self.dom, &self.clock, action).await;
        info!(
            processed = report.processed,
            changed = report.changed,
            "updated calendar checkboxes"
        );
        WalkOutcome::Completed(report)
    }

    fn set_checkbox(&self, checkbox: &D::Node, checked: bool) -> bool {
        if self.dom.is_checked(checkbox) == checked {
            return false;
        }
        self.dom.set_checked(checkbox, checked);
        for event in TOGGLE_EVENTS {
            self.dom.dispatch(checkbox, event);
        }
        true
    }
}
