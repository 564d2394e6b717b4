use std::iter;
use std::time::Duration;

use tracing::{debug, trace};

use crate::config::{ExpandConfig, ListConfig};
use crate::dom::{Clock, Dom, MutationWatch};
use crate::identity::item_ancestor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    /// No mutation for a full quiet period.
    Quiet,
    /// Mutations kept arriving until the maximum wait elapsed.
    TimedOut,
}

/// Heuristics for finding and preparing the calendar list inside the host page.
#[derive(Debug, Clone)]
pub struct ListWalker {
    list: ListConfig,
    expand: ExpandConfig,
}

impl ListWalker {
    pub fn new(list: ListConfig, expand: ExpandConfig) -> Self {
        Self { list, expand }
    }

    pub fn checkbox_selector(&self) -> &str {
        &self.list.checkbox_selector
    }

    /// First container selector that matches, else the document body.
    pub fn locate_container<D: Dom>(&self, dom: &D) -> Option<D::Node> {
        self.list
            .container_selectors
            .iter()
            .find_map(|selector| dom.query_selector(None, selector))
            .or_else(|| dom.body())
    }

    /// Opens collapsed calendar groups and waits for the list to settle.
    /// Returns the number of groups that were activated.
    #[tracing::instrument(skip_all)]
    pub async fn expand_collapsed_groups<D: Dom, C: Clock>(&self, dom: &D, clock: &C) -> usize {
        let Some(container) = self.locate_container(dom) else {
            return 0;
        };

        let toggles: Vec<D::Node> = dom
            .query_selector_all(Some(&container), &self.list.collapsed_selector)
            .into_iter()
            .filter(|toggle| self.is_group_toggle(dom, toggle))
            .collect();
        if toggles.is_empty() {
            return 0;
        }

        let watch = dom.observe_mutations(&container);
        for toggle in &toggles {
            dom.click(toggle);
        }
        let settle = self.wait_for_quiet(clock, &watch).await;
        debug!(expanded = toggles.len(), ?settle, "expanded calendar groups");
        toggles.len()
    }

    /// Polls the mutation counter until it stays unchanged for the quiet
    /// period, bounded by the maximum wait.
    pub async fn wait_for_quiet<C: Clock, W: MutationWatch>(&self, clock: &C, watch: &W) -> Settle {
        let poll = Duration::from_millis(self.expand.poll_ms.max(1));
        let quiet_for = Duration::from_millis(self.expand.quiet_ms);
        let max_wait = Duration::from_millis(self.expand.max_wait_ms);

        let mut seen = 0;
        let mut elapsed = Duration::ZERO;
        let mut quiet = Duration::ZERO;

        while elapsed < max_wait {
            clock.sleep(poll).await;
            elapsed += poll;

            let now = watch.mutations();
            if now == seen {
                quiet += poll;
                if quiet >= quiet_for {
                    return Settle::Quiet;
                }
            } else {
                trace!(mutations = now - seen, "list still changing");
                seen = now;
                quiet = Duration::ZERO;
            }
        }

        Settle::TimedOut
    }

    pub fn find_representative_checkbox<D: Dom>(&self, dom: &D) -> Option<D::Node> {
        dom.query_selector_all(None, &self.list.checkbox_selector)
            .into_iter()
            .find(|checkbox| self.is_eligible_checkbox(dom, checkbox))
    }

    /// Nearest ancestor that actually scrolls, stopping at the body.
    pub fn find_scrollable_ancestor<D: Dom>(&self, dom: &D, start: &D::Node) -> Option<D::Node> {
        let body = dom.body().map(|node| dom.identity(&node));

        iter::successors(dom.parent(start), |node| dom.parent(node))
            .take(self.list.scrollable_max_hops)
            .take_while(|node| Some(dom.identity(node)) != body)
            .find(|node| {
                dom.overflow_y(node).scrolls()
                    && dom.scroll_height(node)
                        > dom.client_height(node) + self.list.overflow_slack_px
            })
    }

    /// Shared by the read and write paths: a checkbox is a calendar toggle
    /// iff its row text is non-empty, short, and not a search field.
    pub fn is_eligible_checkbox<D: Dom>(&self, dom: &D, checkbox: &D::Node) -> bool {
        let Some(host) = item_ancestor(dom, checkbox, &self.list.item_selectors) else {
            return false;
        };
        let text = dom.text_content(&host);
        let text = text.trim();
        let len = text.chars().count();
        len > 0 && len < self.list.max_label_chars && !self.list.is_search_text(text)
    }

    fn is_group_toggle<D: Dom>(&self, dom: &D, toggle: &D::Node) -> bool {
        let label = dom.attribute(toggle, "aria-label").unwrap_or_default();
        let text = dom.text_content(toggle);
        let text = match text.trim() {
            "" => label.as_str(),
            trimmed => trimmed,
        };
        self.list.is_group_text(text) || self.list.is_group_text(&label)
    }
}
