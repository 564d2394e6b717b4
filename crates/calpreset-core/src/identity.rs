use std::iter;

use anyhow::Context;
use calpreset_shared::CalendarEntry;
use regex::Regex;

use crate::config::{EngineConfig, IdentityConfig};
use crate::dom::Dom;

pub const NAME_ID_PREFIX: &str = "name:";

/// Derives order-independent ids and display names for calendar checkboxes.
///
/// Two calendars with the same cleaned name and no identifying attribute
/// resolve to the same `name:` id; this is accepted.
#[derive(Debug, Clone)]
pub struct Identity {
    rules: IdentityConfig,
    item_selectors: Vec<String>,
    chrome: Vec<Regex>,
    whitespace: Regex,
}

impl Identity {
    pub fn new(cfg: &EngineConfig) -> anyhow::Result<Self> {
        let chrome = cfg
            .identity
            .chrome_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .with_context(|| format!("invalid name cleanup pattern {pattern:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Self {
            rules: cfg.identity.clone(),
            item_selectors: cfg.list.item_selectors.clone(),
            chrome,
            whitespace: Regex::new(r"\s+").context("invalid whitespace pattern")?,
        })
    }

    pub fn resolve_entry<D: Dom>(&self, dom: &D, checkbox: &D::Node) -> CalendarEntry {
        CalendarEntry {
            id: self.resolve_id(dom, checkbox),
            name: self.resolve_name(dom, checkbox),
        }
    }

    pub fn resolve_id<D: Dom>(&self, dom: &D, checkbox: &D::Node) -> String {
        let found = iter::successors(Some(checkbox.clone()), |node| dom.parent(node))
            .take(self.rules.max_depth)
            .find_map(|node| self.id_at(dom, &node));

        match found {
            Some(id) => id,
            None => format!("{NAME_ID_PREFIX}{}", self.resolve_name(dom, checkbox)),
        }
    }

    pub fn resolve_name<D: Dom>(&self, dom: &D, checkbox: &D::Node) -> String {
        let host = item_ancestor(dom, checkbox, &self.item_selectors);

        if let Some(label) = host
            .as_ref()
            .and_then(|node| dom.attribute(node, "aria-label"))
            && within(&label, self.rules.aria_label_max_chars)
        {
            return self.clean_name(&label);
        }

        if let Some(next) = dom.next_element_sibling(checkbox) {
            let text = dom.text_content(&next);
            let text = text.trim();
            if within(text, self.rules.sibling_label_max_chars) {
                return self.clean_name(text);
            }
        }

        let text = host.map(|node| dom.text_content(&node)).unwrap_or_default();
        self.clean_name(text.trim())
    }

    /// Strips menu and subscription chrome from a label and collapses
    /// whitespace.
    pub fn clean_name(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }

        let mut name = raw.to_string();
        for pattern in &self.chrome {
            name = pattern.replace_all(&name, " ").into_owned();
        }
        let name = self.whitespace.replace_all(&name, " ").trim().to_string();
        if !name.is_empty() {
            return name;
        }

        match raw.split(char::is_whitespace).next() {
            Some(token) if !token.is_empty() => token.to_string(),
            _ => raw.chars().take(self.rules.fallback_prefix_chars).collect(),
        }
    }

    fn id_at<D: Dom>(&self, dom: &D, node: &D::Node) -> Option<String> {
        let strong = self
            .rules
            .candidate_attributes
            .iter()
            .filter_map(|name| dom.attribute(node, name))
            .find(|value| self.is_strong(value));

        strong.or_else(|| {
            dom.attribute(node, &self.rules.generic_attribute)
                .filter(|value| value.chars().count() >= self.rules.generic_min_chars)
        })
    }

    fn is_strong(&self, value: &str) -> bool {
        !value.is_empty()
            && self
                .rules
                .strong_markers
                .iter()
                .any(|marker| value.contains(marker.as_str()))
    }
}

/// Nearest ancestor that carries a calendar row's text, falling back to the
/// direct parent.
pub fn item_ancestor<D: Dom>(dom: &D, node: &D::Node, selectors: &[String]) -> Option<D::Node> {
    selectors
        .iter()
        .find_map(|selector| dom.closest(node, selector))
        .or_else(|| dom.parent(node))
}

fn within(text: &str, max_chars: usize) -> bool {
    let len = text.chars().count();
    len > 0 && len < max_chars
}
