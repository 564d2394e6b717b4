//! Host seams for the page the engine walks.
//!
//! Every DOM operation is infallible: markup of the host page is not
//! contractually stable, so a missing element or attribute is reported as
//! `None`/empty and handled as "no such item" by the callers.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identity of one DOM node for the lifetime of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overflow {
    Visible,
    Hidden,
    Auto,
    Scroll,
}

impl Overflow {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "auto" => Overflow::Auto,
            "scroll" => Overflow::Scroll,
            "hidden" | "clip" => Overflow::Hidden,
            _ => Overflow::Visible,
        }
    }

    pub fn scrolls(self) -> bool {
        matches!(self, Overflow::Auto | Overflow::Scroll)
    }
}

/// Counter of DOM mutations observed under one root since the watch was
/// created. Observation stops when the watch is dropped.
pub trait MutationWatch {
    fn mutations(&self) -> u64;
}

pub trait Dom {
    type Node: Clone;
    type Watch: MutationWatch;

    fn identity(&self, node: &Self::Node) -> NodeId;
    fn body(&self) -> Option<Self::Node>;

    /// `scope == None` queries the whole document.
    fn query_selector(&self, scope: Option<&Self::Node>, selector: &str) -> Option<Self::Node>;
    fn query_selector_all(&self, scope: Option<&Self::Node>, selector: &str) -> Vec<Self::Node>;

    fn closest(&self, node: &Self::Node, selector: &str) -> Option<Self::Node>;
    fn parent(&self, node: &Self::Node) -> Option<Self::Node>;
    fn next_element_sibling(&self, node: &Self::Node) -> Option<Self::Node>;
    fn attribute(&self, node: &Self::Node, name: &str) -> Option<String>;
    fn text_content(&self, node: &Self::Node) -> String;

    fn is_checked(&self, node: &Self::Node) -> bool;
    fn set_checked(&self, node: &Self::Node, checked: bool);
    /// Dispatches a bubbling, cancelable event of the given type.
    fn dispatch(&self, node: &Self::Node, event: &str);
    fn click(&self, node: &Self::Node);

    fn scroll_top(&self, node: &Self::Node) -> i32;
    fn set_scroll_top(&self, node: &Self::Node, top: i32);
    fn scroll_height(&self, node: &Self::Node) -> i32;
    fn client_height(&self, node: &Self::Node) -> i32;
    fn overflow_y(&self, node: &Self::Node) -> Overflow;

    fn location_href(&self) -> String;
    fn observe_mutations(&self, root: &Self::Node) -> Self::Watch;

    fn same_node(&self, a: &Self::Node, b: &Self::Node) -> bool {
        self.identity(a) == self.identity(b)
    }
}

#[allow(async_fn_in_trait)]
pub trait Clock {
    async fn sleep(&self, duration: Duration);
    fn now(&self) -> DateTime<Utc>;
}
