#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::Duration;

use anyhow::anyhow;
use calpreset_core::dom::{Clock, Dom, MutationWatch, NodeId, Overflow};
use calpreset_core::messages;
use calpreset_core::panel::SidePanel;
use calpreset_core::presets::KeyValueStore;
use calpreset_core::transition::{LoadStatus, TabSnapshot, Tabs};
use calpreset_core::{CalendarEngine, EngineConfig};
use calpreset_shared::{Request, Response, TabId, WindowId};
use chrono::{DateTime, TimeZone, Utc};
use futures::future::LocalBoxFuture;
use serde_json::Value;

pub const ROW_HEIGHT: i32 = 40;
pub const VIEWPORT: i32 = 300;
pub const MONTH_URL: &str = "https://calendar.google.com/calendar/u/0/r/month";
pub const WEEK_URL: &str = "https://calendar.google.com/calendar/u/0/r/week";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config() -> EngineConfig {
    EngineConfig::builtin().expect("builtin config")
}

pub type FakeEngine = CalendarEngine<FakeDom, FakeClock>;

pub fn engine(dom: &FakeDom, clock: &FakeClock) -> FakeEngine {
    CalendarEngine::new(dom.clone(), clock.clone(), config()).expect("engine")
}

// ---------------------------------------------------------------------------
// Clock

/// Virtual time; every sleep advances it and yields to the executor.
#[derive(Clone, Default)]
pub struct FakeClock {
    elapsed_ms: Rc<Cell<u64>>,
    sleeps: Rc<Cell<u32>>,
}

impl FakeClock {
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.get())
    }

    pub fn advance(&self, ms: u64) {
        self.elapsed_ms.set(self.elapsed_ms.get() + ms);
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps.get()
    }
}

impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
        self.sleeps.set(self.sleeps.get() + 1);
        tokio::task::yield_now().await;
    }

    fn now(&self) -> DateTime<Utc> {
        let base = Utc
            .with_ymd_and_hms(2026, 10, 14, 9, 0, 0)
            .single()
            .expect("valid base time");
        base + chrono::Duration::milliseconds(self.elapsed_ms.get() as i64)
    }
}

// ---------------------------------------------------------------------------
// DOM

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct El(usize);

#[derive(Debug, Clone)]
pub struct Row {
    name: String,
    label: String,
    attrs: Vec<(String, String)>,
    checked: bool,
}

impl Row {
    /// Row whose `li` carries `data-id`.
    pub fn email(id: &str, name: &str, checked: bool) -> Self {
        Self::with_attr("data-id", id, name, checked)
    }

    pub fn with_attr(attr: &str, value: &str, name: &str, checked: bool) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            attrs: vec![(attr.to_string(), value.to_string())],
            checked,
        }
    }

    /// Row with no identifying attribute; its label text may carry chrome.
    pub fn plain(label: &str, checked: bool) -> Self {
        Self {
            name: label.to_string(),
            label: label.to_string(),
            attrs: vec![],
            checked,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aria(mut self, label: &str) -> Self {
        self.attrs.push(("aria-label".to_string(), label.to_string()));
        self
    }
}

#[derive(Debug, Clone)]
struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<usize>,
    parent: Option<usize>,
    row: Option<usize>,
    overflow: Overflow,
}

impl Element {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            attrs: BTreeMap::new(),
            text: String::new(),
            children: vec![],
            parent: None,
            row: None,
            overflow: Overflow::Visible,
        }
    }

    fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    fn matches(&self, selector: &str) -> bool {
        let (head, attr) = match selector.find('[') {
            Some(at) => (&selector[..at], Some(selector[at + 1..].trim_end_matches(']'))),
            None => (selector, None),
        };
        let head_ok = match head.strip_prefix('.') {
            Some(class) => self
                .attrs
                .get("class")
                .is_some_and(|classes| classes.split_whitespace().any(|c| c == class)),
            None => head.is_empty() || self.tag == head,
        };
        let attr_ok = match attr {
            None => true,
            Some(spec) => match spec.split_once('=') {
                Some((name, value)) => self.attrs.get(name).is_some_and(|v| v == value.trim_matches('"')),
                None => self.attrs.contains_key(spec),
            },
        };
        head_ok && attr_ok
    }
}

struct Page {
    elements: Vec<Element>,
    body: usize,
    scroller: usize,
    toggle: Option<usize>,
    rows: Vec<Row>,
    hidden: Vec<Row>,
    rendered: BTreeMap<usize, usize>,
    virtualized: bool,
    renderable: Option<usize>,
    scroll_top: i32,
    scroll_calls: u32,
    mutations: u64,
    location: String,
    events: Vec<(String, String)>,
    clicks: u32,
}

impl Page {
    fn push(&mut self, parent: Option<usize>, element: Element) -> usize {
        let index = self.elements.len();
        self.elements.push(Element { parent, ..element });
        if let Some(parent) = parent {
            self.elements[parent].children.push(index);
        }
        index
    }

    fn scroll_height(&self) -> i32 {
        self.rows.len() as i32 * ROW_HEIGHT
    }

    fn window(&self) -> (usize, usize) {
        if !self.virtualized {
            return (0, self.rows.len());
        }
        let first = (self.scroll_top / ROW_HEIGHT) as usize;
        let end = ((self.scroll_top + VIEWPORT) / ROW_HEIGHT) as usize + 1;
        (first, end.min(self.rows.len()))
    }

    fn render(&mut self) {
        let (first, end) = self.window();
        let limit = self.renderable.unwrap_or(usize::MAX);

        let stale: Vec<usize> = self
            .rendered
            .keys()
            .copied()
            .filter(|row| *row < first || *row >= end)
            .collect();
        for row in stale {
            if let Some(li) = self.rendered.remove(&row) {
                self.elements[li].parent = None;
                self.mutations += 1;
            }
        }

        for row in first..end.min(limit) {
            if self.rendered.contains_key(&row) {
                continue;
            }
            let spec = self.rows[row].clone();
            let mut li = Element::new("li");
            for (name, value) in &spec.attrs {
                li = li.attr(name, value);
            }
            let li = self.push(None, li);
            self.elements[li].parent = Some(self.scroller);
            let checkbox = self.push(Some(li), Element::new("input").attr("type", "checkbox"));
            self.elements[checkbox].row = Some(row);
            self.push(Some(li), Element::new("span").text(&spec.label));
            self.rendered.insert(row, li);
            self.mutations += 1;
        }

        self.elements[self.scroller].children = self.rendered.values().copied().collect();
    }

    fn descendants(&self, root: usize, out: &mut Vec<usize>) {
        for child in &self.elements[root].children {
            out.push(*child);
            self.descendants(*child, out);
        }
    }

    fn text_of(&self, index: usize) -> String {
        let mut text = self.elements[index].text.clone();
        for child in &self.elements[index].children {
            text.push_str(&self.text_of(*child));
        }
        text
    }

    fn click(&mut self, index: usize) {
        self.clicks += 1;
        if Some(index) == self.toggle && !self.hidden.is_empty() {
            let hidden = std::mem::take(&mut self.hidden);
            self.rows.extend(hidden);
            self.elements[index].attrs.insert("aria-expanded".to_string(), "true".to_string());
            self.mutations += 1;
            self.render();
        }
    }
}

pub struct PageBuilder {
    rows: Vec<Row>,
    hidden: Vec<Row>,
    virtualized: bool,
    renderable: Option<usize>,
    location: String,
    search_field: bool,
}

impl PageBuilder {
    pub fn row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn rows(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        self.rows.extend(rows);
        self
    }

    /// Rows behind a collapsed "Other calendars" group.
    pub fn collapsed(mut self, rows: impl IntoIterator<Item = Row>) -> Self {
        self.hidden.extend(rows);
        self
    }

    /// Render every row at once in a non-scrolling list.
    pub fn flat(mut self) -> Self {
        self.virtualized = false;
        self
    }

    /// Only the first `count` rows ever render, whatever the scroll offset.
    pub fn renderable(mut self, count: usize) -> Self {
        self.renderable = Some(count);
        self
    }

    pub fn location(mut self, url: &str) -> Self {
        self.location = url.to_string();
        self
    }

    pub fn without_search_field(mut self) -> Self {
        self.search_field = false;
        self
    }

    pub fn build(self) -> FakeDom {
        let mut page = Page {
            elements: vec![],
            body: 0,
            scroller: 0,
            toggle: None,
            rows: self.rows,
            hidden: self.hidden,
            rendered: BTreeMap::new(),
            virtualized: self.virtualized,
            renderable: self.renderable,
            scroll_top: 0,
            scroll_calls: 0,
            mutations: 0,
            location: self.location,
            events: vec![],
            clicks: 0,
        };

        let body = page.push(None, Element::new("body"));
        if self.search_field {
            let search = page.push(Some(body), Element::new("div").text("Search for people"));
            page.push(Some(search), Element::new("input").attr("type", "checkbox"));
        }
        let nav = page.push(Some(body), Element::new("div").attr("role", "navigation"));
        if !page.hidden.is_empty() {
            let toggle = page.push(
                Some(nav),
                Element::new("div")
                    .attr("aria-expanded", "false")
                    .text("Other calendars"),
            );
            page.toggle = Some(toggle);
        }
        let mut scroller = Element::new("div").attr("class", "scroller");
        if self.virtualized {
            scroller.overflow = Overflow::Auto;
        }
        let scroller = page.push(Some(nav), scroller);

        page.body = body;
        page.scroller = scroller;
        page.render();
        page.mutations = 0;

        FakeDom(Rc::new(RefCell::new(page)))
    }
}

/// Simulated calendar sidebar: a search field, a navigation landmark and a
/// windowed list that materializes rows as it scrolls.
#[derive(Clone)]
pub struct FakeDom(Rc<RefCell<Page>>);

impl FakeDom {
    pub fn builder() -> PageBuilder {
        PageBuilder {
            rows: vec![],
            hidden: vec![],
            virtualized: true,
            renderable: None,
            location: MONTH_URL.to_string(),
            search_field: true,
        }
    }

    /// Names of checked rows, including rows not currently rendered.
    pub fn checked_names(&self) -> Vec<String> {
        let page = self.0.borrow();
        page.rows
            .iter()
            .filter(|row| row.checked)
            .map(|row| row.name.clone())
            .collect()
    }

    pub fn events_for(&self, name: &str) -> Vec<String> {
        self.0
            .borrow()
            .events
            .iter()
            .filter(|(row, _)| row == name)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.0.borrow().events.len()
    }

    pub fn scroll_position(&self) -> i32 {
        self.0.borrow().scroll_top
    }

    pub fn scroll_to(&self, top: i32) {
        let mut page = self.0.borrow_mut();
        page.scroll_top = top;
        page.render();
    }

    pub fn scroll_calls(&self) -> u32 {
        self.0.borrow().scroll_calls
    }

    pub fn clicks(&self) -> u32 {
        self.0.borrow().clicks
    }

    pub fn set_location(&self, url: &str) {
        self.0.borrow_mut().location = url.to_string();
    }

    pub fn row_count(&self) -> usize {
        self.0.borrow().rows.len()
    }

    /// Rendered row checkbox for a calendar name.
    pub fn checkbox_for(&self, name: &str) -> Option<El> {
        let page = self.0.borrow();
        let row = page.rows.iter().position(|row| row.name == name)?;
        let li = page.rendered.get(&row)?;
        page.elements[*li]
            .children
            .iter()
            .copied()
            .find(|child| page.elements[*child].tag == "input")
            .map(El)
    }

    /// Simulates the user toggling a checkbox directly.
    pub fn user_set(&self, name: &str, checked: bool) {
        let mut page = self.0.borrow_mut();
        if let Some(row) = page.rows.iter_mut().find(|row| row.name == name) {
            row.checked = checked;
        }
    }
}

pub struct FakeWatch {
    page: Rc<RefCell<Page>>,
    base: u64,
}

impl MutationWatch for FakeWatch {
    fn mutations(&self) -> u64 {
        self.page.borrow().mutations - self.base
    }
}

impl Dom for FakeDom {
    type Node = El;
    type Watch = FakeWatch;

    fn identity(&self, node: &El) -> NodeId {
        NodeId(node.0 as u64)
    }

    fn body(&self) -> Option<El> {
        Some(El(self.0.borrow().body))
    }

    fn query_selector(&self, scope: Option<&El>, selector: &str) -> Option<El> {
        self.query_selector_all(scope, selector).into_iter().next()
    }

    fn query_selector_all(&self, scope: Option<&El>, selector: &str) -> Vec<El> {
        let page = self.0.borrow();
        let mut nodes = vec![];
        match scope {
            Some(root) => page.descendants(root.0, &mut nodes),
            None => {
                nodes.push(page.body);
                page.descendants(page.body, &mut nodes);
            }
        }
        nodes
            .into_iter()
            .filter(|index| page.elements[*index].matches(selector))
            .map(El)
            .collect()
    }

    fn closest(&self, node: &El, selector: &str) -> Option<El> {
        let page = self.0.borrow();
        let mut current = Some(node.0);
        while let Some(index) = current {
            if page.elements[index].matches(selector) {
                return Some(El(index));
            }
            current = page.elements[index].parent;
        }
        None
    }

    fn parent(&self, node: &El) -> Option<El> {
        self.0.borrow().elements[node.0].parent.map(El)
    }

    fn next_element_sibling(&self, node: &El) -> Option<El> {
        let page = self.0.borrow();
        let parent = page.elements[node.0].parent?;
        let siblings = &page.elements[parent].children;
        let at = siblings.iter().position(|child| *child == node.0)?;
        siblings.get(at + 1).copied().map(El)
    }

    fn attribute(&self, node: &El, name: &str) -> Option<String> {
        self.0.borrow().elements[node.0].attrs.get(name).cloned()
    }

    fn text_content(&self, node: &El) -> String {
        self.0.borrow().text_of(node.0)
    }

    fn is_checked(&self, node: &El) -> bool {
        let page = self.0.borrow();
        page.elements[node.0]
            .row
            .is_some_and(|row| page.rows[row].checked)
    }

    fn set_checked(&self, node: &El, checked: bool) {
        let mut page = self.0.borrow_mut();
        if let Some(row) = page.elements[node.0].row {
            page.rows[row].checked = checked;
        }
    }

    fn dispatch(&self, node: &El, event: &str) {
        let mut page = self.0.borrow_mut();
        let name = page.elements[node.0]
            .row
            .map(|row| page.rows[row].name.clone())
            .unwrap_or_default();
        page.events.push((name, event.to_string()));
    }

    fn click(&self, node: &El) {
        self.0.borrow_mut().click(node.0);
    }

    fn scroll_top(&self, node: &El) -> i32 {
        let page = self.0.borrow();
        if node.0 == page.scroller { page.scroll_top } else { 0 }
    }

    fn set_scroll_top(&self, node: &El, top: i32) {
        let mut page = self.0.borrow_mut();
        if node.0 != page.scroller {
            return;
        }
        let max = (page.scroll_height() - VIEWPORT).max(0);
        page.scroll_top = top.clamp(0, max);
        page.scroll_calls += 1;
        page.render();
    }

    fn scroll_height(&self, node: &El) -> i32 {
        let page = self.0.borrow();
        if node.0 == page.scroller { page.scroll_height() } else { 0 }
    }

    fn client_height(&self, node: &El) -> i32 {
        let page = self.0.borrow();
        if node.0 == page.scroller { VIEWPORT } else { 0 }
    }

    fn overflow_y(&self, node: &El) -> Overflow {
        self.0.borrow().elements[node.0].overflow
    }

    fn location_href(&self) -> String {
        self.0.borrow().location.clone()
    }

    fn observe_mutations(&self, _root: &El) -> FakeWatch {
        FakeWatch {
            page: Rc::clone(&self.0),
            base: self.0.borrow().mutations,
        }
    }
}

// ---------------------------------------------------------------------------
// Tabs

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavScript {
    /// The leave-page prompt is dismissed: URL stays, tab stays complete.
    Declined,
    /// The URL commits on the given poll; `load_event` says whether the
    /// load-complete notification fires.
    Commits { after_polls: u32, load_event: bool },
    /// The URL commits and later reverts before the final check.
    Reverts { after_polls: u32 },
    /// The tab starts loading and never reaches the target URL.
    Stalls,
    /// `navigate` itself rejects.
    Rejects,
}

struct TabState {
    snapshot: TabSnapshot,
    pending: Option<String>,
    polls: u32,
}

pub struct FakeTabs {
    state: RefCell<TabState>,
    script: NavScript,
    engine: Rc<FakeEngine>,
    sent: RefCell<Vec<Request>>,
    navigations: RefCell<Vec<String>>,
    offline: Cell<bool>,
}

impl FakeTabs {
    pub fn new(engine: Rc<FakeEngine>, script: NavScript) -> Self {
        let url = engine.dom().location_href();
        Self {
            state: RefCell::new(TabState {
                snapshot: TabSnapshot {
                    id: 7,
                    window_id: 1,
                    url,
                    status: LoadStatus::Complete,
                },
                pending: None,
                polls: 0,
            }),
            script,
            engine,
            sent: RefCell::new(vec![]),
            navigations: RefCell::new(vec![]),
            offline: Cell::new(false),
        }
    }

    pub fn snapshot(&self) -> TabSnapshot {
        self.state.borrow().snapshot.clone()
    }

    pub fn polls(&self) -> u32 {
        self.state.borrow().polls
    }

    pub fn sent(&self) -> Vec<Request> {
        self.sent.borrow().clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.borrow().clone()
    }

    /// Makes every subsequent `send` reject, as when the page stops listening.
    pub fn go_offline(&self) {
        self.offline.set(true);
    }

    fn commit(&self, state: &mut TabState) {
        if let Some(url) = state.pending.take() {
            self.engine.dom().set_location(&url);
            state.snapshot.url = url;
            state.snapshot.status = LoadStatus::Complete;
        }
    }
}

impl Tabs for FakeTabs {
    async fn active_tab(&self) -> anyhow::Result<Option<TabSnapshot>> {
        Ok(Some(self.snapshot()))
    }

    async fn get(&self, tab: TabId) -> anyhow::Result<TabSnapshot> {
        let mut state = self.state.borrow_mut();
        if tab != state.snapshot.id {
            return Err(anyhow!("no tab with id {tab}"));
        }
        state.polls += 1;
        match self.script {
            NavScript::Commits { after_polls, .. } | NavScript::Reverts { after_polls }
                if state.pending.is_some() && state.polls >= after_polls =>
            {
                self.commit(&mut state);
            }
            NavScript::Reverts { after_polls }
                if state.pending.is_none() && state.polls > after_polls =>
            {
                state.snapshot.url = MONTH_URL.to_string();
                self.engine.dom().set_location(MONTH_URL);
            }
            _ => {}
        }
        Ok(state.snapshot.clone())
    }

    async fn navigate(&self, _tab: TabId, url: &str) -> anyhow::Result<()> {
        self.navigations.borrow_mut().push(url.to_string());
        if self.script == NavScript::Rejects {
            return Err(anyhow!("tab was closed"));
        }
        let mut state = self.state.borrow_mut();
        state.polls = 0;
        if self.script != NavScript::Declined {
            state.pending = Some(url.to_string());
            state.snapshot.status = LoadStatus::Loading;
        }
        Ok(())
    }

    async fn load_complete(&self, _tab: TabId) -> anyhow::Result<()> {
        match self.script {
            NavScript::Commits { load_event: true, .. } | NavScript::Reverts { .. } => {
                let mut state = self.state.borrow_mut();
                self.commit(&mut state);
                Ok(())
            }
            _ => std::future::pending().await,
        }
    }

    async fn send(&self, _tab: TabId, request: &Request) -> anyhow::Result<Response> {
        if self.offline.get() {
            return Err(anyhow!("Could not establish connection. Receiving end does not exist."));
        }
        self.sent.borrow_mut().push(request.clone());
        Ok(messages::dispatch(&*self.engine, request.clone()).await)
    }
}

// ---------------------------------------------------------------------------
// Storage and side panel

#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn with(key: &str, value: Value) -> Self {
        let store = Self::default();
        store.values.borrow_mut().insert(key.to_string(), value);
        store
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }
}

impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()> {
        self.values.borrow_mut().insert(key.to_string(), value);
        Ok(())
    }
}

/// Records each platform call when it is issued, before the returned
/// future is polled.
#[derive(Default)]
pub struct FakePanel {
    calls: Rc<RefCell<Vec<(&'static str, WindowId)>>>,
    fail_open: Rc<Cell<bool>>,
}

impl FakePanel {
    pub fn calls(&self) -> Vec<(&'static str, WindowId)> {
        self.calls.borrow().clone()
    }

    pub fn fail_next_open(&self) {
        self.fail_open.set(true);
    }
}

impl SidePanel for FakePanel {
    fn open(&self, window: WindowId) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        self.calls.borrow_mut().push(("open", window));
        let fail = Rc::clone(&self.fail_open);
        Box::pin(async move {
            tokio::task::yield_now().await;
            if fail.replace(false) {
                return Err(anyhow!("no user gesture"));
            }
            Ok(())
        })
    }

    fn close(&self, window: WindowId) -> LocalBoxFuture<'static, anyhow::Result<()>> {
        self.calls.borrow_mut().push(("close", window));
        Box::pin(async {
            tokio::task::yield_now().await;
            Ok(())
        })
    }
}
