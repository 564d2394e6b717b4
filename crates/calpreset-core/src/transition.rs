use std::fmt;
use std::pin::pin;

use calpreset_shared::{Request, Response, TabId, ViewType, WindowId};
use futures::future::{Either, select};
use tracing::{debug, error, info, warn};

use crate::config::TransitionConfig;
use crate::dom::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Loading,
    Complete,
    Unknown,
}

impl LoadStatus {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("complete") => LoadStatus::Complete,
            Some("loading") => LoadStatus::Loading,
            _ => LoadStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSnapshot {
    pub id: TabId,
    pub window_id: WindowId,
    pub url: String,
    pub status: LoadStatus,
}

/// Tab and messaging surface of the extension platform. Every call can fail.
#[allow(async_fn_in_trait)]
pub trait Tabs {
    async fn active_tab(&self) -> anyhow::Result<Option<TabSnapshot>>;
    async fn get(&self, tab: TabId) -> anyhow::Result<TabSnapshot>;
    async fn navigate(&self, tab: TabId, url: &str) -> anyhow::Result<()>;
    /// Resolves on the next load-complete update of `tab`.
    async fn load_complete(&self, tab: TabId) -> anyhow::Result<()>;
    async fn send(&self, tab: TabId, request: &Request) -> anyhow::Result<Response>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionState {
    Idle,
    NavigationRequested,
    AwaitingUrlChange,
    AwaitingLoadComplete,
    Confirmed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The URL never picked up the target view; `early` when the tab was
    /// already idle on the old URL, i.e. the leave-page prompt was dismissed.
    UrlUnchanged { early: bool },
    /// The URL changed but no longer carries the target view after loading.
    NotConfirmed,
    Platform(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::UrlUnchanged { early: true } => write!(f, "navigation was declined"),
            CancelReason::UrlUnchanged { early: false } => write!(f, "page address did not change"),
            CancelReason::NotConfirmed => write!(f, "view change was not confirmed"),
            CancelReason::Platform(message) => write!(f, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    Confirmed,
    Cancelled(CancelReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    pub outcome: TransitionOutcome,
    pub history: Vec<TransitionState>,
    pub url_polls: u32,
}

impl TransitionReport {
    pub fn confirmed(&self) -> bool {
        self.outcome == TransitionOutcome::Confirmed
    }
}

/// `marker + token`, the segment whose presence proves the view switched.
pub fn view_token(marker: &str, view: ViewType) -> String {
    format!("{marker}{}", view.token())
}

/// Replaces everything after the first `marker` with the view token. `None`
/// when the URL has no marker.
pub fn rewrite_view_url(current: &str, marker: &str, view: ViewType) -> Option<String> {
    let (base, _) = current.split_once(marker)?;
    Some(format!("{base}{}", view_token(marker, view)))
}

/// Drives a same-tab navigation to another view and waits until it is
/// confirmed or can be treated as cancelled. Every wait is bounded.
pub struct PageTransition<'a, T, C> {
    tabs: &'a T,
    clock: &'a C,
    cfg: &'a TransitionConfig,
    history: Vec<TransitionState>,
    url_polls: u32,
}

impl<'a, T: Tabs, C: Clock> PageTransition<'a, T, C> {
    pub fn new(tabs: &'a T, clock: &'a C, cfg: &'a TransitionConfig) -> Self {
        Self {
            tabs,
            clock,
            cfg,
            history: vec![TransitionState::Idle],
            url_polls: 0,
        }
    }

    #[tracing::instrument(skip_all, fields(tab = tab.id, view = view.token()))]
    pub async fn run(mut self, tab: &TabSnapshot, target_url: &str, view: ViewType) -> TransitionReport {
        let token = view_token(&self.cfg.url_marker, view);
        let outcome = match self.drive(tab, target_url, &token).await {
            Ok(()) => {
                self.advance(TransitionState::Confirmed);
                info!(url = target_url, "view change confirmed");
                TransitionOutcome::Confirmed
            }
            Err(reason) => {
                self.advance(TransitionState::Cancelled);
                warn!(%reason, "view change cancelled");
                TransitionOutcome::Cancelled(reason)
            }
        };

        TransitionReport {
            outcome,
            history: self.history,
            url_polls: self.url_polls,
        }
    }

    async fn drive(&mut self, tab: &TabSnapshot, target_url: &str, token: &str) -> Result<(), CancelReason> {
        self.advance(TransitionState::NavigationRequested);
        self.tabs
            .navigate(tab.id, target_url)
            .await
            .map_err(platform("navigate"))?;

        self.advance(TransitionState::AwaitingUrlChange);
        self.await_url_change(tab, token).await?;

        self.advance(TransitionState::AwaitingLoadComplete);
        self.await_load_complete(tab.id, token).await?;

        let snapshot = self.tabs.get(tab.id).await.map_err(platform("final check"))?;
        if !snapshot.url.contains(token) {
            return Err(CancelReason::NotConfirmed);
        }
        Ok(())
    }

    async fn await_url_change(&mut self, tab: &TabSnapshot, token: &str) -> Result<(), CancelReason> {
        for attempt in 0..self.cfg.max_url_polls {
            self.clock.sleep(self.cfg.poll_interval()).await;
            self.url_polls += 1;

            let snapshot = self.tabs.get(tab.id).await.map_err(platform("poll url"))?;
            if snapshot.url.contains(token) {
                debug!(attempt, "url changed");
                return Ok(());
            }
            if attempt >= self.cfg.early_cancel_after
                && snapshot.url == tab.url
                && snapshot.status == LoadStatus::Complete
            {
                return Err(CancelReason::UrlUnchanged { early: true });
            }
        }
        Err(CancelReason::UrlUnchanged { early: false })
    }

    async fn await_load_complete(&mut self, tab: TabId, token: &str) -> Result<(), CancelReason> {
        let tabs = self.tabs;
        let clock = self.clock;

        let loaded = {
            let load = pin!(tabs.load_complete(tab));
            let timeout = pin!(clock.sleep(self.cfg.load_timeout()));
            match select(load, timeout).await {
                Either::Left((result, _)) => {
                    result.map_err(platform("await load"))?;
                    true
                }
                Either::Right(_) => false,
            }
        };
        if loaded {
            return Ok(());
        }

        debug!("load event timed out; polling");
        for _ in 0..self.cfg.post_timeout_polls {
            clock.sleep(self.cfg.poll_interval()).await;
            let snapshot = tabs.get(tab).await.map_err(platform("poll load"))?;
            if snapshot.url.contains(token) && snapshot.status == LoadStatus::Complete {
                break;
            }
        }
        Ok(())
    }

    fn advance(&mut self, next: TransitionState) {
        debug!(?next, "transition state");
        self.history.push(next);
    }
}

fn platform(step: &'static str) -> impl Fn(anyhow::Error) -> CancelReason {
    move |err| {
        error!(step, error = %err, "tab call failed during view change");
        CancelReason::Platform(format!("{step}: {err}"))
    }
}
