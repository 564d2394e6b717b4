use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

const BUILTIN: &str = include_str!("../config/defaults.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub scroll: ScrollConfig,
    pub list: ListConfig,
    pub expand: ExpandConfig,
    pub identity: IdentityConfig,
    pub transition: TransitionConfig,
    pub host: HostConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrollConfig {
    /// Fraction of the visible height advanced per step.
    pub step_ratio: f64,
    pub step_min_px: i32,
    pub step_delay_ms: u64,
    /// Consecutive steps without a new eligible checkbox before the walk stops.
    pub idle_step_limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListConfig {
    pub container_selectors: Vec<String>,
    pub checkbox_selector: String,
    pub collapsed_selector: String,
    /// Ancestors whose text labels a checkbox, nearest match wins in order.
    pub item_selectors: Vec<String>,
    pub group_keywords: Vec<String>,
    pub search_keywords: Vec<String>,
    pub max_label_chars: usize,
    pub scrollable_max_hops: usize,
    pub overflow_slack_px: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpandConfig {
    pub poll_ms: u64,
    pub quiet_ms: u64,
    pub max_wait_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub max_depth: usize,
    pub candidate_attributes: Vec<String>,
    pub strong_markers: Vec<String>,
    pub generic_attribute: String,
    pub generic_min_chars: usize,
    pub aria_label_max_chars: usize,
    pub sibling_label_max_chars: usize,
    pub fallback_prefix_chars: usize,
    pub chrome_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionConfig {
    pub url_marker: String,
    pub poll_interval_ms: u64,
    pub max_url_polls: u32,
    pub early_cancel_after: u32,
    pub load_timeout_ms: u64,
    pub post_timeout_polls: u32,
    pub settle_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub calendar_host: String,
    pub panel_min_interval_ms: i64,
    pub panel_path: String,
}

impl EngineConfig {
    pub fn builtin() -> anyhow::Result<Self> {
        toml::from_str(BUILTIN).context("built-in engine config is invalid")
    }

    /// Deep-merges a partial TOML document over the built-in config.
    #[tracing::instrument(skip_all)]
    pub fn with_overrides(text: &str) -> anyhow::Result<Self> {
        let mut base: toml::Table =
            toml::from_str(BUILTIN).context("built-in engine config is invalid")?;
        let overrides: toml::Table =
            toml::from_str(text).context("failed to parse config overrides")?;
        debug!(sections = overrides.len(), "merging config overrides");
        merge_tables(&mut base, overrides);
        toml::Value::Table(base)
            .try_into()
            .context("config overrides do not fit the engine config")
    }

    pub fn is_calendar_url(&self, url: &str) -> bool {
        url.contains(&self.host.calendar_host)
    }
}

impl ScrollConfig {
    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn step_for(&self, client_height: i32) -> i32 {
        let scaled = (f64::from(client_height) * self.step_ratio) as i32;
        scaled.max(self.step_min_px).max(1)
    }
}

impl ListConfig {
    pub fn is_search_text(&self, text: &str) -> bool {
        contains_any(text, &self.search_keywords)
    }

    pub fn is_group_text(&self, text: &str) -> bool {
        contains_any(text, &self.group_keywords)
    }
}

impl TransitionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Case-insensitive. ASCII keywords only match at the start of a word, so
/// "my" finds "My calendars" but not "Economy".
fn contains_any(text: &str, keywords: &[String]) -> bool {
    let text = text.to_lowercase();
    keywords.iter().filter(|keyword| !keyword.is_empty()).any(|keyword| {
        let keyword = keyword.to_lowercase();
        if !keyword.is_ascii() {
            return text.contains(&keyword);
        }
        text.match_indices(&keyword)
            .any(|(at, _)| text[..at].chars().next_back().is_none_or(|prev| !prev.is_alphanumeric()))
    })
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
