use std::collections::BTreeMap;

use anyhow::{Context, anyhow};
use calpreset_shared::{CalendarState, Preset, Request, Response, Settings, ViewType};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{error, info, instrument, warn};

use crate::config::EngineConfig;
use crate::dom::Clock;
use crate::transition::{PageTransition, TabSnapshot, Tabs, TransitionOutcome, rewrite_view_url};

pub const PRESETS_KEY: &str = "presets";
pub const SETTINGS_KEY: &str = "settings";
pub const INCLUDE_PRIMARY_KEY: &str = "includePrimary";
pub const DEFAULT_INCLUDE_PRIMARY: bool = false;
pub const MAX_PRESET_NAME_CHARS: usize = 100;

/// Persistent string-keyed storage of the extension.
#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// The single terminal message shown for a user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

const NOT_CALENDAR_TAB: &str = "Open Google Calendar in this tab first";
const NAME_REQUIRED: &str = "Enter a preset name";
const PRESET_MISSING: &str = "Preset not found";
const STATE_UNAVAILABLE: &str = "Could not read the calendar list";
const RELOAD_HINT: &str = "please reload the page";

/// Typed access to the stored presets, settings and bulk-deselect default.
#[derive(Debug, Clone)]
pub struct PresetStore<S> {
    store: S,
}

impl<S: KeyValueStore> PresetStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Presets keyed by id; each preset's `id` mirrors its key. Entries that
    /// fail to parse are skipped here and kept in storage by
    /// [`save_presets`](Self::save_presets).
    pub async fn load_presets(&self) -> anyhow::Result<BTreeMap<String, Preset>> {
        let mut presets = BTreeMap::new();
        for (id, raw) in self.raw_presets().await? {
            match serde_json::from_value::<Preset>(raw) {
                Ok(mut preset) => {
                    preset.id.clone_from(&id);
                    presets.insert(id, preset);
                }
                Err(err) => error!(id, error = %err, "skipping unreadable preset"),
            }
        }
        Ok(presets)
    }

    /// Replaces the readable presets with `presets`. Unreadable stored
    /// entries not named in `presets` are written back untouched.
    pub async fn save_presets(&self, presets: &BTreeMap<String, Preset>) -> anyhow::Result<()> {
        let mut merged: Map<String, Value> = self
            .raw_presets()
            .await?
            .into_iter()
            .filter(|(id, raw)| {
                !presets.contains_key(id) && serde_json::from_value::<Preset>(raw.clone()).is_err()
            })
            .collect();
        for (id, preset) in presets {
            let value = serde_json::to_value(preset).with_context(|| format!("failed to encode preset {id}"))?;
            merged.insert(id.clone(), value);
        }
        self.save(PRESETS_KEY, &merged).await
    }

    async fn raw_presets(&self) -> anyhow::Result<BTreeMap<String, Value>> {
        self.load_or_default(PRESETS_KEY).await
    }

    pub async fn load_settings(&self) -> anyhow::Result<Settings> {
        self.load_or_default(SETTINGS_KEY).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        self.save(SETTINGS_KEY, settings).await
    }

    pub async fn load_include_primary(&self) -> anyhow::Result<bool> {
        let stored = self.store.get(INCLUDE_PRIMARY_KEY).await?;
        Ok(stored.and_then(|value| value.as_bool()).unwrap_or(DEFAULT_INCLUDE_PRIMARY))
    }

    pub async fn save_include_primary(&self, include_primary: bool) -> anyhow::Result<()> {
        self.save(INCLUDE_PRIMARY_KEY, &include_primary).await
    }

    async fn load_or_default<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: DeserializeOwned + Default,
    {
        let Some(raw) = self
            .store
            .get(key)
            .await
            .with_context(|| format!("failed to read {key} from storage"))?
        else {
            return Ok(T::default());
        };

        match serde_json::from_value(raw) {
            Ok(value) => Ok(value),
            Err(err) => {
                error!(key, error = %err, "failed parsing stored value; using defaults");
                Ok(T::default())
            }
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value).with_context(|| format!("failed to encode {key}"))?;
        self.store
            .set(key, value)
            .await
            .with_context(|| format!("failed to write {key} to storage"))
    }
}

/// HTML-escapes a user supplied preset name and bounds its length.
pub fn sanitize_name(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.trim().chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            '/' => escaped.push_str("&#x2F;"),
            other => escaped.push(other),
        }
    }
    let bounded: String = escaped.chars().take(MAX_PRESET_NAME_CHARS).collect();
    bounded.trim().to_string()
}

/// Presets sorted for display: by `order`, then creation time.
pub fn sorted_presets(presets: &BTreeMap<String, Preset>) -> Vec<Preset> {
    let mut list: Vec<Preset> = presets.values().cloned().collect();
    list.sort_by(|a, b| {
        a.order
            .unwrap_or(i64::MAX)
            .cmp(&b.order.unwrap_or(i64::MAX))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    list
}

#[derive(Debug, Clone, Copy)]
struct ViewSwitches {
    save: bool,
    apply: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditContext {
    pub preset: Preset,
    pub current_view_type: Option<ViewType>,
}

/// Side-panel operations on presets. Each returns exactly one notice.
pub struct PresetService<S, T, C> {
    store: PresetStore<S>,
    tabs: T,
    clock: C,
    config: EngineConfig,
}

impl<S: KeyValueStore, T: Tabs, C: Clock> PresetService<S, T, C> {
    pub fn new(store: S, tabs: T, clock: C, config: EngineConfig) -> Self {
        Self {
            store: PresetStore::new(store),
            tabs,
            clock,
            config,
        }
    }

    pub fn store(&self) -> &PresetStore<S> {
        &self.store
    }

    pub fn tabs(&self) -> &T {
        &self.tabs
    }

    pub async fn list_presets(&self) -> anyhow::Result<Vec<Preset>> {
        Ok(sorted_presets(&self.store.load_presets().await?))
    }

    #[instrument(skip(self))]
    pub async fn save_preset(&self, raw_name: &str) -> Notice {
        let name = sanitize_name(raw_name);
        if name.is_empty() {
            return Notice::error(NAME_REQUIRED);
        }
        let Some(tab) = self.calendar_tab().await else {
            return Notice::error(NOT_CALENDAR_TAB);
        };

        match self.try_save(&tab, name).await {
            Ok(notice) => notice,
            Err(err) => {
                error!(error = %err, "saving preset failed");
                Notice::error(format!("Saving failed, {RELOAD_HINT}"))
            }
        }
    }

    async fn try_save(&self, tab: &TabSnapshot, name: String) -> anyhow::Result<Notice> {
        let settings = self.store.load_settings().await?;
        let Some(state) = self.read_state(tab).await? else {
            return Ok(Notice::error(STATE_UNAVAILABLE));
        };

        let mut presets = self.store.load_presets().await?;
        let now = self.clock.now();
        let id = now.timestamp_millis().to_string();
        let order = presets
            .values()
            .map(|preset| preset.order.unwrap_or(-1))
            .max()
            .unwrap_or(-1)
            + 1;

        let preset = Preset {
            id: id.clone(),
            name: name.clone(),
            calendars: state.calendars,
            view_type: state.view_type.filter(|_| settings.save_view_type_by_default),
            save_view_type: Some(settings.save_view_type_by_default),
            apply_view_type: Some(settings.apply_view_type_by_default),
            created_at: now,
            updated_at: None,
            order: Some(order),
        };
        info!(id, calendars = preset.calendars.len(), "saved preset");
        presets.insert(id, preset);
        self.store.save_presets(&presets).await?;

        Ok(Notice::success(format!("Saved preset \"{name}\"")))
    }

    /// Applies the preset's calendars without switching views and returns
    /// what the edit form needs.
    #[instrument(skip(self))]
    pub async fn begin_edit(&self, id: &str) -> Result<EditContext, Notice> {
        let Some(tab) = self.calendar_tab().await else {
            return Err(Notice::error(NOT_CALENDAR_TAB));
        };

        match self.try_begin_edit(&tab, id).await {
            Ok(Some(context)) => Ok(context),
            Ok(None) => Err(Notice::error(PRESET_MISSING)),
            Err(err) => {
                error!(error = %err, "starting preset edit failed");
                Err(Notice::error(format!("Editing failed, {RELOAD_HINT}")))
            }
        }
    }

    async fn try_begin_edit(&self, tab: &TabSnapshot, id: &str) -> anyhow::Result<Option<EditContext>> {
        let presets = self.store.load_presets().await?;
        let Some(preset) = presets.get(id).cloned() else {
            return Ok(None);
        };
        self.send_calendars(tab, &preset).await?;
        let current_view_type = self.read_state(tab).await?.and_then(|state| state.view_type);
        Ok(Some(EditContext {
            preset,
            current_view_type,
        }))
    }

    #[instrument(skip(self))]
    pub async fn update_preset(&self, id: &str, raw_name: &str, save_view_type: bool, apply_view_type: bool) -> Notice {
        let name = sanitize_name(raw_name);
        if name.is_empty() {
            return Notice::error(NAME_REQUIRED);
        }
        let Some(tab) = self.calendar_tab().await else {
            return Notice::error(NOT_CALENDAR_TAB);
        };

        let switches = ViewSwitches {
            save: save_view_type,
            apply: apply_view_type,
        };
        match self.try_update(&tab, id, name, switches).await {
            Ok(notice) => notice,
            Err(err) => {
                error!(error = %err, "updating preset failed");
                Notice::error("Updating failed")
            }
        }
    }

    async fn try_update(&self, tab: &TabSnapshot, id: &str, name: String, switches: ViewSwitches) -> anyhow::Result<Notice> {
        let Some(state) = self.read_state(tab).await? else {
            return Ok(Notice::error(STATE_UNAVAILABLE));
        };
        let mut presets = self.store.load_presets().await?;
        let Some(existing) = presets.get_mut(id) else {
            return Ok(Notice::error(PRESET_MISSING));
        };

        if switches.save {
            existing.view_type = state.view_type;
        }
        existing.name.clone_from(&name);
        existing.calendars = state.calendars;
        existing.save_view_type = Some(switches.save);
        existing.apply_view_type = Some(switches.apply);
        existing.updated_at = Some(self.clock.now());
        existing.order = Some(existing.order.unwrap_or(0));

        self.store.save_presets(&presets).await?;
        info!(id, "updated preset");
        Ok(Notice::success(format!("Updated preset \"{name}\"")))
    }

    /// Switches the view first when the preset asks for it, then applies the
    /// calendars. A declined navigation leaves the calendars untouched.
    #[instrument(skip(self))]
    pub async fn apply_preset(&self, id: &str) -> Notice {
        let Some(tab) = self.calendar_tab().await else {
            return Notice::error(NOT_CALENDAR_TAB);
        };

        match self.try_apply(&tab, id).await {
            Ok(notice) => notice,
            Err(err) => {
                error!(error = %err, "applying preset failed");
                Notice::error(format!("Applying failed, {RELOAD_HINT}"))
            }
        }
    }

    async fn try_apply(&self, tab: &TabSnapshot, id: &str) -> anyhow::Result<Notice> {
        let presets = self.store.load_presets().await?;
        let Some(preset) = presets.get(id) else {
            return Ok(Notice::error(PRESET_MISSING));
        };
        let settings = self.store.load_settings().await?;
        let apply_view = preset.apply_view_type.unwrap_or(settings.apply_view_type_by_default);

        if let Some(view) = preset.view_type.filter(|_| apply_view) {
            let marker = &self.config.transition.url_marker;
            if let Some(target_url) = rewrite_view_url(&tab.url, marker, view)
                && target_url != tab.url
            {
                let report = PageTransition::new(&self.tabs, &self.clock, &self.config.transition)
                    .run(tab, &target_url, view)
                    .await;
                if let TransitionOutcome::Cancelled(reason) = report.outcome {
                    warn!(%reason, "preset not applied");
                    return Ok(Notice::info("The view change was cancelled"));
                }
            }
            self.clock.sleep(self.config.transition.settle_delay()).await;
        }

        self.send_calendars(tab, preset).await?;
        info!(id, "applied preset");
        Ok(Notice::success(format!("Applied preset \"{}\"", preset.name)))
    }

    #[instrument(skip(self))]
    pub async fn delete_preset(&self, id: &str) -> Notice {
        match self.try_delete(id).await {
            Ok(Some(name)) => Notice::success(format!("Deleted preset \"{name}\"")),
            Ok(None) => Notice::error(PRESET_MISSING),
            Err(err) => {
                error!(error = %err, "deleting preset failed");
                Notice::error("Deleting failed")
            }
        }
    }

    async fn try_delete(&self, id: &str) -> anyhow::Result<Option<String>> {
        let mut presets = self.store.load_presets().await?;
        let Some(removed) = presets.remove(id) else {
            return Ok(None);
        };
        self.store.save_presets(&presets).await?;
        info!(id, "deleted preset");
        Ok(Some(removed.name))
    }

    /// Stores the display order given by `ids`; unknown ids are ignored.
    #[instrument(skip(self, ids), fields(count = ids.len()))]
    pub async fn reorder_presets(&self, ids: &[String]) -> anyhow::Result<()> {
        let mut presets = self.store.load_presets().await?;
        for (position, id) in ids.iter().enumerate() {
            if let Some(preset) = presets.get_mut(id) {
                preset.order = Some(i64::try_from(position)?);
            }
        }
        self.store.save_presets(&presets).await
    }

    #[instrument(skip(self))]
    pub async fn select_all(&self) -> Notice {
        self.bulk(Request::SelectAll, "Selected all calendars").await
    }

    #[instrument(skip(self))]
    pub async fn deselect_all(&self, include_primary: bool) -> Notice {
        if let Err(err) = self.store.save_include_primary(include_primary).await {
            warn!(error = %err, "could not remember include-primary choice");
        }
        self.bulk(Request::DeselectAll { include_primary }, "Deselected calendars")
            .await
    }

    pub async fn settings(&self) -> anyhow::Result<Settings> {
        self.store.load_settings().await
    }

    pub async fn update_settings(&self, settings: Settings) -> anyhow::Result<()> {
        self.store.save_settings(&settings).await
    }

    async fn bulk(&self, request: Request, done: &str) -> Notice {
        let Some(tab) = self.calendar_tab().await else {
            return Notice::error(NOT_CALENDAR_TAB);
        };
        match self.tabs.send(tab.id, &request).await {
            Ok(Response::Failed { error }) => {
                error!(error, "page rejected bulk request");
                Notice::error(error)
            }
            Ok(_) => Notice::success(done),
            Err(err) => {
                error!(error = %err, "bulk request failed");
                Notice::error(format!("Request failed, {RELOAD_HINT}"))
            }
        }
    }

    async fn calendar_tab(&self) -> Option<TabSnapshot> {
        match self.tabs.active_tab().await {
            Ok(Some(tab)) if self.config.is_calendar_url(&tab.url) => Some(tab),
            Ok(_) => None,
            Err(err) => {
                error!(error = %err, "could not query the active tab");
                None
            }
        }
    }

    async fn read_state(&self, tab: &TabSnapshot) -> anyhow::Result<Option<CalendarState>> {
        match self.tabs.send(tab.id, &Request::GetCurrentState).await? {
            Response::State(state) => Ok(Some(state)),
            Response::Failed { error } => {
                warn!(error, "page could not report its state");
                Ok(None)
            }
            Response::Done { .. } => Err(anyhow!("unexpected reply to getCurrentState")),
        }
    }

    async fn send_calendars(&self, tab: &TabSnapshot, preset: &Preset) -> anyhow::Result<()> {
        let request = Request::ApplyPreset {
            calendars: preset.calendars.clone(),
        };
        match self.tabs.send(tab.id, &request).await? {
            Response::Failed { error } => Err(anyhow!("page rejected applyPreset: {error}")),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    #[test]
    fn sanitize_escapes_markup_and_bounds_length() {
        assert_eq!(sanitize_name("  <b>Work</b> "), "&lt;b&gt;Work&lt;&#x2F;b&gt;");
        assert_eq!(sanitize_name("Tom & Jerry's"), "Tom &amp; Jerry&#x27;s");
        assert_eq!(sanitize_name("   "), "");
        assert_eq!(sanitize_name(&"x".repeat(150)).chars().count(), MAX_PRESET_NAME_CHARS);
    }

    #[test]
    fn sorting_uses_order_then_creation() {
        let preset = |id: &str, order: Option<i64>, minute: u32| Preset {
            id: id.to_string(),
            name: id.to_string(),
            calendars: vec![],
            view_type: None,
            save_view_type: None,
            apply_view_type: None,
            created_at: Utc
                .with_ymd_and_hms(2026, 1, 1, 0, minute, 0)
                .single()
                .expect("valid time"),
            updated_at: None,
            order,
        };

        let mut presets = BTreeMap::new();
        for p in [
            preset("late", None, 1),
            preset("second", Some(1), 9),
            preset("first", Some(0), 5),
            preset("early", None, 0),
        ] {
            presets.insert(p.id.clone(), p);
        }

        let ids: Vec<String> = sorted_presets(&presets).into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["first", "second", "early", "late"]);
    }
}
