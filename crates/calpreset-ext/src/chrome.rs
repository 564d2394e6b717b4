//! Bindings to the extension APIs and the platform seams built on them.

use anyhow::{
  Context,
  anyhow
};
use calpreset_core::{
  KeyValueStore,
  LoadStatus,
  SidePanel,
  TabSnapshot,
  Tabs
};
use calpreset_shared::{
  Request,
  Response,
  TabId,
  WindowId
};
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use js_sys::{
  Function,
  Promise
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::{
  Value,
  json
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

#[wasm_bindgen]
extern "C" {
  #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = query)]
  async fn tabs_query(
    query: &JsValue
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = get)]
  async fn tabs_get(
    tab_id: i32
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = update)]
  async fn tabs_update(
    tab_id: i32,
    properties: &JsValue
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "tabs"], js_name = sendMessage)]
  async fn tabs_send_message(
    tab_id: i32,
    message: &JsValue
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onUpdated"], js_name = addListener)]
  pub fn on_tab_updated_add(
    callback: &Function
  );

  #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onUpdated"], js_name = removeListener)]
  fn on_tab_updated_remove(
    callback: &Function
  );

  #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onActivated"], js_name = addListener)]
  pub fn on_tab_activated_add(
    callback: &Function
  );

  #[wasm_bindgen(js_namespace = ["chrome", "windows", "onRemoved"], js_name = addListener)]
  pub fn on_window_removed_add(
    callback: &Function
  );

  #[wasm_bindgen(js_namespace = ["chrome", "action", "onClicked"], js_name = addListener)]
  pub fn on_action_clicked_add(
    callback: &Function
  );

  #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
  pub fn on_runtime_message_add(
    callback: &Function
  );

  #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = get)]
  async fn storage_get(
    key: &str
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = set)]
  async fn storage_set(
    items: &JsValue
  ) -> Result<JsValue, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "sidePanel"], js_name = open)]
  fn side_panel_open(
    options: &JsValue
  ) -> Result<Promise, JsValue>;

  #[wasm_bindgen(catch, js_namespace = ["chrome", "sidePanel"], js_name = setOptions)]
  fn side_panel_set_options(
    options: &JsValue
  ) -> Result<Promise, JsValue>;
}

/// Converts a serializable value into a plain JS object (no `Map`s).
pub fn to_js<T: Serialize + ?Sized>(
  value: &T
) -> anyhow::Result<JsValue> {
  let serializer =
    serde_wasm_bindgen::Serializer::json_compatible();
  value
    .serialize(&serializer)
    .map_err(|err| anyhow!("encode: {err}"))
}

pub fn from_js<T: for<'de> Deserialize<'de>>(
  value: JsValue
) -> anyhow::Result<T> {
  serde_wasm_bindgen::from_value(value)
    .map_err(|err| anyhow!("decode: {err}"))
}

fn js_error(err: JsValue) -> anyhow::Error {
  let message = err
    .dyn_ref::<js_sys::Error>()
    .map(|err| String::from(err.message()))
    .or_else(|| err.as_string())
    .unwrap_or_else(|| format!("{err:?}"));
  anyhow!(message)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTab {
  pub id:        Option<TabId>,
  pub window_id: WindowId,
  #[serde(default)]
  pub url:       Option<String>,
  #[serde(default)]
  pub status:    Option<String>
}

impl RawTab {
  fn into_snapshot(
    self
  ) -> anyhow::Result<TabSnapshot> {
    Ok(TabSnapshot {
      id:        self
        .id
        .context("tab has no id")?,
      window_id: self.window_id,
      url:       self.url.unwrap_or_default(),
      status:    LoadStatus::parse(
        self.status.as_deref()
      )
    })
  }
}

#[derive(Debug, Deserialize)]
struct StatusChange {
  #[serde(default)]
  status: Option<String>
}

/// Keeps a `tabs.onUpdated` listener registered until dropped.
struct UpdateListener {
  callback:
    Closure<dyn FnMut(i32, JsValue)>
}

impl UpdateListener {
  fn add(
    callback: Closure<dyn FnMut(i32, JsValue)>
  ) -> Self {
    on_tab_updated_add(
      callback.as_ref().unchecked_ref()
    );
    Self { callback }
  }
}

impl Drop for UpdateListener {
  fn drop(&mut self) {
    on_tab_updated_remove(
      self.callback.as_ref().unchecked_ref()
    );
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeTabs;

impl Tabs for ChromeTabs {
  async fn active_tab(
    &self
  ) -> anyhow::Result<Option<TabSnapshot>> {
    let query = to_js(&json!({
      "active": true,
      "currentWindow": true
    }))?;
    let tabs: Vec<RawTab> = from_js(
      tabs_query(&query)
        .await
        .map_err(js_error)
        .context("tabs.query failed")?
    )?;
    tabs
      .into_iter()
      .next()
      .map(RawTab::into_snapshot)
      .transpose()
  }

  async fn get(
    &self,
    tab: TabId
  ) -> anyhow::Result<TabSnapshot> {
    let raw: RawTab = from_js(
      tabs_get(tab)
        .await
        .map_err(js_error)
        .with_context(|| {
          format!("tabs.get({tab}) failed")
        })?
    )?;
    raw.into_snapshot()
  }

  async fn navigate(
    &self,
    tab: TabId,
    url: &str
  ) -> anyhow::Result<()> {
    let properties =
      to_js(&json!({ "url": url }))?;
    tabs_update(tab, &properties)
      .await
      .map_err(js_error)
      .with_context(|| {
        format!("tabs.update({tab}) failed")
      })?;
    Ok(())
  }

  async fn load_complete(
    &self,
    tab: TabId
  ) -> anyhow::Result<()> {
    let (done, loaded) = oneshot::channel();
    let mut done = Some(done);
    let _listener = UpdateListener::add(
      Closure::new(
        move |updated: i32, change: JsValue| {
          if updated != tab {
            return;
          }
          let complete =
            from_js::<StatusChange>(change)
              .ok()
              .and_then(|change| change.status)
              .is_some_and(|status| {
                status == "complete"
              });
          if complete
            && let Some(done) = done.take()
          {
            // Err only when the waiter already gave up.
            if done.send(()).is_err() {
              tracing::debug!("load waiter gone");
            }
          }
        }
      )
    );
    loaded
      .await
      .context("load listener went away")
  }

  async fn send(
    &self,
    tab: TabId,
    request: &Request
  ) -> anyhow::Result<Response> {
    let reply = tabs_send_message(
      tab,
      &to_js(request)?
    )
    .await
    .map_err(js_error)
    .context("tabs.sendMessage failed")?;
    if reply.is_undefined() {
      return Err(anyhow!(
        "page returned no response"
      ));
    }
    from_js(reply)
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromeStorage;

impl KeyValueStore for ChromeStorage {
  async fn get(
    &self,
    key: &str
  ) -> anyhow::Result<Option<Value>> {
    let items: Value = from_js(
      storage_get(key)
        .await
        .map_err(js_error)
        .context("storage.local.get failed")?
    )?;
    Ok(
      items
        .get(key)
        .filter(|value| !value.is_null())
        .cloned()
    )
  }

  async fn set(
    &self,
    key: &str,
    value: Value
  ) -> anyhow::Result<()> {
    let mut items = serde_json::Map::new();
    items.insert(key.to_string(), value);
    storage_set(&to_js(&items)?)
      .await
      .map_err(js_error)
      .context("storage.local.set failed")?;
    Ok(())
  }
}

/// `chrome.sidePanel` has no close call; disabling the panel hides it and
/// re-enabling keeps the next open working.
#[derive(Debug, Clone)]
pub struct ChromeSidePanel {
  path: String
}

impl ChromeSidePanel {
  pub fn new(path: impl Into<String>) -> Self {
    Self { path: path.into() }
  }
}

/// Calls `setOptions` now and returns a future for its completion.
fn set_panel_options(
  options: &Value
) -> anyhow::Result<JsFuture> {
  let promise =
    side_panel_set_options(&to_js(options)?)
      .map_err(js_error)?;
  Ok(JsFuture::from(promise))
}

impl SidePanel for ChromeSidePanel {
  fn open(
    &self,
    window: WindowId
  ) -> LocalBoxFuture<'static, anyhow::Result<()>> {
    let started = to_js(&json!({
      "windowId": window
    }))
    .and_then(|options| {
      side_panel_open(&options).map_err(js_error)
    });
    Box::pin(async move {
      JsFuture::from(started?)
        .await
        .map_err(js_error)
        .context("sidePanel.open failed")?;
      Ok(())
    })
  }

  fn close(
    &self,
    _window: WindowId
  ) -> LocalBoxFuture<'static, anyhow::Result<()>> {
    let disabled = set_panel_options(&json!({
      "path": null,
      "enabled": false
    }));
    let path = self.path.clone();
    Box::pin(async move {
      disabled?
        .await
        .map_err(js_error)
        .context("disabling side panel failed")?;
      set_panel_options(&json!({
        "enabled": true,
        "path": path
      }))?
      .await
      .map_err(js_error)
      .context("re-enabling side panel failed")?;
      Ok(())
    })
  }
}
