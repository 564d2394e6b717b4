use std::rc::Rc;

use calpreset_core::{
  EngineConfig,
  PanelController,
  Tabs
};
use calpreset_shared::{
  TabId,
  WindowId
};
use serde::Deserialize;
use tracing::{
  debug,
  info,
  warn
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::chrome::{
  ChromeSidePanel,
  ChromeTabs,
  RawTab,
  from_js,
  on_action_clicked_add,
  on_tab_activated_add,
  on_tab_updated_add,
  on_window_removed_add
};
use crate::clock::GlooClock;

type Panels =
  PanelController<ChromeSidePanel, GlooClock>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActiveInfo {
  tab_id:    TabId,
  window_id: WindowId
}

#[derive(Debug, Deserialize)]
struct UrlChange {
  #[serde(default)]
  url: Option<String>
}

#[derive(Debug, Deserialize)]
struct ActiveFlag {
  #[serde(default)]
  active: bool
}

pub fn start() -> anyhow::Result<()> {
  let config = EngineConfig::builtin()?;
  let panels = Rc::new(PanelController::new(
    ChromeSidePanel::new(
      config.host.panel_path.clone()
    ),
    GlooClock,
    &config
  ));

  on_action_clicked(
    Rc::clone(&panels),
    config.clone()
  );
  on_tab_activated(Rc::clone(&panels));
  on_tab_updated(Rc::clone(&panels));
  on_window_removed(panels);

  info!("background worker ready");
  Ok(())
}

fn on_action_clicked(
  panels: Rc<Panels>,
  config: EngineConfig
) {
  let listener =
    Closure::<dyn FnMut(JsValue)>::new(
      move |tab: JsValue| {
        let tab: RawTab = match from_js(tab) {
          | Ok(tab) => tab,
          | Err(err) => {
            warn!(error = %err, "unreadable clicked tab");
            return;
          }
        };
        let on_calendar = tab
          .url
          .as_deref()
          .is_some_and(|url| {
            config.is_calendar_url(url)
          });
        if !on_calendar {
          debug!("action clicked outside the calendar");
          return;
        }
        // sidePanel.open must be called inside the click.
        let Some(pending) =
          panels.begin_toggle(tab.window_id)
        else {
          return;
        };
        let panels = Rc::clone(&panels);
        spawn_local(async move {
          panels.finish_toggle(pending).await;
        });
      }
    );
  on_action_clicked_add(
    listener.as_ref().unchecked_ref()
  );
  listener.forget();
}

fn on_tab_activated(panels: Rc<Panels>) {
  let listener =
    Closure::<dyn FnMut(JsValue)>::new(
      move |info: JsValue| {
        match from_js::<ActiveInfo>(info) {
          | Ok(info) => {
            refresh(
              Rc::clone(&panels),
              info.tab_id,
              info.window_id
            );
          }
          | Err(err) => {
            warn!(error = %err, "unreadable activation");
          }
        }
      }
    );
  on_tab_activated_add(
    listener.as_ref().unchecked_ref()
  );
  listener.forget();
}

fn on_tab_updated(panels: Rc<Panels>) {
  let listener = Closure::<
    dyn FnMut(TabId, JsValue, JsValue)
  >::new(
    move |tab_id: TabId,
          change: JsValue,
          tab: JsValue| {
      let url_changed = from_js::<UrlChange>(change)
        .ok()
        .and_then(|change| change.url)
        .is_some();
      let active = from_js::<ActiveFlag>(tab.clone())
        .is_ok_and(|flag| flag.active);
      if !url_changed || !active {
        return;
      }
      if let Ok(tab) = from_js::<RawTab>(tab) {
        refresh(
          Rc::clone(&panels),
          tab_id,
          tab.window_id
        );
      }
    }
  );
  on_tab_updated_add(
    listener.as_ref().unchecked_ref()
  );
  listener.forget();
}

fn on_window_removed(panels: Rc<Panels>) {
  let listener =
    Closure::<dyn FnMut(WindowId)>::new(
      move |window: WindowId| {
        panels.window_removed(window);
      }
    );
  on_window_removed_add(
    listener.as_ref().unchecked_ref()
  );
  listener.forget();
}

/// Re-reads the tab so the panel state follows what the window now shows.
fn refresh(
  panels: Rc<Panels>,
  tab: TabId,
  window: WindowId
) {
  spawn_local(async move {
    match ChromeTabs.get(tab).await {
      | Ok(snapshot) => {
        panels.tab_changed(
          window,
          Some(snapshot.url.as_str())
        );
      }
      | Err(err) => {
        warn!(error = %err, "tab lookup failed");
      }
    }
  });
}
