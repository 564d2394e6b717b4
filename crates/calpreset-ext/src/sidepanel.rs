use std::future::Future;
use std::rc::Rc;

use calpreset_core::{
  EngineConfig,
  Notice,
  PresetService
};
use calpreset_shared::{
  Settings,
  ViewType
};
use js_sys::Promise;
use serde::Serialize;
use serde_json::json;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

use crate::chrome::{
  ChromeStorage,
  ChromeTabs,
  from_js,
  to_js
};
use crate::clock::GlooClock;

type Service =
  PresetService<ChromeStorage, ChromeTabs, GlooClock>;

fn js_err(err: anyhow::Error) -> JsValue {
  JsValue::from_str(&format!("{err:#}"))
}

/// Resolves with the serialized output of `work`, rejects with its error
/// message.
fn promise<F, T>(work: F) -> Promise
where
  F: Future<Output = anyhow::Result<T>>
    + 'static,
  T: Serialize
{
  future_to_promise(async move {
    let value = work.await.map_err(js_err)?;
    to_js(&value).map_err(js_err)
  })
}

fn notice<F>(work: F) -> Promise
where
  F: Future<Output = Notice> + 'static
{
  promise(async move {
    Ok::<_, anyhow::Error>(work.await)
  })
}

/// Side panel bridge. Every action method resolves with one
/// `{ level, message }` notice for the page to show.
#[wasm_bindgen]
pub struct PresetPanel {
  service: Rc<Service>
}

#[wasm_bindgen]
impl PresetPanel {
  #[wasm_bindgen(constructor)]
  pub fn new() -> Result<PresetPanel, JsValue> {
    let config =
      EngineConfig::builtin().map_err(js_err)?;
    Ok(Self {
      service: Rc::new(PresetService::new(
        ChromeStorage,
        ChromeTabs,
        GlooClock,
        config
      ))
    })
  }

  #[wasm_bindgen(js_name = listPresets)]
  pub fn list_presets(&self) -> Promise {
    let service = Rc::clone(&self.service);
    promise(async move {
      service.list_presets().await
    })
  }

  #[wasm_bindgen(js_name = savePreset)]
  pub fn save_preset(
    &self,
    name: String
  ) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service.save_preset(&name).await
    })
  }

  /// Applies the preset's calendars and resolves with
  /// `{ preset, currentViewType, currentViewLabel }`; rejects with a
  /// notice when the edit cannot start.
  #[wasm_bindgen(js_name = beginEdit)]
  pub fn begin_edit(&self, id: String) -> Promise {
    let service = Rc::clone(&self.service);
    future_to_promise(async move {
      match service.begin_edit(&id).await {
        | Ok(context) => {
          to_js(&json!({
            "preset": context.preset,
            "currentViewType":
              context.current_view_type,
            "currentViewLabel":
              ViewType::label_for(
                context.current_view_type
              )
          }))
          .map_err(js_err)
        }
        | Err(notice) => {
          Err(to_js(&notice).map_err(js_err)?)
        }
      }
    })
  }

  #[wasm_bindgen(js_name = updatePreset)]
  pub fn update_preset(
    &self,
    id: String,
    name: String,
    save_view_type: bool,
    apply_view_type: bool
  ) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service
        .update_preset(
          &id,
          &name,
          save_view_type,
          apply_view_type
        )
        .await
    })
  }

  #[wasm_bindgen(js_name = applyPreset)]
  pub fn apply_preset(&self, id: String) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service.apply_preset(&id).await
    })
  }

  #[wasm_bindgen(js_name = deletePreset)]
  pub fn delete_preset(&self, id: String) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service.delete_preset(&id).await
    })
  }

  /// Persists a drag-and-drop order.
  #[wasm_bindgen(js_name = reorderPresets)]
  pub fn reorder_presets(
    &self,
    ids: Vec<String>
  ) -> Promise {
    let service = Rc::clone(&self.service);
    promise(async move {
      service.reorder_presets(&ids).await
    })
  }

  #[wasm_bindgen(js_name = selectAll)]
  pub fn select_all(&self) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service.select_all().await
    })
  }

  #[wasm_bindgen(js_name = deselectAll)]
  pub fn deselect_all(
    &self,
    include_primary: bool
  ) -> Promise {
    let service = Rc::clone(&self.service);
    notice(async move {
      service.deselect_all(include_primary).await
    })
  }

  /// Last choice for the "include primary calendar" checkbox.
  #[wasm_bindgen(js_name = includePrimary)]
  pub fn include_primary(&self) -> Promise {
    let service = Rc::clone(&self.service);
    promise(async move {
      service.store().load_include_primary().await
    })
  }

  pub fn settings(&self) -> Promise {
    let service = Rc::clone(&self.service);
    promise(async move {
      service.settings().await
    })
  }

  #[wasm_bindgen(js_name = updateSettings)]
  pub fn update_settings(
    &self,
    settings: JsValue
  ) -> Promise {
    let service = Rc::clone(&self.service);
    promise(async move {
      let settings: Settings = from_js(settings)?;
      service.update_settings(settings).await
    })
  }

  #[wasm_bindgen(js_name = viewLabel)]
  pub fn view_label(
    view: Option<String>
  ) -> String {
    view
      .and_then(|token| {
        ViewType::ALL
          .into_iter()
          .find(|view| view.token() == token)
      })
      .map_or_else(
        || ViewType::label_for(None),
        ViewType::label
      )
      .to_string()
  }
}
