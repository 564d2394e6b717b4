//! Browser side of calpreset: web-sys and `chrome.*` implementations of the
//! engine seams, plus one entry point per extension context.

mod background;
mod chrome;
mod clock;
mod content;
mod sidepanel;
mod web_dom;

use std::sync::Once;

use wasm_bindgen::prelude::*;

pub use sidepanel::PresetPanel;

fn install_hooks() {
  static HOOKS: Once = Once::new();
  HOOKS.call_once(|| {
    console_error_panic_hook::set_once();
    wasm_tracing::set_as_global_default();
  });
}

fn to_js_error(err: anyhow::Error) -> JsValue {
  tracing::error!(error = %err, "startup failed");
  JsValue::from_str(&format!("{err:#}"))
}

/// Called by the content script loader on calendar pages.
#[wasm_bindgen(js_name = startContentScript)]
pub fn start_content_script() -> Result<(), JsValue> {
  install_hooks();
  content::start().map_err(to_js_error)
}

/// Called once by the background service worker.
#[wasm_bindgen(js_name = startBackground)]
pub fn start_background() -> Result<(), JsValue> {
  install_hooks();
  background::start().map_err(to_js_error)
}

/// Called by the side panel page before constructing a `PresetPanel`.
#[wasm_bindgen(js_name = startSidePanel)]
pub fn start_side_panel() {
  install_hooks();
  tracing::info!("side panel ready");
}
