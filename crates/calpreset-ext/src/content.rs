use std::rc::Rc;

use calpreset_core::{
  CalendarEngine,
  EngineConfig,
  handle_message
};
use js_sys::Function;
use serde_json::Value;
use tracing::{
  error,
  info,
  warn
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

use crate::chrome::{
  from_js,
  on_runtime_message_add,
  to_js
};
use crate::clock::GlooClock;
use crate::web_dom::WebDom;

type PageEngine =
  CalendarEngine<WebDom, GlooClock>;

/// Registers the page-side message handler. Replies are sent asynchronously,
/// so the listener returns `true` to keep the channel open.
pub fn start() -> anyhow::Result<()> {
  let engine: Rc<PageEngine> =
    Rc::new(CalendarEngine::new(
      WebDom::new()?,
      GlooClock,
      EngineConfig::builtin()?
    )?);

  let listener = Closure::<
    dyn FnMut(JsValue, JsValue, Function) -> JsValue
  >::new(
    move |message: JsValue,
          _sender: JsValue,
          reply: Function| {
      let payload: Value =
        from_js(message).unwrap_or(Value::Null);
      let engine = Rc::clone(&engine);
      spawn_local(async move {
        let response =
          handle_message(&*engine, &payload).await;
        match to_js(&response) {
          | Ok(value) => {
            if let Err(err) =
              reply.call1(&JsValue::NULL, &value)
            {
              warn!(
                error = ?err,
                "reply channel closed"
              );
            }
          }
          | Err(err) => {
            error!(
              error = %err,
              "could not encode reply"
            );
          }
        }
      });
      JsValue::TRUE
    }
  );
  on_runtime_message_add(
    listener.as_ref().unchecked_ref()
  );
  // Lives as long as the page.
  listener.forget();

  info!("content script ready");
  Ok(())
}
