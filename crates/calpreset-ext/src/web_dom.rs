use std::cell::Cell;
use std::rc::Rc;

use calpreset_core::{
  Dom,
  MutationWatch,
  NodeId,
  Overflow
};
use js_sys::{
  Array,
  Object,
  WeakMap
};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{
  Document,
  Element,
  Event,
  EventInit,
  HtmlElement,
  HtmlInputElement,
  MutationObserver,
  MutationObserverInit,
  NodeList,
  Window
};

/// The live calendar page, seen through web-sys.
pub struct WebDom {
  window:   Window,
  document: Document,
  ids:      WeakMap,
  next_id:  Cell<u64>
}

impl WebDom {
  pub fn new() -> anyhow::Result<Self> {
    let window = web_sys::window()
      .ok_or_else(|| {
        anyhow::anyhow!("no window")
      })?;
    let document =
      window.document().ok_or_else(|| {
        anyhow::anyhow!("no document")
      })?;
    Ok(Self {
      window,
      document,
      ids: WeakMap::new(),
      next_id: Cell::new(1)
    })
  }
}

fn elements(list: NodeList) -> Vec<Element> {
  (0..list.length())
    .filter_map(|index| list.get(index))
    .filter_map(|node| {
      node.dyn_into::<Element>().ok()
    })
    .collect()
}

impl Dom for WebDom {
  type Node = Element;
  type Watch = WebWatch;

  fn identity(
    &self,
    node: &Element
  ) -> NodeId {
    let key: &Object = node.unchecked_ref();
    if let Some(id) =
      self.ids.get(key).as_f64()
    {
      return NodeId(id as u64);
    }
    let id = self.next_id.get();
    self.next_id.set(id + 1);
    self.ids.set(
      key,
      &JsValue::from_f64(id as f64)
    );
    NodeId(id)
  }

  fn body(&self) -> Option<Element> {
    self.document.body().map(Element::from)
  }

  fn query_selector(
    &self,
    scope: Option<&Element>,
    selector: &str
  ) -> Option<Element> {
    let found = match scope {
      | Some(root) => {
        root.query_selector(selector)
      }
      | None => {
        self
          .document
          .query_selector(selector)
      }
    };
    found.ok().flatten()
  }

  fn query_selector_all(
    &self,
    scope: Option<&Element>,
    selector: &str
  ) -> Vec<Element> {
    let found = match scope {
      | Some(root) => {
        root.query_selector_all(selector)
      }
      | None => {
        self
          .document
          .query_selector_all(selector)
      }
    };
    found
      .map(elements)
      .unwrap_or_default()
  }

  fn closest(
    &self,
    node: &Element,
    selector: &str
  ) -> Option<Element> {
    node.closest(selector).ok().flatten()
  }

  fn parent(
    &self,
    node: &Element
  ) -> Option<Element> {
    node.parent_element()
  }

  fn next_element_sibling(
    &self,
    node: &Element
  ) -> Option<Element> {
    node.next_element_sibling()
  }

  fn attribute(
    &self,
    node: &Element,
    name: &str
  ) -> Option<String> {
    node.get_attribute(name)
  }

  fn text_content(
    &self,
    node: &Element
  ) -> String {
    node.text_content().unwrap_or_default()
  }

  fn is_checked(
    &self,
    node: &Element
  ) -> bool {
    node
      .dyn_ref::<HtmlInputElement>()
      .is_some_and(|input| input.checked())
  }

  fn set_checked(
    &self,
    node: &Element,
    checked: bool
  ) {
    if let Some(input) =
      node.dyn_ref::<HtmlInputElement>()
    {
      input.set_checked(checked);
    }
  }

  fn dispatch(
    &self,
    node: &Element,
    event: &str
  ) {
    let init = EventInit::new();
    init.set_bubbles(true);
    init.set_cancelable(true);
    match Event::new_with_event_init_dict(
      event, &init
    ) {
      | Ok(created) => {
        if let Err(err) = node.dispatch_event(&created)
        {
          tracing::warn!(
            event,
            error = ?err,
            "event listener threw"
          );
        }
      }
      | Err(err) => {
        tracing::warn!(
          event,
          error = ?err,
          "could not create event"
        );
      }
    }
  }

  fn click(&self, node: &Element) {
    if let Some(element) =
      node.dyn_ref::<HtmlElement>()
    {
      element.click();
    }
  }

  fn scroll_top(
    &self,
    node: &Element
  ) -> i32 {
    node.scroll_top()
  }

  fn set_scroll_top(
    &self,
    node: &Element,
    top: i32
  ) {
    node.set_scroll_top(top);
  }

  fn scroll_height(
    &self,
    node: &Element
  ) -> i32 {
    node.scroll_height()
  }

  fn client_height(
    &self,
    node: &Element
  ) -> i32 {
    node.client_height()
  }

  fn overflow_y(
    &self,
    node: &Element
  ) -> Overflow {
    self
      .window
      .get_computed_style(node)
      .ok()
      .flatten()
      .and_then(|style| {
        style
          .get_property_value(
            "overflow-y"
          )
          .ok()
      })
      .map_or(Overflow::Visible, |value| {
        Overflow::parse(&value)
      })
  }

  fn location_href(&self) -> String {
    self
      .window
      .location()
      .href()
      .unwrap_or_default()
  }

  fn observe_mutations(
    &self,
    root: &Element
  ) -> WebWatch {
    WebWatch::start(root)
  }
}

/// Counts mutation records under one root until dropped.
pub struct WebWatch {
  count:    Rc<Cell<u64>>,
  observer: Option<MutationObserver>,
  _handler:
    Option<Closure<dyn FnMut(Array)>>
}

impl WebWatch {
  fn start(root: &Element) -> Self {
    let count = Rc::new(Cell::new(0));
    let seen = Rc::clone(&count);
    let handler = Closure::<dyn FnMut(Array)>::new(
      move |records: Array| {
        seen.set(
          seen.get()
            + u64::from(records.length())
        );
      }
    );

    let observer = MutationObserver::new(
      handler.as_ref().unchecked_ref()
    )
    .ok()
    .filter(|observer| {
      let options =
        MutationObserverInit::new();
      options.set_child_list(true);
      options.set_subtree(true);
      options.set_attributes(true);
      observer
        .observe_with_options(
          root, &options
        )
        .is_ok()
    });
    if observer.is_none() {
      tracing::warn!(
        "mutation observer unavailable; \
         settle wait relies on the quiet \
         period only"
      );
    }

    Self {
      count,
      observer,
      _handler: Some(handler)
    }
  }
}

impl MutationWatch for WebWatch {
  fn mutations(&self) -> u64 {
    self.count.get()
  }
}

impl Drop for WebWatch {
  fn drop(&mut self) {
    if let Some(observer) = &self.observer
    {
      observer.disconnect();
    }
  }
}
