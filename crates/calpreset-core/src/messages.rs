use std::collections::HashSet;

use calpreset_shared::{Request, Response};
use serde_json::Value;
use tracing::{debug, warn};

use crate::dom::{Clock, Dom};
use crate::engine::CalendarEngine;

pub const BUSY_MESSAGE: &str = "Another operation is in progress";

/// Page-context entry point for requests coming from the extension UI.
///
/// Malformed payloads are answered with an error before the page is touched.
#[tracing::instrument(skip_all)]
pub async fn handle_message<D: Dom, C: Clock>(engine: &CalendarEngine<D, C>, raw: &Value) -> Response {
    let request = match Request::from_value(raw) {
        Ok(request) => request,
        Err(error) => {
            warn!(%error, "rejected message");
            return error.into();
        }
    };
    dispatch(engine, request).await
}

pub async fn dispatch<D: Dom, C: Clock>(engine: &CalendarEngine<D, C>, request: Request) -> Response {
    debug!(?request, "handling request");
    match request {
        Request::GetCurrentState => match engine.current_state().await {
            Some(state) => Response::State(state),
            None => Response::failed(BUSY_MESSAGE),
        },
        Request::ApplyPreset { calendars } => {
            let target: HashSet<String> = calendars.into_iter().collect();
            engine.apply_preset(&target).await;
            Response::success()
        }
        Request::SelectAll => {
            engine.select_all().await;
            Response::success()
        }
        Request::DeselectAll { include_primary } => {
            engine.deselect_all(include_primary).await;
            Response::success()
        }
    }
}
