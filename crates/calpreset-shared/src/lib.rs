use chrono::{
  DateTime,
  Utc
};
use serde::{
  Deserialize,
  Serialize
};
use serde_json::Value;

pub type TabId = i32;
pub type WindowId = i32;

/// Display granularity of the calendar page, as encoded in its URL path.
#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
  Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum ViewType {
  Day,
  Week,
  Month,
  Year,
  Agenda,
  Customweek,
  Customday
}

impl ViewType {
  pub const ALL: [ViewType; 7] = [
    ViewType::Day,
    ViewType::Week,
    ViewType::Month,
    ViewType::Year,
    ViewType::Agenda,
    ViewType::Customweek,
    ViewType::Customday
  ];

  pub fn token(self) -> &'static str {
    match self {
      | ViewType::Day => "day",
      | ViewType::Week => "week",
      | ViewType::Month => "month",
      | ViewType::Year => "year",
      | ViewType::Agenda => "agenda",
      | ViewType::Customweek => {
        "customweek"
      }
      | ViewType::Customday => {
        "customday"
      }
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      | ViewType::Day => "Day",
      | ViewType::Week => "Week",
      | ViewType::Month => "Month",
      | ViewType::Year => "Year",
      | ViewType::Agenda => "Schedule",
      | ViewType::Customweek => {
        "Custom (Week)"
      }
      | ViewType::Customday => {
        "Custom (Day)"
      }
    }
  }

  pub fn label_for(
    view: Option<ViewType>
  ) -> &'static str {
    view.map_or("-", ViewType::label)
  }

  /// Finds the first `<marker><token>` segment in `url`, checked in
  /// `ALL` order.
  pub fn from_url(
    url: &str,
    marker: &str
  ) -> Option<ViewType> {
    Self::ALL.into_iter().find(|view| {
      url.contains(&format!(
        "{marker}{}",
        view.token()
      ))
    })
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
pub struct CalendarEntry {
  pub id:   String,
  pub name: String
}

/// Checked calendars plus the page's current view type.
#[derive(
  Debug,
  Clone,
  Default,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct CalendarState {
  pub calendars: Vec<String>,
  #[serde(default)]
  pub view_type: Option<ViewType>
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
  #[serde(default)]
  pub id:              String,
  pub name:            String,
  #[serde(default)]
  pub calendars:       Vec<String>,
  #[serde(default)]
  pub view_type:       Option<ViewType>,
  /// `None` on records written before the per-preset switches existed;
  /// such presets follow the global settings.
  #[serde(default)]
  pub save_view_type:  Option<bool>,
  #[serde(default)]
  pub apply_view_type: Option<bool>,
  pub created_at:      DateTime<Utc>,
  #[serde(
    default,
    skip_serializing_if = "Option::is_none"
  )]
  pub updated_at:      Option<DateTime<Utc>>,
  #[serde(default)]
  pub order:           Option<i64>
}

#[derive(
  Debug,
  Clone,
  Copy,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
  #[serde(default = "default_true")]
  pub save_view_type_by_default:  bool,
  #[serde(default = "default_true")]
  pub apply_view_type_by_default: bool
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      save_view_type_by_default:  true,
      apply_view_type_by_default: true
    }
  }
}

fn default_true() -> bool {
  true
}

#[derive(
  Debug, Clone, PartialEq, Eq, thiserror::Error,
)]
pub enum ProtocolError {
  #[error("Invalid message format")]
  InvalidFormat,
  #[error("Invalid action")]
  InvalidAction,
  #[error("Unknown action")]
  UnknownAction,
  #[error("Invalid calendars parameter")]
  InvalidCalendars
}

/// Requests accepted by the page-context handler.
#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(
  tag = "action",
  rename_all = "camelCase",
  rename_all_fields = "camelCase"
)]
pub enum Request {
  GetCurrentState,
  ApplyPreset { calendars: Vec<String> },
  SelectAll,
  DeselectAll { include_primary: bool }
}

impl Request {
  /// Validates an untrusted message payload.
  ///
  /// A non-boolean `includePrimary` falls back to `true`.
  pub fn from_value(
    value: &Value
  ) -> Result<Self, ProtocolError> {
    let Some(object) = value.as_object()
    else {
      return Err(
        ProtocolError::InvalidFormat
      );
    };

    let Some(action) = object
      .get("action")
      .and_then(Value::as_str)
    else {
      return Err(
        ProtocolError::InvalidAction
      );
    };

    match action {
      | "getCurrentState" => {
        Ok(Request::GetCurrentState)
      }
      | "applyPreset" => {
        let calendars = object
          .get("calendars")
          .and_then(Value::as_array)
          .and_then(|items| {
            items
              .iter()
              .map(|item| {
                item
                  .as_str()
                  .map(str::to_string)
              })
              .collect::<Option<Vec<_>>>()
          })
          .ok_or(
            ProtocolError::InvalidCalendars
          )?;
        Ok(Request::ApplyPreset {
          calendars
        })
      }
      | "selectAll" => {
        Ok(Request::SelectAll)
      }
      | "deselectAll" => {
        Ok(Request::DeselectAll {
          include_primary: object
            .get("includePrimary")
            .and_then(Value::as_bool)
            .unwrap_or(true)
        })
      }
      | _ => {
        Err(ProtocolError::UnknownAction)
      }
    }
  }
}

#[derive(
  Debug,
  Clone,
  Serialize,
  Deserialize,
  PartialEq,
  Eq,
)]
#[serde(untagged)]
pub enum Response {
  State(CalendarState),
  Done { success: bool },
  Failed { error: String }
}

impl Response {
  pub fn success() -> Self {
    Response::Done {
      success: true
    }
  }

  pub fn failed(
    error: impl Into<String>
  ) -> Self {
    Response::Failed {
      error: error.into()
    }
  }
}

impl From<ProtocolError> for Response {
  fn from(error: ProtocolError) -> Self {
    Response::failed(error.to_string())
  }
}
