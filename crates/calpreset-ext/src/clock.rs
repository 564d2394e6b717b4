use std::time::Duration;

use calpreset_core::Clock;
use chrono::{
  DateTime,
  Utc
};
use gloo::timers::future::TimeoutFuture;

#[derive(Debug, Clone, Copy, Default)]
pub struct GlooClock;

impl Clock for GlooClock {
  async fn sleep(
    &self,
    duration: Duration
  ) {
    let millis = u32::try_from(
      duration.as_millis()
    )
    .unwrap_or(u32::MAX);
    TimeoutFuture::new(millis).await;
  }

  fn now(&self) -> DateTime<Utc> {
    let millis = js_sys::Date::now() as i64;
    DateTime::from_timestamp_millis(millis)
      .unwrap_or_default()
  }
}
