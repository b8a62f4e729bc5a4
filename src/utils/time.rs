use chrono::{DateTime, Duration, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

pub fn budget_end(started_at: DateTime<Utc>, duration_minutes: i32) -> DateTime<Utc> {
    started_at + Duration::minutes(duration_minutes as i64)
}

/// `max(0, started_at + duration - now)` in whole seconds, rounded up so that
/// zero is only reported once the budget end has been reached.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration_minutes: i32, now: DateTime<Utc>) -> i64 {
    let ms = (budget_end(started_at, duration_minutes) - now)
        .num_milliseconds()
        .max(0);
    (ms + 999) / 1000
}
