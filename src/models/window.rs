use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{PipelineError, Result};

/// Which slice of history a run looks at. Chosen by the operator; never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowMode {
    /// Everything created or modified up to and including yesterday (catch-up / backfill).
    BeforeToday,
    /// The last `n` calendar days including today (steady state).
    LastDays(u32),
}

impl WindowMode {
    pub fn parse(mode: &str, days: u32) -> Result<Self> {
        match mode.trim().to_lowercase().as_str() {
            "before_today" => Ok(WindowMode::BeforeToday),
            "last_days" => {
                if days == 0 {
                    return Err(PipelineError::Configuration("SYNC_WINDOW_DAYS must be at least 1".into()));
                }
                Ok(WindowMode::LastDays(days))
            }
            other => Err(PipelineError::Configuration(format!(
                "Unknown SYNC_WINDOW '{}': expected before_today or last_days",
                other
            ))),
        }
    }
}

/// Inclusive calendar-day window over creation/modification timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWindow {
    pub mode: WindowMode,
    pub lower: Option<NaiveDate>,
    pub upper: NaiveDate,
}

impl RunWindow {
    pub fn for_mode(mode: WindowMode, today: NaiveDate) -> Result<Self> {
        match mode {
            WindowMode::BeforeToday => {
                let upper = today
                    .pred_opt()
                    .ok_or_else(|| PipelineError::Configuration("Run date has no previous day".into()))?;
                Ok(Self { mode, lower: None, upper })
            }
            WindowMode::LastDays(0) => Err(PipelineError::Configuration(
                "A last_days window needs at least one day".into(),
            )),
            WindowMode::LastDays(n) => {
                let lower = today
                    .checked_sub_signed(Duration::days(i64::from(n) - 1))
                    .ok_or_else(|| PipelineError::Configuration("Window lower bound out of range".into()))?;
                Ok(Self { mode, lower: Some(lower), upper: today })
            }
        }
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.lower.map_or(true, |lower| date >= lower) && date <= self.upper
    }

    /// A record qualifies when it was created inside the window, or when it was
    /// modified inside the window and the modification is not older than the creation.
    pub fn qualifies(&self, created: NaiveDateTime, modified: Option<NaiveDateTime>) -> bool {
        let modified_hit = modified
            .map(|m| m >= created && self.contains_date(m.date()))
            .unwrap_or(false);
        modified_hit || self.contains_date(created.date())
    }

    /// Start of the first day in the window, if bounded below.
    pub fn lower_start(&self) -> Option<NaiveDateTime> {
        self.lower.and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Start of the day after `upper`; timestamps strictly before it are inside the window.
    pub fn upper_exclusive(&self) -> NaiveDateTime {
        self.upper
            .succ_opt()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MAX)
    }

    pub fn describe(&self) -> String {
        match (self.mode, self.lower) {
            (WindowMode::LastDays(n), Some(lower)) => format!(
                "within last {} days, between {} and {}",
                n,
                lower.format("%Y%m%d"),
                self.upper.format("%Y%m%d")
            ),
            _ => "before today".to_string(),
        }
    }
}

/// Calendar date of `now` as seen from `offset`.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// Parse `+HH:MM`, `-HH:MM`, `+HH` or `Z` into a fixed offset.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset> {
    let raw = raw.trim();
    let invalid = || PipelineError::Configuration(format!("Invalid UTC offset '{}'", raw));
    if raw.eq_ignore_ascii_case("z") || raw == "0" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }
    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(invalid());
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
