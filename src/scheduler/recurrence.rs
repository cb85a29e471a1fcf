use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use croner::Cron;

use crate::error::RecurrenceError;

const EVERY_PREFIX: &str = "@every";

/// When a recurring scheduled item fires.
///
/// Accepts cron expressions with five or six fields (seconds optional) and
/// the nicknames `croner` understands (`@hourly`, `@daily`, ...), plus a
/// fixed interval written as `@every <n><s|m|h|d>`.
#[derive(Debug, Clone)]
pub struct RecurrenceRule {
    expr: String,
    kind: RuleKind,
}

#[derive(Debug, Clone)]
enum RuleKind {
    Cron(Cron),
    Every(chrono::Duration),
}

impl RecurrenceRule {
    pub fn parse(expr: &str) -> Result<Self, RecurrenceError> {
        let trimmed = expr.trim();
        let kind = match trimmed.strip_prefix(EVERY_PREFIX) {
            Some(interval) => RuleKind::Every(parse_interval(trimmed, interval.trim())?),
            None => {
                let cron = Cron::new(trimmed)
                    .with_seconds_optional()
                    .parse()
                    .map_err(|e| RecurrenceError::InvalidCron {
                        expr: trimmed.to_string(),
                        reason: e.to_string(),
                    })?;
                RuleKind::Cron(cron)
            }
        };

        Ok(Self {
            expr: trimmed.to_string(),
            kind,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.expr
    }

    /// The first occurrence strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, RecurrenceError> {
        let next = match &self.kind {
            RuleKind::Every(interval) => after.checked_add_signed(*interval),
            RuleKind::Cron(cron) => {
                let floor = after.with_nanosecond(0).unwrap_or(after);
                cron.find_next_occurrence(&floor, false).ok()
            }
        };

        match next {
            Some(next) if next > after => Ok(next),
            _ => Err(RecurrenceError::NoNextOccurrence(self.expr.clone())),
        }
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn parse_interval(expr: &str, interval: &str) -> Result<chrono::Duration, RecurrenceError> {
    let invalid = || RecurrenceError::InvalidInterval(expr.to_string());

    let split = interval.len().checked_sub(1).ok_or_else(invalid)?;
    if !interval.is_char_boundary(split) {
        return Err(invalid());
    }
    let (count, unit) = interval.split_at(split);
    let count: u64 = count.parse().map_err(|_| invalid())?;
    let unit_secs: u64 = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => return Err(invalid()),
    };

    let secs = count.checked_mul(unit_secs).filter(|secs| *secs > 0).ok_or_else(invalid)?;
    chrono::Duration::from_std(std::time::Duration::from_secs(secs)).map_err(|_| invalid())
}
