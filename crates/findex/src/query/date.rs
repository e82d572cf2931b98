//! Date predicate parsing and matching for the `date:` filter.
//!
//! Dates are `YYYY-MM-DD`, interpreted as whole UTC days, and applied to an
//! entry's modification time.

use chrono::NaiveDate;

use crate::error::{FindexError, Result};

const SECS_PER_DAY: i64 = 86_400;

/// A date constraint normalized to inclusive Unix-second bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatePredicate {
    after: Option<u64>,
    before: Option<u64>,
    /// `!=`: the excluded day, as an inclusive second range.
    exclude: Option<(u64, u64)>,
}

impl DatePredicate {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FindexError::MalformedQuery(
                "date: requires a value".to_string(),
            ));
        }

        if let Some(rest) = trimmed.strip_prefix(">=") {
            let (start, _) = day_bounds(rest.trim())?;
            return Ok(Self {
                after: Some(start),
                before: None,
                exclude: None,
            });
        }
        if let Some(rest) = trimmed.strip_prefix("!=") {
            let bounds = day_bounds(rest.trim())?;
            return Ok(Self {
                after: None,
                before: None,
                exclude: Some(bounds),
            });
        }
        if let Some(rest) = trimmed.strip_prefix("<=") {
            let (_, end) = day_bounds(rest.trim())?;
            return Ok(Self {
                after: None,
                before: Some(end),
                exclude: None,
            });
        }
        if let Some(rest) = trimmed.strip_prefix('>') {
            let (_, end) = day_bounds(rest.trim())?;
            return Ok(Self {
                after: Some(end.saturating_add(1)),
                before: None,
                exclude: None,
            });
        }
        if let Some(rest) = trimmed.strip_prefix('<') {
            let (start, _) = day_bounds(rest.trim())?;
            return Ok(Self {
                after: None,
                before: Some(start.saturating_sub(1)),
                exclude: None,
            });
        }

        if let Some(split) = trimmed.find("..") {
            let (start_raw, end_raw) = (trimmed[..split].trim(), trimmed[split + 2..].trim());
            let after = if start_raw.is_empty() {
                None
            } else {
                Some(day_bounds(start_raw)?.0)
            };
            let before = if end_raw.is_empty() {
                None
            } else {
                Some(day_bounds(end_raw)?.1)
            };
            if after.is_none() && before.is_none() {
                return Err(FindexError::MalformedQuery(
                    "date: range needs at least one bound".to_string(),
                ));
            }
            if let (Some(start), Some(end)) = (after, before) {
                if start > end {
                    return Err(FindexError::MalformedQuery(
                        "date: range start exceeds end".to_string(),
                    ));
                }
            }
            return Ok(Self {
                after,
                before,
                exclude: None,
            });
        }

        let (start, end) = day_bounds(trimmed)?;
        Ok(Self {
            after: Some(start),
            before: Some(end),
            exclude: None,
        })
    }

    pub fn matches(&self, timestamp: u64) -> bool {
        if let Some((start, end)) = self.exclude {
            if timestamp >= start && timestamp <= end {
                return false;
            }
        }
        if let Some(after) = self.after {
            if timestamp < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if timestamp > before {
                return false;
            }
        }
        true
    }
}

/// Returns the inclusive `[first second, last second]` Unix range of a day.
fn day_bounds(raw: &str) -> Result<(u64, u64)> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|error| {
        FindexError::MalformedQuery(format!("date: expected YYYY-MM-DD, got {raw:?}: {error}"))
    })?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| FindexError::Internal("midnight construction failed".to_string()))?
        .and_utc()
        .timestamp();
    let end = start + SECS_PER_DAY - 1;
    Ok((start.max(0) as u64, end.max(0) as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> u64 {
        day_bounds(raw).unwrap().0
    }

    #[test]
    fn bare_date_matches_whole_day() {
        let pred = DatePredicate::parse("2024-03-01").unwrap();
        assert!(pred.matches(ts("2024-03-01")));
        assert!(pred.matches(ts("2024-03-01") + SECS_PER_DAY as u64 - 1));
        assert!(!pred.matches(ts("2024-03-02")));
        assert!(!pred.matches(ts("2024-02-29")));
    }

    #[test]
    fn strict_comparisons_exclude_the_named_day() {
        let after = DatePredicate::parse(">2024-03-01").unwrap();
        assert!(!after.matches(ts("2024-03-01")));
        assert!(after.matches(ts("2024-03-02")));

        let before = DatePredicate::parse("<2024-03-01").unwrap();
        assert!(before.matches(ts("2024-02-29")));
        assert!(!before.matches(ts("2024-03-01")));
    }

    #[test]
    fn not_equal_excludes_the_whole_day() {
        let pred = DatePredicate::parse("!=2024-03-01").unwrap();
        assert!(!pred.matches(ts("2024-03-01")));
        assert!(!pred.matches(ts("2024-03-01") + SECS_PER_DAY as u64 - 1));
        assert!(pred.matches(ts("2024-02-29")));
        assert!(pred.matches(ts("2024-03-02")));
    }

    #[test]
    fn ranges_are_inclusive() {
        let pred = DatePredicate::parse("2024-01-01..2024-01-31").unwrap();
        assert!(pred.matches(ts("2024-01-01")));
        assert!(pred.matches(ts("2024-01-31")));
        assert!(!pred.matches(ts("2024-02-01")));
    }

    #[test]
    fn malformed_dates_rejected() {
        assert!(DatePredicate::parse("yesterday").is_err());
        assert!(DatePredicate::parse("2024-13-01").is_err());
        assert!(DatePredicate::parse("2024-02-01..2024-01-01").is_err());
    }
}
