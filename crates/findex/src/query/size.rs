//! Size predicate parsing and matching for the `size:` filter.

use crate::error::{FindexError, Result};

/// A size constraint normalized to inclusive byte bounds.
///
/// Grammar: comparisons (`>`, `>=`, `<`, `<=`, `=`, `!=`), ranges `a..b`
/// (either end open), or a bare literal meaning exact. Literals accept
/// unit suffixes (b, kb, mb, gb, tb).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePredicate {
    min: Option<u64>,
    max: Option<u64>,
    exclude: Option<u64>,
}

impl SizePredicate {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(FindexError::MalformedQuery(
                "size: requires a value".to_string(),
            ));
        }

        for (operator, build) in COMPARISONS {
            if let Some(rest) = trimmed.strip_prefix(operator) {
                let value = parse_size_literal(rest.trim())?;
                return Ok(build(value));
            }
        }

        if let Some(split) = trimmed.find("..") {
            let (start_raw, end_raw) = (trimmed[..split].trim(), trimmed[split + 2..].trim());
            if start_raw.is_empty() && end_raw.is_empty() {
                return Err(FindexError::MalformedQuery(
                    "size: range needs at least one bound".to_string(),
                ));
            }
            let min = if start_raw.is_empty() {
                None
            } else {
                Some(parse_size_literal(start_raw)?)
            };
            let max = if end_raw.is_empty() {
                None
            } else {
                Some(parse_size_literal(end_raw)?)
            };
            if let (Some(start), Some(end)) = (min, max) {
                if start > end {
                    return Err(FindexError::MalformedQuery(
                        "size: range start exceeds end".to_string(),
                    ));
                }
            }
            return Ok(Self {
                min,
                max,
                exclude: None,
            });
        }

        let exact = parse_size_literal(trimmed)?;
        Ok(Self {
            min: Some(exact),
            max: Some(exact),
            exclude: None,
        })
    }

    pub fn matches(&self, size: u64) -> bool {
        if self.exclude == Some(size) {
            return false;
        }
        if let Some(min) = self.min {
            if size < min {
                return false;
            }
        }
        if let Some(max) = self.max {
            if size > max {
                return false;
            }
        }
        true
    }
}

type Build = fn(u64) -> SizePredicate;

// Two-character operators first so ">=" is not parsed as ">" then "=1..".
const COMPARISONS: [(&str, Build); 6] = [
    (">=", |value| SizePredicate {
        min: Some(value),
        max: None,
        exclude: None,
    }),
    ("<=", |value| SizePredicate {
        min: None,
        max: Some(value),
        exclude: None,
    }),
    ("!=", |value| SizePredicate {
        min: None,
        max: None,
        exclude: Some(value),
    }),
    (">", |value| SizePredicate {
        min: Some(value.saturating_add(1)),
        max: None,
        exclude: None,
    }),
    ("<", |value| SizePredicate {
        min: None,
        max: Some(value.saturating_sub(1)),
        exclude: None,
    }),
    ("=", |value| SizePredicate {
        min: Some(value),
        max: Some(value),
        exclude: None,
    }),
];

fn parse_size_literal(raw: &str) -> Result<u64> {
    if raw.is_empty() {
        return Err(FindexError::MalformedQuery(
            "size: expected a number".to_string(),
        ));
    }

    let split = raw
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit() && *ch != '.')
        .map(|(index, _)| index)
        .unwrap_or(raw.len());
    let (number_part, unit_part) = raw.split_at(split);
    if number_part.is_empty() {
        return Err(FindexError::MalformedQuery(format!(
            "size: expected a numeric value in {raw:?}"
        )));
    }

    let value: f64 = number_part.parse().map_err(|_| {
        FindexError::MalformedQuery(format!("size: failed to parse number in {raw:?}"))
    })?;
    let multiplier = unit_multiplier(unit_part)?;
    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 0.0 {
        return Err(FindexError::MalformedQuery(format!(
            "size: value {raw:?} is out of range"
        )));
    }
    if bytes > u64::MAX as f64 {
        Ok(u64::MAX)
    } else {
        Ok(bytes as u64)
    }
}

fn unit_multiplier(unit: &str) -> Result<u64> {
    match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => Ok(1),
        "k" | "kb" | "kib" => Ok(1024),
        "m" | "mb" | "mib" => Ok(1024 * 1024),
        "g" | "gb" | "gib" => Ok(1024 * 1024 * 1024),
        "t" | "tb" | "tib" => Ok(1024_u64.pow(4)),
        _ => Err(FindexError::MalformedQuery(format!(
            "size: unknown unit {unit:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons() {
        let gt = SizePredicate::parse(">10kb").unwrap();
        assert!(!gt.matches(10 * 1024));
        assert!(gt.matches(10 * 1024 + 1));

        let lte = SizePredicate::parse("<=1mb").unwrap();
        assert!(lte.matches(1024 * 1024));
        assert!(!lte.matches(1024 * 1024 + 1));
    }

    #[test]
    fn ranges_and_open_ends() {
        let range = SizePredicate::parse("1kb..2kb").unwrap();
        assert!(range.matches(1500));
        assert!(!range.matches(999));
        assert!(!range.matches(3000));

        let open = SizePredicate::parse("..4kb").unwrap();
        assert!(open.matches(0));
        assert!(!open.matches(5000));
    }

    #[test]
    fn not_equal_excludes_exact_value() {
        let pred = SizePredicate::parse("!=1kb").unwrap();
        assert!(!pred.matches(1024));
        assert!(pred.matches(1023));
        assert!(pred.matches(1025));
    }

    #[test]
    fn bare_literal_is_exact() {
        let exact = SizePredicate::parse("512").unwrap();
        assert!(exact.matches(512));
        assert!(!exact.matches(513));
    }

    #[test]
    fn inverted_range_rejected() {
        assert!(SizePredicate::parse("2kb..1kb").is_err());
        assert!(SizePredicate::parse("").is_err());
        assert!(SizePredicate::parse(">banana").is_err());
    }

    #[test]
    fn fractional_units() {
        let pred = SizePredicate::parse(">=1.5kb").unwrap();
        assert!(pred.matches(1536));
        assert!(!pred.matches(1535));
    }
}
