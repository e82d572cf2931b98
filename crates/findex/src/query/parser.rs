//! Query string tokenizer and filter-token parsing.

use serde::Deserialize;

use super::date::DatePredicate;
use super::size::SizePredicate;
use super::text::has_wildcards;

/// How a name matcher compares against entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherKind {
    /// Plain word: substring match, ranked exact > prefix > substring.
    Word,
    /// Quoted phrase: single token, may contain whitespace.
    Phrase,
    /// Contains `*`/`?` metacharacters.
    Wildcard,
}

/// A single name matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub text: String,
    pub kind: MatcherKind,
}

/// A non-fatal problem with one token, reported alongside the results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    pub token: String,
    pub message: String,
}

/// Result ordering. `Relevance` is the ranked default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortSpec {
    #[default]
    Relevance,
    Name,
    ModifiedDesc,
    SizeDesc,
}

/// `status:` filter values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Resident,
    OnlineOnly,
    Stale,
}

/// `provider:` filter. `None` means local entries (no provider tag).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFilter {
    pub name: Option<String>,
}

/// A parsed search query: ordered matchers plus structured filters.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub matchers: Vec<Matcher>,
    pub case_sensitive: bool,
    pub provider: Option<ProviderFilter>,
    pub status: Option<StatusFilter>,
    pub size: Option<SizePredicate>,
    pub date: Option<DatePredicate>,
    pub sort: SortSpec,
    pub warnings: Vec<ParseWarning>,
}

impl SearchQuery {
    /// Parses a raw query string. Never fails: malformed filter tokens are
    /// recorded as warnings and the rest of the query still applies.
    pub fn parse(raw: &str, case_sensitive: bool) -> Self {
        let mut query = Self {
            matchers: Vec::new(),
            case_sensitive,
            provider: None,
            status: None,
            size: None,
            date: None,
            sort: SortSpec::default(),
            warnings: Vec::new(),
        };

        for token in tokenize(raw, &mut query.warnings) {
            match token {
                Token::Phrase(text) => {
                    if !text.is_empty() {
                        query.matchers.push(Matcher {
                            text,
                            kind: MatcherKind::Phrase,
                        });
                    }
                }
                Token::Word(text) => query.consume_word(text),
            }
        }

        query
    }

    /// True when the query has no matchers and no filters; matches everything.
    pub fn is_match_all(&self) -> bool {
        self.matchers.is_empty()
            && self.provider.is_none()
            && self.status.is_none()
            && self.size.is_none()
            && self.date.is_none()
    }

    fn consume_word(&mut self, raw: String) {
        let Some(split) = raw.find(':') else {
            self.push_matcher(raw);
            return;
        };
        if split == 0 {
            self.push_matcher(raw);
            return;
        }

        let name = raw[..split].to_ascii_lowercase();
        let argument = raw[split + 1..].trim();
        match name.as_str() {
            "provider" => match parse_provider(argument) {
                Ok(filter) => self.provider = Some(filter),
                Err(message) => self.warn(raw, message),
            },
            "status" => match parse_status(argument) {
                Ok(filter) => self.status = Some(filter),
                Err(message) => self.warn(raw, message),
            },
            "size" => match SizePredicate::parse(argument) {
                Ok(predicate) => self.size = Some(predicate),
                Err(error) => self.warn(raw, error.to_string()),
            },
            "date" => match DatePredicate::parse(argument) {
                Ok(predicate) => self.date = Some(predicate),
                Err(error) => self.warn(raw, error.to_string()),
            },
            // Unknown prefixes are ordinary text, like "re:invoice".
            _ => self.push_matcher(raw),
        }
    }

    fn push_matcher(&mut self, text: String) {
        if text.is_empty() {
            return;
        }
        let kind = if has_wildcards(&text) {
            MatcherKind::Wildcard
        } else {
            MatcherKind::Word
        };
        self.matchers.push(Matcher { text, kind });
    }

    fn warn(&mut self, token: String, message: String) {
        log::debug!("query filter token {token:?} rejected: {message}");
        self.warnings.push(ParseWarning { token, message });
    }
}

fn parse_provider(argument: &str) -> std::result::Result<ProviderFilter, String> {
    if argument.is_empty() {
        return Err("provider: requires a provider name".to_string());
    }
    let normalized = argument.to_ascii_lowercase();
    if normalized == "local" {
        Ok(ProviderFilter { name: None })
    } else {
        Ok(ProviderFilter {
            name: Some(normalized),
        })
    }
}

fn parse_status(argument: &str) -> std::result::Result<StatusFilter, String> {
    match argument.to_ascii_lowercase().as_str() {
        "resident" => Ok(StatusFilter::Resident),
        "online-only" | "onlineonly" => Ok(StatusFilter::OnlineOnly),
        "stale" => Ok(StatusFilter::Stale),
        "" => Err("status: requires a value".to_string()),
        other => Err(format!(
            "status: expected resident, online-only or stale, got {other:?}"
        )),
    }
}

enum Token {
    Word(String),
    Phrase(String),
}

fn tokenize(input: &str, warnings: &mut Vec<ParseWarning>) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut cursor = 0usize;

    while cursor < input.len() {
        let rest = &input[cursor..];
        let Some(ch) = rest.chars().next() else {
            break;
        };
        if ch.is_whitespace() {
            cursor += ch.len_utf8();
            continue;
        }

        if ch == '"' {
            let (phrase, next_cursor, closed) = consume_quoted_phrase(input, cursor);
            if !closed {
                warnings.push(ParseWarning {
                    token: input[cursor..].to_string(),
                    message: "missing closing quote".to_string(),
                });
            }
            tokens.push(Token::Phrase(phrase));
            cursor = next_cursor;
            continue;
        }

        let mut end = cursor;
        while end < input.len() {
            let Some(next) = input[end..].chars().next() else {
                break;
            };
            if next.is_whitespace() {
                break;
            }
            end += next.len_utf8();
        }
        tokens.push(Token::Word(input[cursor..end].to_string()));
        cursor = end;
    }

    tokens
}

/// Consumes a quoted phrase starting at the opening quote. Returns the
/// phrase, the cursor past it, and whether the closing quote was found.
fn consume_quoted_phrase(input: &str, start: usize) -> (String, usize, bool) {
    let mut cursor = start + 1;
    let mut phrase = String::new();
    let mut escaped = false;

    while cursor < input.len() {
        let Some(ch) = input[cursor..].chars().next() else {
            break;
        };
        cursor += ch.len_utf8();

        if escaped {
            phrase.push(ch);
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '"' {
            return (phrase, cursor, true);
        }
        phrase.push(ch);
    }

    (phrase, cursor, false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_phrases() {
        let query = SearchQuery::parse(r#"report "annual summary" notes"#, false);
        assert_eq!(query.matchers.len(), 3);
        assert_eq!(query.matchers[0].kind, MatcherKind::Word);
        assert_eq!(query.matchers[1].text, "annual summary");
        assert_eq!(query.matchers[1].kind, MatcherKind::Phrase);
        assert!(query.warnings.is_empty());
    }

    #[test]
    fn wildcards_detected() {
        let query = SearchQuery::parse("rep*.txt dra?t", false);
        assert!(query
            .matchers
            .iter()
            .all(|matcher| matcher.kind == MatcherKind::Wildcard));
    }

    #[test]
    fn structured_filters() {
        let query = SearchQuery::parse("report provider:dropbox status:stale size:>1mb", false);
        assert_eq!(query.matchers.len(), 1);
        assert_eq!(
            query.provider,
            Some(ProviderFilter {
                name: Some("dropbox".to_string())
            })
        );
        assert_eq!(query.status, Some(StatusFilter::Stale));
        assert!(query.size.is_some());
    }

    #[test]
    fn provider_local_means_untagged() {
        let query = SearchQuery::parse("provider:local", false);
        assert_eq!(query.provider, Some(ProviderFilter { name: None }));
    }

    #[test]
    fn malformed_filter_becomes_warning_not_error() {
        let query = SearchQuery::parse("report size:banana date:2024-01-01", false);
        // The malformed size filter is dropped, the rest still applies.
        assert_eq!(query.matchers.len(), 1);
        assert!(query.size.is_none());
        assert!(query.date.is_some());
        assert_eq!(query.warnings.len(), 1);
        assert_eq!(query.warnings[0].token, "size:banana");
    }

    #[test]
    fn unknown_colon_prefix_is_text() {
        let query = SearchQuery::parse("re:invoice", false);
        assert_eq!(query.matchers.len(), 1);
        assert_eq!(query.matchers[0].text, "re:invoice");
        assert!(query.warnings.is_empty());
    }

    #[test]
    fn unclosed_quote_warns_and_keeps_phrase() {
        let query = SearchQuery::parse("\"half open", false);
        assert_eq!(query.matchers.len(), 1);
        assert_eq!(query.matchers[0].text, "half open");
        assert_eq!(query.warnings.len(), 1);
    }

    #[test]
    fn empty_query_matches_all() {
        assert!(SearchQuery::parse("", false).is_match_all());
        assert!(!SearchQuery::parse("status:stale", false).is_match_all());
    }
}
