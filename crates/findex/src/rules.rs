//! Path rule engine: include/exclude rules evaluated against canonical paths.
//!
//! Rules are exact strings, globs or regexes, each tagged include or exclude.
//! Exclude wins over include, and an excluded directory prunes its entire
//! subtree from both watching and indexing. Repeated evaluations are O(1)
//! amortized through a bounded decision cache keyed on ruleset version.

use std::collections::HashMap;
use std::path::Path;

use globset::{Glob, GlobMatcher};
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{FindexError, Result};

/// Whether a matching rule admits or rejects a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleEffect {
    Include,
    Exclude,
}

#[derive(Debug, Clone)]
enum RulePattern {
    Exact(String),
    Glob(GlobMatcher),
    Regex(Regex),
}

/// A single include/exclude rule.
///
/// Malformed glob/regex patterns fail closed at construction: they are
/// rejected with `InvalidInput` and never enter a ruleset, so evaluation
/// can never observe a bad rule.
#[derive(Debug, Clone)]
pub struct PathRule {
    pattern: RulePattern,
    effect: RuleEffect,
}

impl PathRule {
    pub fn exact(path: impl Into<String>, effect: RuleEffect) -> Self {
        Self {
            pattern: RulePattern::Exact(path.into()),
            effect,
        }
    }

    pub fn glob(pattern: &str, effect: RuleEffect) -> Result<Self> {
        let matcher = Glob::new(pattern)
            .map_err(|error| {
                log::warn!("rejecting malformed glob rule {pattern:?}: {error}");
                FindexError::InvalidInput(format!("malformed glob rule {pattern:?}: {error}"))
            })?
            .compile_matcher();
        Ok(Self {
            pattern: RulePattern::Glob(matcher),
            effect,
        })
    }

    pub fn regex(pattern: &str, effect: RuleEffect) -> Result<Self> {
        let regex = Regex::new(pattern).map_err(|error| {
            log::warn!("rejecting malformed regex rule {pattern:?}: {error}");
            FindexError::InvalidInput(format!("malformed regex rule {pattern:?}: {error}"))
        })?;
        Ok(Self {
            pattern: RulePattern::Regex(regex),
            effect,
        })
    }

    pub fn effect(&self) -> RuleEffect {
        self.effect
    }

    fn hits(&self, path: &str) -> bool {
        match &self.pattern {
            RulePattern::Exact(exact) => path == exact,
            RulePattern::Glob(glob) => glob.is_match(path),
            RulePattern::Regex(regex) => regex.is_match(path),
        }
    }
}

/// Two-generation approximate LRU: when the active map fills up it becomes
/// the previous generation and a fresh active map takes over. Hits in the
/// previous generation are promoted. Keeps insert/lookup O(1) with a hard
/// bound of `2 * capacity` cached decisions.
#[derive(Debug, Default)]
struct DecisionCache {
    active: HashMap<String, bool>,
    previous: HashMap<String, bool>,
}

const DECISION_CACHE_CAPACITY: usize = 8192;

impl DecisionCache {
    fn get(&mut self, path: &str) -> Option<bool> {
        if let Some(decision) = self.active.get(path) {
            return Some(*decision);
        }
        let decision = self.previous.get(path).copied()?;
        self.insert(path.to_string(), decision);
        Some(decision)
    }

    fn insert(&mut self, path: String, decision: bool) {
        if self.active.len() >= DECISION_CACHE_CAPACITY {
            self.previous = std::mem::take(&mut self.active);
        }
        self.active.insert(path, decision);
    }

    fn clear(&mut self) {
        self.active.clear();
        self.previous.clear();
    }
}

/// An ordered set of path rules with a version counter.
///
/// Replacing the rules bumps the version and invalidates the decision cache
/// wholesale.
#[derive(Debug)]
pub struct RuleSet {
    rules: Vec<PathRule>,
    has_includes: bool,
    version: u64,
    cache: Mutex<DecisionCache>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl RuleSet {
    /// A ruleset with no rules; every path is admitted.
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(rules: Vec<PathRule>) -> Self {
        let has_includes = rules
            .iter()
            .any(|rule| rule.effect() == RuleEffect::Include);
        Self {
            rules,
            has_includes,
            version: 1,
            cache: Mutex::new(DecisionCache::default()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Replaces the rules, bumping the version and dropping cached decisions.
    pub fn set_rules(&mut self, rules: Vec<PathRule>) {
        self.has_includes = rules
            .iter()
            .any(|rule| rule.effect() == RuleEffect::Include);
        self.rules = rules;
        self.version += 1;
        self.cache.lock().clear();
    }

    /// Whether the path is admitted by the rules.
    ///
    /// Exclude rules win, and apply to the path and every ancestor so an
    /// excluded directory rejects its whole subtree. With no include rules
    /// everything not excluded is admitted; with include rules a path must
    /// additionally hit at least one of them.
    pub fn matches(&self, path: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        let mut cache = self.cache.lock();
        if let Some(decision) = cache.get(path) {
            return decision;
        }
        let decision = self.evaluate(path);
        cache.insert(path.to_string(), decision);
        decision
    }

    /// Whether a directory may be descended into. Include rules are not
    /// consulted here: an included file may live below a directory no
    /// include rule names, so only excludes prune traversal.
    pub fn allows_descent(&self, dir: &str) -> bool {
        !self.excluded(dir)
    }

    fn evaluate(&self, path: &str) -> bool {
        if self.excluded(path) {
            return false;
        }
        if !self.has_includes {
            return true;
        }
        self.rules
            .iter()
            .filter(|rule| rule.effect() == RuleEffect::Include)
            .any(|rule| rule.hits(path))
    }

    fn excluded(&self, path: &str) -> bool {
        let excludes: Vec<&PathRule> = self
            .rules
            .iter()
            .filter(|rule| rule.effect() == RuleEffect::Exclude)
            .collect();
        if excludes.is_empty() {
            return false;
        }
        for ancestor in Path::new(path).ancestors() {
            let Some(candidate) = ancestor.to_str() else {
                continue;
            };
            if candidate.is_empty() {
                break;
            }
            if excludes.iter().any(|rule| rule.hits(candidate)) {
                return true;
            }
        }
        false
    }
}
