//! Per-user whitelist, blacklist and keyword overrides.

pub mod engine;
pub mod store;

pub use engine::{MatchStage, RuleEngine, RuleMatch, RuleVerdict};
pub use store::RuleStore;

use crate::domain_utils::DomainUtils;
use crate::error::RuleError;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a matching rule lets a message through or blocks it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleEffect {
    Allow,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Trusted sender address or domain.
    Whitelist,
    /// Blocked sender address or domain.
    Blacklist,
    /// Text searched in subject and body.
    Keyword { effect: RuleEffect },
}

impl RuleKind {
    pub fn effect(self) -> RuleEffect {
        match self {
            RuleKind::Whitelist => RuleEffect::Allow,
            RuleKind::Blacklist => RuleEffect::Block,
            RuleKind::Keyword { effect } => effect,
        }
    }

    pub fn is_sender_rule(self) -> bool {
        match self {
            RuleKind::Whitelist | RuleKind::Blacklist => true,
            RuleKind::Keyword { .. } => false,
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Whitelist => write!(f, "whitelist"),
            RuleKind::Blacklist => write!(f, "blacklist"),
            RuleKind::Keyword {
                effect: RuleEffect::Allow,
            } => write!(f, "keyword allow"),
            RuleKind::Keyword {
                effect: RuleEffect::Block,
            } => write!(f, "keyword block"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub owner_user_id: String,
    pub kind: RuleKind,
    pub pattern: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Rule {
    pub fn new(owner: &str, kind: RuleKind, pattern: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            owner_user_id: owner.to_string(),
            kind,
            pattern: pattern.to_string(),
            created_at,
        }
    }

    pub fn whitelist(owner: &str, pattern: &str, created_at: DateTime<Utc>) -> Self {
        Self::new(owner, RuleKind::Whitelist, pattern, created_at)
    }

    pub fn blacklist(owner: &str, pattern: &str, created_at: DateTime<Utc>) -> Self {
        Self::new(owner, RuleKind::Blacklist, pattern, created_at)
    }

    pub fn keyword(
        owner: &str,
        effect: RuleEffect,
        pattern: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self::new(owner, RuleKind::Keyword { effect }, pattern, created_at)
    }

    fn match_key(&self) -> String {
        match_key(self.kind, &self.pattern)
    }
}

/// `/expr/` marks a regex pattern.
fn regex_body(trimmed: &str) -> Option<&str> {
    trimmed
        .strip_prefix('/')
        .and_then(|rest| rest.strip_suffix('/'))
        .filter(|expr| !expr.is_empty())
}

/// A sender pattern with a local part names one address, anything else a
/// domain. `@univ.edu` and `univ.edu` are the same domain.
fn sender_matcher(lower: &str) -> Matcher {
    if lower.starts_with('@') || !lower.contains('@') {
        Matcher::Domain(lower.trim_start_matches('@').to_string())
    } else {
        Matcher::Address(DomainUtils::extract_address(lower))
    }
}

/// What duplicate detection and removal compare: the target the pattern
/// compiles to, not its spelling.
fn match_key(kind: RuleKind, pattern: &str) -> String {
    let lower = pattern.trim().to_lowercase();
    if !kind.is_sender_rule() || regex_body(&lower).is_some() {
        return lower;
    }
    match sender_matcher(&lower) {
        Matcher::Address(target) | Matcher::Domain(target) => target,
        Matcher::Substring(_) | Matcher::Regex(_) => lower,
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\"", self.kind, self.pattern.trim())
    }
}

/// How a rule pattern is tested.
#[derive(Debug, Clone)]
enum Matcher {
    Address(String),
    Domain(String),
    Substring(String),
    Regex(Regex),
}

impl Matcher {
    fn compile(kind: RuleKind, pattern: &str) -> Result<Self, RuleError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() || trimmed == "@" {
            return Err(RuleError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        if let Some(expr) = regex_body(trimmed) {
            // content is "subject\nbody", so ^ and $ anchor at each line
            let regex = RegexBuilder::new(expr)
                .case_insensitive(true)
                .multi_line(true)
                .build()
                .map_err(|e| RuleError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
            return Ok(Matcher::Regex(regex));
        }

        let lower = trimmed.to_lowercase();
        Ok(match kind {
            RuleKind::Whitelist | RuleKind::Blacklist => sender_matcher(&lower),
            RuleKind::Keyword { .. } => Matcher::Substring(lower),
        })
    }

    /// `sender` is a bare lowercase address, `text` is lowercase content.
    fn matches_sender(&self, sender: &str) -> bool {
        match self {
            Matcher::Address(address) => sender == address,
            Matcher::Domain(domain) => sender
                .rsplit_once('@')
                .is_some_and(|(_, host)| DomainUtils::matches_domain(host, domain)),
            Matcher::Substring(needle) => sender.contains(needle.as_str()),
            Matcher::Regex(regex) => regex.is_match(sender),
        }
    }

    fn matches_text(&self, text: &str) -> bool {
        match self {
            Matcher::Substring(needle) => text.contains(needle.as_str()),
            Matcher::Regex(regex) => regex.is_match(text),
            Matcher::Address(address) => text.contains(address.as_str()),
            Matcher::Domain(domain) => text.contains(domain.as_str()),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledRule {
    pub(crate) rule: Rule,
    matcher: Matcher,
    /// Insertion order, breaks ties between equal `created_at`.
    pub(crate) sequence: u64,
}

impl CompiledRule {
    pub(crate) fn matches_sender(&self, sender: &str) -> bool {
        self.matcher.matches_sender(sender)
    }

    pub(crate) fn matches_text(&self, text: &str) -> bool {
        self.matcher.matches_text(text)
    }

    /// Recency key: later `created_at` first, then later insertion.
    pub(crate) fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.rule.created_at, self.sequence)
    }
}

/// Validated, compiled rules of one user. Cloned and swapped as a whole by
/// [`RuleStore`], never edited while an evaluation reads it.
#[derive(Debug, Clone)]
pub struct RuleSet {
    owner: String,
    rules: Vec<CompiledRule>,
    next_sequence: u64,
}

impl RuleSet {
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            rules: Vec::new(),
            next_sequence: 0,
        }
    }

    pub fn from_rules<I>(owner: &str, rules: I) -> Result<Self, RuleError>
    where
        I: IntoIterator<Item = Rule>,
    {
        let mut set = Self::new(owner);
        for rule in rules {
            set.insert(rule)?;
        }
        Ok(set)
    }

    /// Build a set from comma-separated whitelist and blacklist entries, the
    /// format user preferences are stored in.
    pub fn from_lists(
        owner: &str,
        whitelist: &str,
        blacklist: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, RuleError> {
        let entries = |list: &str| -> Vec<String> {
            list.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect()
        };

        let mut set = Self::new(owner);
        for entry in entries(whitelist) {
            set.insert(Rule::whitelist(owner, &entry, created_at))?;
        }
        for entry in entries(blacklist) {
            set.insert(Rule::blacklist(owner, &entry, created_at))?;
        }
        Ok(set)
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().map(|compiled| &compiled.rule)
    }

    pub(crate) fn compiled(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn contains(&self, kind: RuleKind, pattern: &str) -> bool {
        let wanted = match_key(kind, pattern);
        self.rules
            .iter()
            .any(|c| c.rule.kind == kind && c.rule.match_key() == wanted)
    }

    pub fn insert(&mut self, rule: Rule) -> Result<(), RuleError> {
        if rule.owner_user_id != self.owner {
            return Err(RuleError::ForeignOwner {
                expected: self.owner.clone(),
                found: rule.owner_user_id,
            });
        }
        if self.contains(rule.kind, &rule.pattern) {
            return Err(RuleError::Duplicate {
                owner: rule.owner_user_id,
                kind: rule.kind.to_string(),
                pattern: rule.pattern,
            });
        }

        let matcher = Matcher::compile(rule.kind, &rule.pattern)?;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.rules.push(CompiledRule {
            rule,
            matcher,
            sequence,
        });
        Ok(())
    }

    pub fn remove(&mut self, kind: RuleKind, pattern: &str) -> Result<Rule, RuleError> {
        let wanted = match_key(kind, pattern);
        let position = self
            .rules
            .iter()
            .position(|c| c.rule.kind == kind && c.rule.match_key() == wanted)
            .ok_or_else(|| RuleError::NotFound {
                owner: self.owner.clone(),
                kind: kind.to_string(),
                pattern: pattern.to_string(),
            })?;
        Ok(self.rules.remove(position).rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_duplicate_rules_are_rejected() {
        let mut set = RuleSet::new("alice");
        set.insert(Rule::whitelist("alice", "registrar@univ.edu", at(1)))
            .unwrap();

        let err = set
            .insert(Rule::whitelist("alice", " Registrar@UNIV.edu ", at(2)))
            .unwrap_err();
        assert!(matches!(err, RuleError::Duplicate { .. }));

        // same pattern under another kind is a different rule
        set.insert(Rule::blacklist("alice", "registrar@univ.edu", at(3)))
            .unwrap();
        set.insert(Rule::keyword("alice", RuleEffect::Block, "lottery", at(4)))
            .unwrap();
        set.insert(Rule::keyword("alice", RuleEffect::Allow, "lottery", at(5)))
            .unwrap();
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_domain_spellings_are_duplicates() {
        let mut set = RuleSet::new("alice");
        set.insert(Rule::whitelist("alice", "univ.edu", at(1))).unwrap();

        let err = set
            .insert(Rule::whitelist("alice", "@Univ.edu", at(2)))
            .unwrap_err();
        assert!(matches!(err, RuleError::Duplicate { .. }));
        assert!(set.contains(RuleKind::Whitelist, "@univ.edu"));

        // an address at the domain is still its own rule
        set.insert(Rule::whitelist("alice", "dean@univ.edu", at(3)))
            .unwrap();
        let removed = set.remove(RuleKind::Whitelist, "@univ.edu").unwrap();
        assert_eq!(removed.pattern, "univ.edu");
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_rules_of_other_users_are_rejected() {
        let mut set = RuleSet::new("alice");
        let err = set
            .insert(Rule::whitelist("bob", "x@y.edu", at(1)))
            .unwrap_err();
        assert_eq!(
            err,
            RuleError::ForeignOwner {
                expected: "alice".to_string(),
                found: "bob".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_patterns_are_rejected() {
        let mut set = RuleSet::new("alice");
        assert!(matches!(
            set.insert(Rule::keyword("alice", RuleEffect::Block, "   ", at(1))),
            Err(RuleError::InvalidPattern { .. })
        ));
        assert!(matches!(
            set.insert(Rule::keyword("alice", RuleEffect::Block, "/(unclosed/", at(1))),
            Err(RuleError::InvalidPattern { .. })
        ));
        assert!(set.is_empty());
    }

    #[test]
    fn test_from_lists() {
        let set = RuleSet::from_lists(
            "alice",
            "registrar@univ.edu, @library.univ.edu,",
            "lotto.xyz",
            at(1),
        )
        .unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.contains(RuleKind::Whitelist, "@library.univ.edu"));
        assert!(set.contains(RuleKind::Blacklist, "LOTTO.xyz"));
    }

    #[test]
    fn test_remove() {
        let mut set = RuleSet::new("alice");
        set.insert(Rule::blacklist("alice", "spam.biz", at(1))).unwrap();
        let removed = set.remove(RuleKind::Blacklist, "SPAM.biz").unwrap();
        assert_eq!(removed.pattern, "spam.biz");
        assert!(matches!(
            set.remove(RuleKind::Blacklist, "spam.biz"),
            Err(RuleError::NotFound { .. })
        ));
    }

    #[test]
    fn test_sender_matchers() {
        let address = Matcher::compile(RuleKind::Whitelist, "Registrar@Univ.edu").unwrap();
        assert!(address.matches_sender("registrar@univ.edu"));
        assert!(!address.matches_sender("dean@univ.edu"));

        let domain = Matcher::compile(RuleKind::Blacklist, "@lotto.xyz").unwrap();
        assert!(domain.matches_sender("win@lotto.xyz"));
        assert!(domain.matches_sender("win@mail.lotto.xyz"));
        assert!(!domain.matches_sender("win@notlotto.xyz"));

        let regex = Matcher::compile(RuleKind::Blacklist, r"/^no-?reply@/").unwrap();
        assert!(regex.matches_sender("noreply@shop.com"));
    }

    #[test]
    fn test_regex_anchors_match_each_line() {
        let kind = RuleKind::Keyword {
            effect: RuleEffect::Block,
        };
        let starts = Matcher::compile(kind, r"/^unsubscribe/").unwrap();
        assert!(starts.matches_text("weekly digest\nunsubscribe below"));
        assert!(!starts.matches_text("weekly digest\nplease unsubscribe"));

        let ends = Matcher::compile(kind, r"/digest$/").unwrap();
        assert!(ends.matches_text("weekly digest\nbody text"));
    }

    #[test]
    fn test_rule_kind_serde_shape() {
        let yaml = "owner_user_id: alice\n\
                    kind:\n  type: keyword\n  effect: block\n\
                    pattern: lottery\n\
                    created_at: 2024-09-01T00:00:00Z\n";
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            rule.kind,
            RuleKind::Keyword {
                effect: RuleEffect::Block
            }
        );
        assert_eq!(rule.to_string(), "keyword block \"lottery\"");
    }
}
