//! Rule evaluation against a single message.
//!
//! Order of precedence:
//! 1. sender whitelist (trusted sender always wins)
//! 2. sender blacklist
//! 3. keyword rules over subject and body
//!
//! Within one stage the most recently created matching rule decides.

use super::{CompiledRule, Rule, RuleEffect, RuleKind, RuleSet};
use crate::domain_utils::DomainUtils;
use crate::message::Message;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStage {
    Sender,
    Content,
}

/// The rules behind an override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub stage: MatchStage,
    /// The rule that decided the verdict.
    pub winner: Rule,
    /// Every rule of the deciding stage and effect that matched, most recent
    /// first. Includes `winner`.
    pub matched: Vec<Rule>,
    /// Matching rules that lost to a higher-precedence stage or a more
    /// recent rule, most recent first.
    pub overridden: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleVerdict {
    OverrideAllow(RuleMatch),
    OverrideBlock(RuleMatch),
    NoOverride,
}

impl RuleVerdict {
    pub fn rule_match(&self) -> Option<&RuleMatch> {
        match self {
            RuleVerdict::OverrideAllow(m) | RuleVerdict::OverrideBlock(m) => Some(m),
            RuleVerdict::NoOverride => None,
        }
    }

    pub fn is_override(&self) -> bool {
        self.rule_match().is_some()
    }
}

pub struct RuleEngine;

impl RuleEngine {
    /// Evaluate a user's rule snapshot against a message. Pure: the result
    /// depends only on the message and the rules, which are never modified.
    pub fn evaluate(message: &Message, rules: &RuleSet) -> RuleVerdict {
        let sender = DomainUtils::extract_address(&message.sender);
        let text = format!("{}\n{}", message.subject, message.body).to_lowercase();

        let mut whitelist = Vec::new();
        let mut blacklist = Vec::new();
        let mut keywords = Vec::new();

        for compiled in rules.compiled() {
            match compiled.rule.kind {
                RuleKind::Whitelist => {
                    if compiled.matches_sender(&sender) {
                        whitelist.push(compiled);
                    }
                }
                RuleKind::Blacklist => {
                    if compiled.matches_sender(&sender) {
                        blacklist.push(compiled);
                    }
                }
                RuleKind::Keyword { .. } => {
                    if compiled.matches_text(&text) {
                        keywords.push(compiled);
                    }
                }
            }
        }

        for group in [&mut whitelist, &mut blacklist, &mut keywords] {
            group.sort_by(|a, b| b.recency().cmp(&a.recency()));
        }

        let verdict = if !whitelist.is_empty() {
            let overridden = blacklist.iter().chain(keywords.iter()).copied();
            Self::verdict(MatchStage::Sender, &whitelist, overridden)
        } else if !blacklist.is_empty() {
            Self::verdict(MatchStage::Sender, &blacklist, keywords.iter().copied())
        } else if let Some(latest) = keywords.first() {
            // keyword rules share one kind, so the newest decides the effect
            let effect = latest.rule.kind.effect();
            let (deciding, losing): (Vec<&CompiledRule>, Vec<&CompiledRule>) = keywords
                .iter()
                .copied()
                .partition(|c| c.rule.kind.effect() == effect);
            Self::verdict(MatchStage::Content, &deciding, losing.into_iter())
        } else {
            RuleVerdict::NoOverride
        };

        if let Some(rule_match) = verdict.rule_match() {
            log::debug!(
                "Message {} matched {} rule(s) of {}, winner: {}",
                message.id,
                rule_match.matched.len() + rule_match.overridden.len(),
                rules.owner(),
                rule_match.winner
            );
        }
        verdict
    }

    /// `deciding` is non-empty and sorted most recent first.
    fn verdict<'a>(
        stage: MatchStage,
        deciding: &[&'a CompiledRule],
        overridden: impl Iterator<Item = &'a CompiledRule>,
    ) -> RuleVerdict {
        let Some(first) = deciding.first() else {
            return RuleVerdict::NoOverride;
        };
        let mut overridden: Vec<&CompiledRule> = overridden.collect();
        overridden.sort_by(|a, b| b.recency().cmp(&a.recency()));

        let rule_match = RuleMatch {
            stage,
            winner: first.rule.clone(),
            matched: deciding.iter().map(|c| c.rule.clone()).collect(),
            overridden: overridden.into_iter().map(|c| c.rule.clone()).collect(),
        };
        match first.rule.kind.effect() {
            RuleEffect::Allow => RuleVerdict::OverrideAllow(rule_match),
            RuleEffect::Block => RuleVerdict::OverrideBlock(rule_match),
        }
    }
}
