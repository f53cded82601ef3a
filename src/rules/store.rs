use super::{Rule, RuleKind, RuleSet};
use crate::error::RuleError;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Rule sets of all users.
///
/// Edits clone the user's set, change the clone and swap it in, so a
/// snapshot handed out earlier keeps reading the rules it started with.
#[derive(Debug, Default)]
pub struct RuleStore {
    sets: RwLock<HashMap<String, Arc<RuleSet>>>,
}

impl RuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rules of `user`, empty if the user has none.
    pub fn snapshot(&self, user: &str) -> Arc<RuleSet> {
        self.sets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user)
            .cloned()
            .unwrap_or_else(|| Arc::new(RuleSet::new(user)))
    }

    pub fn users(&self) -> Vec<String> {
        let sets = self.sets.read().unwrap_or_else(PoisonError::into_inner);
        let mut users: Vec<String> = sets.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn add_rule(&self, rule: Rule) -> Result<Arc<RuleSet>, RuleError> {
        let owner = rule.owner_user_id.clone();
        let description = rule.to_string();
        let updated = self.update(&owner, |set| set.insert(rule))?;
        log::info!("Added rule {description} for {owner}");
        Ok(updated)
    }

    pub fn remove_rule(
        &self,
        user: &str,
        kind: RuleKind,
        pattern: &str,
    ) -> Result<Rule, RuleError> {
        let mut removed = None;
        self.update(user, |set| {
            removed = Some(set.remove(kind, pattern)?);
            Ok(())
        })?;
        let removed = removed.ok_or_else(|| RuleError::NotFound {
            owner: user.to_string(),
            kind: kind.to_string(),
            pattern: pattern.to_string(),
        })?;
        log::info!("Removed rule {removed} for {user}");
        Ok(removed)
    }

    /// Install a whole set, e.g. one loaded from a rules file.
    pub fn replace(&self, set: RuleSet) -> Arc<RuleSet> {
        let set = Arc::new(set);
        self.sets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(set.owner().to_string(), Arc::clone(&set));
        set
    }

    /// The write lock is held across the clone and the edit so two concurrent
    /// edits of the same user cannot lose one another.
    fn update<F>(&self, user: &str, edit: F) -> Result<Arc<RuleSet>, RuleError>
    where
        F: FnOnce(&mut RuleSet) -> Result<(), RuleError>,
    {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = match sets.get(user) {
            Some(current) => RuleSet::clone(current),
            None => RuleSet::new(user),
        };
        edit(&mut next)?;
        let next = Arc::new(next);
        sets.insert(user.to_string(), Arc::clone(&next));
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use crate::rules::{RuleEffect, RuleEngine, RuleVerdict};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_unknown_user_has_empty_rules() {
        let store = RuleStore::new();
        let set = store.snapshot("nobody");
        assert!(set.is_empty());
        assert_eq!(set.owner(), "nobody");
        assert!(store.users().is_empty());
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_edits() {
        let store = RuleStore::new();
        store
            .add_rule(Rule::blacklist("alice", "lotto.xyz", at(1)))
            .unwrap();
        let before = store.snapshot("alice");

        store
            .add_rule(Rule::keyword("alice", RuleEffect::Block, "prize", at(2)))
            .unwrap();
        store
            .remove_rule("alice", RuleKind::Blacklist, "lotto.xyz")
            .unwrap();

        assert_eq!(before.len(), 1);
        let msg = Message::new("m", "win@lotto.xyz", "hello", "");
        assert!(matches!(
            RuleEngine::evaluate(&msg, &before),
            RuleVerdict::OverrideBlock(_)
        ));

        let after = store.snapshot("alice");
        assert_eq!(after.len(), 1);
        assert_eq!(RuleEngine::evaluate(&msg, &after), RuleVerdict::NoOverride);
    }

    #[test]
    fn test_failed_edit_leaves_rules_unchanged() {
        let store = RuleStore::new();
        store
            .add_rule(Rule::whitelist("alice", "univ.edu", at(1)))
            .unwrap();
        let before = store.snapshot("alice");

        assert!(matches!(
            store.add_rule(Rule::whitelist("alice", "UNIV.edu", at(2))),
            Err(RuleError::Duplicate { .. })
        ));
        assert!(matches!(
            store.remove_rule("alice", RuleKind::Blacklist, "univ.edu"),
            Err(RuleError::NotFound { .. })
        ));
        assert!(Arc::ptr_eq(&before, &store.snapshot("alice")));
    }

    #[test]
    fn test_users_are_isolated() {
        let store = RuleStore::new();
        store
            .add_rule(Rule::whitelist("alice", "univ.edu", at(1)))
            .unwrap();
        store
            .replace(RuleSet::from_lists("bob", "", "univ.edu", at(1)).unwrap());

        let msg = Message::new("m", "dean@univ.edu", "hi", "");
        assert!(matches!(
            RuleEngine::evaluate(&msg, &store.snapshot("alice")),
            RuleVerdict::OverrideAllow(_)
        ));
        assert!(matches!(
            RuleEngine::evaluate(&msg, &store.snapshot("bob")),
            RuleVerdict::OverrideBlock(_)
        ));
        assert_eq!(store.users(), vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn test_concurrent_edits_are_all_kept() {
        let store = Arc::new(RuleStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .add_rule(Rule::keyword(
                            "alice",
                            RuleEffect::Block,
                            &format!("word{i}"),
                            at(1),
                        ))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.snapshot("alice").len(), 8);
    }
}
