use crate::classifier::ResultSource;
use crate::message::Category;
use crate::priority::{PriorityDecision, PriorityLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// Point-in-time copy of the triage counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsSnapshot {
    pub total_decisions: u64,
    pub per_category: BTreeMap<Category, u64>,
    pub per_priority: BTreeMap<PriorityLevel, u64>,
    pub allow_overrides: u64,
    pub block_overrides: u64,
    /// Overrides that agreed with the classifier.
    pub agreeing_overrides: u64,
    pub demotions: u64,
    pub extraction_failures: u64,
    pub untrained_requests: u64,
    pub start_time: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl StatisticsSnapshot {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            total_decisions: 0,
            per_category: Category::ALL.iter().map(|c| (*c, 0)).collect(),
            per_priority: PriorityLevel::all().map(|l| (l, 0)).collect(),
            allow_overrides: 0,
            block_overrides: 0,
            agreeing_overrides: 0,
            demotions: 0,
            extraction_failures: 0,
            untrained_requests: 0,
            start_time: now,
            last_updated: now,
        }
    }

    /// Share of decisions that came from a rule override, in [0, 1].
    pub fn override_rate(&self) -> f64 {
        if self.total_decisions == 0 {
            0.0
        } else {
            (self.allow_overrides + self.block_overrides) as f64 / self.total_decisions as f64
        }
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Triage statistics since {}\n",
            self.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out.push_str(&format!("  Decisions: {}\n", self.total_decisions));
        for (category, count) in &self.per_category {
            out.push_str(&format!("    {:<7} {count}\n", category.to_string()));
        }
        out.push_str("  Priority levels:\n");
        for (level, count) in &self.per_priority {
            out.push_str(&format!("    {level}: {count}\n"));
        }
        out.push_str(&format!(
            "  Overrides: {} allow, {} block ({:.1}% of decisions, {} agreeing with the model)\n",
            self.allow_overrides,
            self.block_overrides,
            self.override_rate() * 100.0,
            self.agreeing_overrides
        ));
        out.push_str(&format!("  Low-confidence demotions: {}\n", self.demotions));
        out.push_str(&format!(
            "  Failures: {} extraction, {} before a model was ready\n",
            self.extraction_failures, self.untrained_requests
        ));
        out
    }
}

/// Thread-safe counters over every decision the engine produced.
#[derive(Debug)]
pub struct TriageStatistics {
    inner: Mutex<StatisticsSnapshot>,
}

impl Default for TriageStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageStatistics {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatisticsSnapshot::new()),
        }
    }

    pub fn record(&self, decision: &PriorityDecision) {
        self.update(|stats| {
            stats.total_decisions += 1;
            *stats.per_category.entry(decision.category).or_insert(0) += 1;
            *stats.per_priority.entry(decision.priority_level).or_insert(0) += 1;
            if decision.is_override() {
                match decision.category {
                    Category::Spam => stats.block_overrides += 1,
                    Category::Ham | Category::Notice => stats.allow_overrides += 1,
                }
            }
            if decision.source == ResultSource::ModelAndRule {
                stats.agreeing_overrides += 1;
            }
            if decision.demoted {
                stats.demotions += 1;
            }
        });
    }

    pub fn record_extraction_failure(&self) {
        self.update(|stats| stats.extraction_failures += 1);
    }

    pub fn record_untrained_request(&self) {
        self.update(|stats| stats.untrained_requests += 1);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn reset(&self) {
        self.update(|stats| *stats = StatisticsSnapshot::new());
    }

    fn update<F: FnOnce(&mut StatisticsSnapshot)>(&self, f: F) {
        let mut stats = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut stats);
        stats.last_updated = Utc::now();
    }
}
