use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Classification label of a message.
///
/// The set is closed: adding a category means retraining the model, every
/// `match` over it is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Spam,
    Ham,
    Notice,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Spam, Category::Ham, Category::Notice];

    /// Tie-break rank when two categories score the same; higher wins.
    /// Notices are surfaced rather than hidden when the model is unsure.
    pub fn precedence(self) -> u8 {
        match self {
            Category::Notice => 3,
            Category::Ham => 2,
            Category::Spam => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Spam => "spam",
            Category::Ham => "ham",
            Category::Notice => "notice",
        }
    }

    /// Map a corpus label onto a category. Unknown labels return `None` and
    /// must be counted by the caller, never guessed.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_lowercase().replace(['_', '-'], " ");
        match normalized.as_str() {
            "spam" => Some(Category::Spam),
            "ham" => Some(Category::Ham),
            "notice" | "university notice" | "official notice" => Some(Category::Notice),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::Spam => "SPAM",
            Category::Ham => "HAM",
            Category::Notice => "NOTICE",
        })
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::from_label(s).ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// An ingested message. Owned by the storage layer; the engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mapping() {
        assert_eq!(Category::from_label("Spam"), Some(Category::Spam));
        assert_eq!(Category::from_label(" ham "), Some(Category::Ham));
        assert_eq!(
            Category::from_label("University Notice"),
            Some(Category::Notice)
        );
        assert_eq!(
            Category::from_label("university_notice"),
            Some(Category::Notice)
        );
        assert_eq!(Category::from_label("newsletter"), None);
        assert_eq!(Category::from_label(""), None);
    }

    #[test]
    fn test_precedence_order() {
        assert!(Category::Notice.precedence() > Category::Ham.precedence());
        assert!(Category::Ham.precedence() > Category::Spam.precedence());
    }

    #[test]
    fn test_message_deserializes_without_timestamp() {
        let json = r#"{"id":"m1","sender":"a@b.edu","subject":"hi"}"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.body, "");
        assert_eq!(message.subject, "hi");
    }
}
