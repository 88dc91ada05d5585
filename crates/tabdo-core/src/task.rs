use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_TEXT_LEN: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Work,
    Personal,
    Shopping,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Work => "work",
            Category::Personal => "personal",
            Category::Shopping => "shopping",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "work" => Ok(Category::Work),
            "personal" => Ok(Category::Personal),
            "shopping" => Ok(Category::Shopping),
            other => Err(anyhow!("unknown category: {other}")),
        }
    }
}

/// A category tab: either one concrete category or the `all` pseudo-category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Category),
}

impl CategoryFilter {
    /// Tab order shown to users.
    pub const TABS: [CategoryFilter; 4] = [
        CategoryFilter::All,
        CategoryFilter::Only(Category::Personal),
        CategoryFilter::Only(Category::Work),
        CategoryFilter::Only(Category::Shopping),
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryFilter::All => "all",
            CategoryFilter::Only(category) => category.as_str(),
        }
    }

    pub fn matches(self, category: Category) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Only(wanted) => wanted == category,
        }
    }

    /// The concrete category a new task would be filed under.
    pub fn concrete(self) -> Result<Category, ValidationError> {
        match self {
            CategoryFilter::All => Err(ValidationError::NoCategory),
            CategoryFilter::Only(category) => Ok(category),
        }
    }
}

impl From<Category> for CategoryFilter {
    fn from(category: Category) -> Self {
        CategoryFilter::Only(category)
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CategoryFilter {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(CategoryFilter::All);
        }
        s.parse::<Category>().map(CategoryFilter::Only)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Task cannot be empty")]
    EmptyText,

    #[error("Task is too long (max {max} characters, got {len})")]
    TextTooLong { len: usize, max: usize },

    #[error("Please select a category")]
    NoCategory,
}

/// Trims `raw` and checks it against the task text rules.
pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyText);
    }
    let len = trimmed.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(ValidationError::TextTooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,

    pub text: String,

    #[serde(default)]
    pub completed: bool,

    pub category: Category,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::datetime::due_date_serde::option"
    )]
    pub due_date: Option<NaiveDate>,

    #[serde(skip)]
    pub is_editing: bool,
}

impl Task {
    pub fn new(text: String, category: Category, due_date: Option<NaiveDate>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            completed: false,
            category,
            due_date,
            is_editing: false,
        }
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.map(|due| due < today).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Category, CategoryFilter, MAX_TEXT_LEN, Task, ValidationError, validate_text};

    #[test]
    fn parses_filters_and_categories() {
        assert_eq!("all".parse::<CategoryFilter>().unwrap(), CategoryFilter::All);
        assert_eq!(
            " Work ".parse::<CategoryFilter>().unwrap(),
            CategoryFilter::Only(Category::Work)
        );
        assert!("all".parse::<Category>().is_err());
        assert!("groceries".parse::<CategoryFilter>().is_err());
    }

    #[test]
    fn all_is_not_a_concrete_category() {
        assert_eq!(
            CategoryFilter::All.concrete(),
            Err(ValidationError::NoCategory)
        );
        assert_eq!(
            CategoryFilter::Only(Category::Shopping).concrete(),
            Ok(Category::Shopping)
        );
    }

    #[test]
    fn text_is_trimmed_and_bounded() {
        assert_eq!(validate_text("  Buy milk \n").unwrap(), "Buy milk");
        assert_eq!(validate_text(" \t "), Err(ValidationError::EmptyText));

        let exact = "a".repeat(MAX_TEXT_LEN);
        assert!(validate_text(&exact).is_ok());

        let long = "é".repeat(MAX_TEXT_LEN + 1);
        assert_eq!(
            validate_text(&long),
            Err(ValidationError::TextTooLong {
                len: MAX_TEXT_LEN + 1,
                max: MAX_TEXT_LEN
            })
        );
    }

    #[test]
    fn new_tasks_get_distinct_ids() {
        let a = Task::new("a".to_string(), Category::Work, None);
        let b = Task::new("a".to_string(), Category::Work, None);
        assert_ne!(a.id, b.id);
        assert!(!a.completed);
        assert!(!a.is_editing);
        assert_eq!(a.short_id().len(), 8);
    }

    #[test]
    fn overdue_ignores_completed_tasks() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let mut task = Task::new("x".to_string(), Category::Personal, Some(yesterday));
        assert!(task.is_overdue(today));
        task.completed = true;
        assert!(!task.is_overdue(today));
    }
}
