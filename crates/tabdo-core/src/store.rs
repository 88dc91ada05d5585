use std::collections::HashSet;

use chrono::NaiveDate;
use serde_json::Value;
use tracing::{debug, warn};

use crate::task::{CategoryFilter, Task, ValidationError, validate_text};

/// Per-tab totals for the category overview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryCount {
    pub filter: CategoryFilter,
    pub total: usize,
    pub completed: usize,
}

/// Ordered in-memory task collection plus the UI state that goes with it.
///
/// Every mutation keeps two rules: ids stay unique, and at most one task is
/// in edit mode. Operations on an unknown id are no-ops.
#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    tasks: Vec<Task>,
    active_category: CategoryFilter,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from already-loaded tasks, dropping duplicate ids and
    /// clearing any edit flags.
    pub fn from_tasks(tasks: Vec<Task>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            if !seen.insert(task.id.clone()) {
                warn!(id = %task.id, "dropping task with duplicate id");
                continue;
            }
            task.is_editing = false;
            kept.push(task);
        }
        Self {
            tasks: kept,
            active_category: CategoryFilter::All,
        }
    }

    #[tracing::instrument(skip(blob), fields(bytes = blob.len()))]
    pub fn from_blob(blob: &str) -> Self {
        Self::from_tasks(deserialize_tasks(blob))
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == id)
    }

    /// Resolves an id prefix to a task when exactly one task matches.
    pub fn find_by_prefix(&self, prefix: &str) -> Option<&Task> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return None;
        }
        if let Some(exact) = self.get(prefix) {
            return Some(exact);
        }
        let mut matches = self.tasks.iter().filter(|task| task.id.starts_with(prefix));
        let first = matches.next()?;
        if matches.next().is_some() {
            None
        } else {
            Some(first)
        }
    }

    pub fn editing(&self) -> Option<&Task> {
        self.tasks.iter().find(|task| task.is_editing)
    }

    #[tracing::instrument(skip(self, text, category), fields(category = %category))]
    pub fn add_task(
        &mut self,
        text: &str,
        category: CategoryFilter,
        due_date: Option<NaiveDate>,
    ) -> Result<Task, ValidationError> {
        let text = validate_text(text)?;
        let category = category.concrete()?;

        let mut task = Task::new(text, category, due_date);
        while self.get(&task.id).is_some() {
            task = Task::new(task.text, task.category, task.due_date);
        }

        self.tasks.push(task.clone());
        debug!(id = %task.id, count = self.tasks.len(), "task added");
        Ok(task)
    }

    #[tracing::instrument(skip(self))]
    pub fn delete_task(&mut self, id: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|task| task.id != id);
        let removed = self.tasks.len() != before;
        debug!(removed, count = self.tasks.len(), "delete task");
        removed
    }

    /// Flips completion and returns the new value.
    #[tracing::instrument(skip(self))]
    pub fn toggle_complete(&mut self, id: &str) -> Option<bool> {
        let task = self.tasks.iter_mut().find(|task| task.id == id)?;
        task.completed = !task.completed;
        debug!(completed = task.completed, "toggled task");
        Some(task.completed)
    }

    /// Puts one task in edit mode and takes every other task out of it.
    #[tracing::instrument(skip(self))]
    pub fn start_edit(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            debug!("start edit on unknown id ignored");
            return false;
        }
        for task in &mut self.tasks {
            task.is_editing = task.id == id;
        }
        true
    }

    /// Applies an edit. Returns `false` when the text was rejected, in which
    /// case the edit is cancelled and the task keeps its previous values.
    #[tracing::instrument(skip(self, new_text))]
    pub fn save_edit(&mut self, id: &str, new_text: &str, new_due_date: Option<NaiveDate>) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == id) else {
            debug!("save edit on unknown id ignored");
            return false;
        };

        task.is_editing = false;
        match validate_text(new_text) {
            Ok(text) => {
                task.text = text;
                task.due_date = new_due_date;
                debug!("task updated");
                true
            }
            Err(err) => {
                debug!(error = %err, "edit rejected; keeping previous values");
                false
            }
        }
    }

    pub fn filter_by_category(&self, filter: CategoryFilter) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| filter.matches(task.category))
            .cloned()
            .collect()
    }

    pub fn active_category(&self) -> CategoryFilter {
        self.active_category
    }

    pub fn set_active_category(&mut self, filter: CategoryFilter) {
        self.active_category = filter;
    }

    /// Tasks under the active tab.
    pub fn visible(&self) -> Vec<Task> {
        self.filter_by_category(self.active_category)
    }

    pub fn category_counts(&self) -> Vec<CategoryCount> {
        CategoryFilter::TABS
            .iter()
            .map(|&filter| {
                let (total, completed) = self
                    .tasks
                    .iter()
                    .filter(|task| filter.matches(task.category))
                    .fold((0, 0), |(total, done), task| {
                        (total + 1, done + usize::from(task.completed))
                    });
                CategoryCount {
                    filter,
                    total,
                    completed,
                }
            })
            .collect()
    }

    pub fn serialize(&self) -> anyhow::Result<String> {
        serialize_tasks(&self.tasks)
    }
}

pub fn serialize_tasks(tasks: &[Task]) -> anyhow::Result<String> {
    Ok(serde_json::to_string(tasks)?)
}

/// Reads a persisted task blob. Anything unreadable degrades to an empty
/// list; individual bad entries are skipped.
#[tracing::instrument(skip(blob))]
pub fn deserialize_tasks(blob: &str) -> Vec<Task> {
    let trimmed = blob.trim();
    if trimmed.is_empty() {
        return vec![];
    }

    let entries = match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(entries)) => entries,
        Ok(other) => {
            warn!(kind = json_kind(&other), "task blob is not an array; starting empty");
            return vec![];
        }
        Err(err) => {
            warn!(error = %err, "task blob is malformed; starting empty");
            return vec![];
        }
    };

    let mut out = Vec::with_capacity(entries.len());
    for (idx, entry) in entries.into_iter().enumerate() {
        let mut task: Task = match serde_json::from_value(entry) {
            Ok(task) => task,
            Err(err) => {
                warn!(index = idx, error = %err, "skipping unreadable task entry");
                continue;
            }
        };
        match validate_text(&task.text) {
            Ok(text) => task.text = text,
            Err(err) => {
                warn!(index = idx, id = %task.id, error = %err, "skipping task with invalid text");
                continue;
            }
        }
        out.push(task);
    }

    debug!(count = out.len(), "deserialized tasks");
    out
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use proptest::prelude::*;

    use super::{TaskStore, deserialize_tasks};
    use crate::task::{Category, CategoryFilter, MAX_TEXT_LEN, ValidationError};

    fn shopping() -> CategoryFilter {
        CategoryFilter::Only(Category::Shopping)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[test]
    fn buy_milk_scenario() {
        let mut store = TaskStore::new();
        let task = store.add_task("Buy milk", shopping(), None).expect("add");
        assert_eq!(store.len(), 1);
        assert_eq!(task.category, Category::Shopping);
        assert!(!task.completed);
        assert!(!task.is_editing);

        assert_eq!(store.toggle_complete(&task.id), Some(true));
        assert!(store.get(&task.id).expect("task").completed);

        assert!(
            store
                .filter_by_category(CategoryFilter::Only(Category::Work))
                .is_empty()
        );

        assert!(store.delete_task(&task.id));
        assert!(store.is_empty());
    }

    #[test]
    fn add_rejects_invalid_input_without_mutation() {
        let mut store = TaskStore::new();
        assert_eq!(
            store.add_task("   ", shopping(), None),
            Err(ValidationError::EmptyText)
        );
        assert!(matches!(
            store.add_task(&"x".repeat(MAX_TEXT_LEN + 1), shopping(), None),
            Err(ValidationError::TextTooLong { .. })
        ));
        assert_eq!(
            store.add_task("Buy milk", CategoryFilter::All, None),
            Err(ValidationError::NoCategory)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn add_trims_and_keeps_insertion_order() {
        let mut store = TaskStore::new();
        let first = store.add_task("  first ", shopping(), None).expect("add");
        let second = store
            .add_task("second", CategoryFilter::Only(Category::Work), None)
            .expect("add");
        let third = store.add_task("third", shopping(), None).expect("add");

        assert_eq!(first.text, "first");
        let all: Vec<String> = store
            .filter_by_category(CategoryFilter::All)
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(all, vec![first.id.clone(), second.id, third.id.clone()]);

        let only_shopping: Vec<String> = store
            .filter_by_category(shopping())
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(only_shopping, vec![first.id, third.id]);
    }

    #[test]
    fn unknown_ids_are_no_ops() {
        let mut store = TaskStore::new();
        store.add_task("a", shopping(), None).expect("add");

        assert!(!store.delete_task("missing"));
        assert_eq!(store.toggle_complete("missing"), None);
        assert!(!store.start_edit("missing"));
        assert!(!store.save_edit("missing", "new", None));
        assert_eq!(store.len(), 1);
        assert!(store.editing().is_none());
    }

    #[test]
    fn only_one_task_edits_at_a_time() {
        let mut store = TaskStore::new();
        let a = store.add_task("a", shopping(), None).expect("add");
        let b = store.add_task("b", shopping(), None).expect("add");

        assert!(store.start_edit(&a.id));
        assert!(store.start_edit(&b.id));

        let editing: Vec<&str> = store
            .tasks()
            .iter()
            .filter(|task| task.is_editing)
            .map(|task| task.id.as_str())
            .collect();
        assert_eq!(editing, vec![b.id.as_str()]);
    }

    #[test]
    fn save_edit_updates_text_and_due_date() {
        let mut store = TaskStore::new();
        let task = store
            .add_task("draft", shopping(), Some(date(2026, 10, 20)))
            .expect("add");
        store.start_edit(&task.id);

        assert!(store.save_edit(&task.id, "  final  ", None));
        let saved = store.get(&task.id).expect("task");
        assert_eq!(saved.text, "final");
        assert_eq!(saved.due_date, None);
        assert!(!saved.is_editing);
    }

    #[test]
    fn blank_edit_cancels_and_keeps_values() {
        let mut store = TaskStore::new();
        let due = Some(date(2026, 11, 1));
        let task = store.add_task("keep me", shopping(), due).expect("add");
        store.start_edit(&task.id);

        assert!(!store.save_edit(&task.id, "   ", None));
        let after = store.get(&task.id).expect("task");
        assert_eq!(after.text, "keep me");
        assert_eq!(after.due_date, due);
        assert!(!after.is_editing);
    }

    #[test]
    fn prefix_lookup_requires_unique_match() {
        let mut store = TaskStore::new();
        let task = store.add_task("a", shopping(), None).expect("add");
        assert_eq!(
            store.find_by_prefix(task.short_id()).map(|t| t.id.as_str()),
            Some(task.id.as_str())
        );
        assert!(store.find_by_prefix("").is_none());
        assert!(store.find_by_prefix("not-an-id").is_none());
    }

    #[test]
    fn active_category_drives_visible_tasks() {
        let mut store = TaskStore::new();
        store.add_task("milk", shopping(), None).expect("add");
        store
            .add_task("report", CategoryFilter::Only(Category::Work), None)
            .expect("add");

        assert_eq!(store.active_category(), CategoryFilter::All);
        assert_eq!(store.visible().len(), 2);

        store.set_active_category(CategoryFilter::Only(Category::Work));
        let visible = store.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].text, "report");
    }

    #[test]
    fn category_counts_follow_tab_order() {
        let mut store = TaskStore::new();
        let milk = store.add_task("milk", shopping(), None).expect("add");
        store.add_task("eggs", shopping(), None).expect("add");
        store
            .add_task("gym", CategoryFilter::Only(Category::Personal), None)
            .expect("add");
        store.toggle_complete(&milk.id);

        let counts: Vec<(&str, usize, usize)> = store
            .category_counts()
            .into_iter()
            .map(|c| (c.filter.as_str(), c.total, c.completed))
            .collect();
        assert_eq!(
            counts,
            vec![
                ("all", 3, 1),
                ("personal", 1, 0),
                ("work", 0, 0),
                ("shopping", 2, 1),
            ]
        );
    }

    #[test]
    fn round_trip_preserves_fields_and_resets_editing() {
        let mut store = TaskStore::new();
        let a = store
            .add_task("milk", shopping(), Some(date(2026, 12, 24)))
            .expect("add");
        let b = store
            .add_task("report", CategoryFilter::Only(Category::Work), None)
            .expect("add");
        store.toggle_complete(&b.id);
        store.start_edit(&a.id);

        let blob = store.serialize().expect("serialize");
        assert!(!blob.contains("isEditing"));
        assert!(blob.contains("\"dueDate\":\"2026-12-24\""));

        let restored = TaskStore::from_blob(&blob);
        assert_eq!(restored.len(), 2);
        let ra = restored.get(&a.id).expect("a");
        assert_eq!(ra.text, "milk");
        assert_eq!(ra.category, Category::Shopping);
        assert_eq!(ra.due_date, Some(date(2026, 12, 24)));
        assert!(!ra.completed);
        assert!(!ra.is_editing);
        let rb = restored.get(&b.id).expect("b");
        assert!(rb.completed);
        assert_eq!(rb.due_date, None);
    }

    #[test]
    fn malformed_blobs_degrade_to_empty() {
        assert!(deserialize_tasks("").is_empty());
        assert!(deserialize_tasks("not json").is_empty());
        assert!(deserialize_tasks("{\"id\":\"x\"}").is_empty());
        assert!(deserialize_tasks("null").is_empty());
    }

    #[test]
    fn bad_entries_are_skipped() {
        let blob = r#"[
            {"id":"1","text":"ok","completed":false,"category":"work"},
            {"id":"2","text":"bad category","completed":false,"category":"all"},
            {"id":"3","text":"   ","completed":false,"category":"work"},
            {"id":"1","text":"duplicate","completed":true,"category":"personal"}
        ]"#;
        let store = TaskStore::from_blob(blob);
        assert_eq!(store.len(), 1);
        assert_eq!(store.tasks()[0].text, "ok");
    }

    #[test]
    fn reads_legacy_browser_blob() {
        let blob = r#"[{"id":"1760850000000","text":"Buy milk","completed":true,
            "category":"shopping","isEditing":true,"dueDate":"2026-10-25T12:00:00.000Z"}]"#;
        let store = TaskStore::from_blob(blob);
        let task = store.get("1760850000000").expect("task");
        assert!(task.completed);
        assert!(!task.is_editing);
        assert!(task.due_date.is_some());
    }

    fn category_strategy() -> impl Strategy<Value = Category> {
        prop_oneof![
            Just(Category::Work),
            Just(Category::Personal),
            Just(Category::Shopping),
        ]
    }

    proptest! {
        #[test]
        fn valid_add_grows_by_one(text in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,98}", category in category_strategy()) {
            let mut store = TaskStore::new();
            store.add_task("seed", CategoryFilter::Only(Category::Work), None).expect("seed");
            let before = store.len();
            let task = store.add_task(&text, category.into(), None).expect("valid add");
            prop_assert_eq!(store.len(), before + 1);
            prop_assert!(!task.completed);
            prop_assert!(!task.is_editing);
            prop_assert_eq!(task.category, category);
        }

        #[test]
        fn toggle_twice_is_identity(count in 1usize..8, pick in 0usize..8) {
            let mut store = TaskStore::new();
            for n in 0..count {
                store.add_task(&format!("task {n}"), shopping(), None).expect("add");
            }
            let id = store.tasks()[pick % count].id.clone();
            let before = store.get(&id).expect("task").completed;
            store.toggle_complete(&id);
            store.toggle_complete(&id);
            prop_assert_eq!(store.get(&id).expect("task").completed, before);
        }

        #[test]
        fn serialize_round_trips(
            entries in proptest::collection::vec(
                ("[a-z][a-z ]{0,20}", category_strategy(), any::<bool>(), proptest::option::of(0u32..2000)),
                0..10
            )
        ) {
            let mut store = TaskStore::new();
            for (text, category, completed, offset) in &entries {
                let due = offset.map(|days| date(2026, 1, 1) + chrono::Duration::days(i64::from(days)));
                let task = store.add_task(text, (*category).into(), due).expect("add");
                if *completed {
                    store.toggle_complete(&task.id);
                }
            }
            let restored = TaskStore::from_blob(&store.serialize().expect("serialize"));
            prop_assert_eq!(restored.tasks(), store.tasks());
        }
    }
}
