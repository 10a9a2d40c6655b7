//! Priority bands for newly created tasks.
//!
//! Lower numbers run first. Production work sits in a configurable band, tests
//! after it, documentation last.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Production,
    Test,
    Documentation,
}

impl TaskKind {
    /// Classify a task by its target path first, then by description keywords.
    pub fn classify(description: &str, target: &str) -> Self {
        let target = target.to_lowercase();
        let file = target.rsplit('/').next().unwrap_or(&target);

        let is_doc_target = file.ends_with(".md")
            || file.ends_with(".rst")
            || file.ends_with(".txt")
            || target.starts_with("docs/")
            || target.contains("/docs/");
        if is_doc_target {
            return TaskKind::Documentation;
        }

        let is_test_target = target.starts_with("tests/")
            || target.contains("/tests/")
            || file.starts_with("test_")
            || file.contains("_test.")
            || file.contains(".test.")
            || file.contains(".spec.");
        if is_test_target {
            return TaskKind::Test;
        }

        let description = description.to_lowercase();
        let words: Vec<&str> = description
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if target.is_empty() {
            if words.iter().any(|w| matches!(*w, "document" | "documentation" | "readme" | "docs")) {
                return TaskKind::Documentation;
            }
            if words.iter().any(|w| matches!(*w, "test" | "tests" | "testing")) {
                return TaskKind::Test;
            }
        }
        TaskKind::Production
    }
}

fn default_production_min() -> u32 {
    10
}

fn default_production_max() -> u32 {
    80
}

fn default_production_default() -> u32 {
    50
}

fn default_tests() -> u32 {
    200
}

fn default_docs() -> u32 {
    300
}

/// `[priority_bands]` in `conductor.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityBands {
    #[serde(default = "default_production_min")]
    pub production_min: u32,
    #[serde(default = "default_production_max")]
    pub production_max: u32,
    #[serde(default = "default_production_default")]
    pub production_default: u32,
    #[serde(default = "default_tests")]
    pub tests: u32,
    #[serde(default = "default_docs")]
    pub docs: u32,
}

impl Default for PriorityBands {
    fn default() -> Self {
        Self {
            production_min: default_production_min(),
            production_max: default_production_max(),
            production_default: default_production_default(),
            tests: default_tests(),
            docs: default_docs(),
        }
    }
}

impl PriorityBands {
    /// Priority for a task of `kind`. A requested production priority is clamped into
    /// the production band; tests and docs always take their fixed slot.
    pub fn priority_for(&self, kind: TaskKind, requested: Option<u32>) -> u32 {
        match kind {
            TaskKind::Production => requested
                .unwrap_or(self.production_default)
                .clamp(self.production_min, self.production_max.max(self.production_min)),
            TaskKind::Test => self.tests,
            TaskKind::Documentation => self.docs,
        }
    }

    /// Classify and assign in one step.
    pub fn assign(&self, description: &str, target: &str, requested: Option<u32>) -> u32 {
        self.priority_for(TaskKind::classify(description, target), requested)
    }

    /// Problems that make the bands inconsistent.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.production_min > self.production_max {
            warnings.push(format!(
                "priority_bands.production_min ({}) exceeds production_max ({})",
                self.production_min, self.production_max
            ));
        }
        if !(self.production_min..=self.production_max).contains(&self.production_default) {
            warnings.push(format!(
                "priority_bands.production_default ({}) is outside {}..={}",
                self.production_default, self.production_min, self.production_max
            ));
        }
        if self.tests <= self.production_max {
            warnings.push("priority_bands.tests should sort after production work".to_string());
        }
        if self.docs <= self.tests {
            warnings.push("priority_bands.docs should sort after tests".to_string());
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_target() {
        assert_eq!(TaskKind::classify("write it", "README.md"), TaskKind::Documentation);
        assert_eq!(TaskKind::classify("write it", "docs/guide.html"), TaskKind::Documentation);
        assert_eq!(TaskKind::classify("x", "tests/store.rs"), TaskKind::Test);
        assert_eq!(TaskKind::classify("x", "src/test_parser.py"), TaskKind::Test);
        assert_eq!(TaskKind::classify("x", "src/app.test.ts"), TaskKind::Test);
        assert_eq!(TaskKind::classify("add tests", "src/store.rs"), TaskKind::Production);
    }

    #[test]
    fn test_classify_by_description_without_target() {
        assert_eq!(TaskKind::classify("Update documentation", ""), TaskKind::Documentation);
        assert_eq!(TaskKind::classify("Add tests for parser", ""), TaskKind::Test);
        assert_eq!(TaskKind::classify("Implement contest mode", ""), TaskKind::Production);
    }

    #[test]
    fn test_default_bands() {
        let bands = PriorityBands::default();
        assert_eq!(bands.assign("Implement store", "src/store.rs", None), 50);
        assert_eq!(bands.assign("Implement store", "src/store.rs", Some(5)), 10);
        assert_eq!(bands.assign("Implement store", "src/store.rs", Some(95)), 80);
        assert_eq!(bands.assign("Cover store", "tests/store.rs", Some(5)), 200);
        assert_eq!(bands.assign("Describe store", "docs/store.md", None), 300);
        assert!(bands.validate().is_empty());
    }

    #[test]
    fn test_validate_flags_inverted_bands() {
        let bands = PriorityBands {
            production_min: 90,
            production_max: 20,
            production_default: 50,
            tests: 10,
            docs: 5,
        };
        let warnings = bands.validate();
        assert_eq!(warnings.len(), 4);
    }
}
