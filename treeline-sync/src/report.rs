//! Reporter: collects findings from every phase into one structured result.
//!
//! Findings with the same severity and message are merged; their affected
//! paths accumulate in insertion order. The final [`SyncReport`] lists
//! errors first, then warnings, then info.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// Why a node could not be reconciled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvableCause {
    /// A recreated entity would collide with a same-named source entity.
    NameCollision,
    /// The previous parent chain of a protected entity is gone.
    ParentMissing,
    /// The previous parent exists but is excluded from this run.
    ParentExcluded,
    /// A protected entity's previous name is held by another entity.
    NameTaken,
}

/// Everything the engine can report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    ProjectIgnored,
    DuplicateName { name: String },
    InvalidName,
    InvalidTaskName,
    Ignored,
    IdentityConflict,
    RenamedBack,
    MovedBack,
    Unresolvable(UnresolvableCause),
    Recreated,
    Restored,
    OrphanedWorkProducts,
}

impl Finding {
    pub fn severity(&self) -> Severity {
        match self {
            Finding::ProjectIgnored
            | Finding::DuplicateName { .. }
            | Finding::InvalidName
            | Finding::Unresolvable(_) => Severity::Error,
            Finding::InvalidTaskName
            | Finding::IdentityConflict
            | Finding::RenamedBack
            | Finding::MovedBack => Severity::Warning,
            Finding::Ignored
            | Finding::Recreated
            | Finding::Restored
            | Finding::OrphanedWorkProducts => Severity::Info,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Finding::ProjectIgnored => {
                "Project is flagged to be ignored; nothing was synchronized".to_string()
            }
            Finding::DuplicateName { name } => format!("Multiple entities have name \"{name}\""),
            Finding::InvalidName => "Entity name contains characters that are not allowed".to_string(),
            Finding::InvalidTaskName => "Task name contains characters that are not allowed".to_string(),
            Finding::Ignored => "Entity and its children were skipped (ignore flag set)".to_string(),
            Finding::IdentityConflict => {
                "Several entities point at the same target entity; the best match was kept"
                    .to_string()
            }
            Finding::RenamedBack => {
                "Entity renamed back: its name can't change once it or its children have published work"
                    .to_string()
            }
            Finding::MovedBack => {
                "Entity moved back in hierarchy: its parent can't change once it or its children have published work"
                    .to_string()
            }
            Finding::Unresolvable(UnresolvableCause::NameCollision) => {
                "Entity not synchronizable: it can't be recreated because an entity with the same name exists elsewhere"
                    .to_string()
            }
            Finding::Unresolvable(UnresolvableCause::ParentMissing) => {
                "Entity not synchronizable: its parent can't change due to published work and the previous parent was not found"
                    .to_string()
            }
            Finding::Unresolvable(UnresolvableCause::NameTaken) => {
                "Entity not synchronizable: its name can't change due to published work and the previous name is used by another entity"
                    .to_string()
            }
            Finding::Unresolvable(UnresolvableCause::ParentExcluded) => {
                "Entity not synchronizable: its previous parent is excluded from this run".to_string()
            }
            Finding::Recreated => {
                "Deleted entity was recreated because it (or its children) has published work"
                    .to_string()
            }
            Finding::Restored => "Archived entity was restored".to_string(),
            Finding::OrphanedWorkProducts => {
                "Work products without an owning entity were removed".to_string()
            }
        }
    }
}

/// One report line: a message and every entity path it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportItem {
    pub severity: Severity,
    pub message: String,
    pub paths: Vec<String>,
}

impl ReportItem {
    /// Paths joined for single-line display.
    pub fn joined_paths(&self) -> String {
        self.paths.join(", ")
    }
}

/// Final structured result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub title: String,
    pub items: Vec<ReportItem>,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.items.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn items_of(&self, severity: Severity) -> impl Iterator<Item = &ReportItem> {
        self.items.iter().filter(move |i| i.severity == severity)
    }

    /// The item carrying `finding`'s message, if it was reported.
    pub fn find(&self, finding: &Finding) -> Option<&ReportItem> {
        let message = finding.message();
        self.items
            .iter()
            .find(|i| i.severity == finding.severity() && i.message == message)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Accumulates findings during a run.
#[derive(Debug, Default)]
pub struct Reporter {
    items: Vec<ReportItem>,
    index: HashMap<(Severity, String), usize>,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding, path: impl Into<String>) {
        self.push_many(finding, [path.into()]);
    }

    pub fn push_many<I>(&mut self, finding: Finding, paths: I)
    where
        I: IntoIterator<Item = String>,
    {
        let severity = finding.severity();
        let message = finding.message();
        let slot = match self.index.get(&(severity, message.clone())) {
            Some(&slot) => slot,
            None => {
                self.items.push(ReportItem {
                    severity,
                    message: message.clone(),
                    paths: Vec::new(),
                });
                let slot = self.items.len() - 1;
                self.index.insert((severity, message.clone()), slot);
                slot
            }
        };
        for path in paths {
            match severity {
                Severity::Error => tracing::error!(path = %path, "{message}"),
                Severity::Warning => tracing::warn!(path = %path, "{message}"),
                Severity::Info => tracing::info!(path = %path, "{message}"),
            }
            let item = &mut self.items[slot];
            if !item.paths.contains(&path) {
                item.paths.push(path);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consume the reporter into a report ordered error → warning → info.
    pub fn finish(self, title: impl Into<String>) -> SyncReport {
        let mut items = self.items;
        items.sort_by_key(|i| i.severity);
        SyncReport {
            title: title.into(),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_message_merges_paths() {
        let mut reporter = Reporter::new();
        reporter.push(Finding::InvalidName, "Seq01/sh 010");
        reporter.push(Finding::InvalidName, "Seq02/sh-020");
        reporter.push(Finding::InvalidName, "Seq01/sh 010");
        let report = reporter.finish("t");
        assert_eq!(report.items.len(), 1);
        assert_eq!(report.items[0].paths, vec!["Seq01/sh 010", "Seq02/sh-020"]);
        assert_eq!(report.items[0].joined_paths(), "Seq01/sh 010, Seq02/sh-020");
    }

    #[test]
    fn duplicates_are_reported_per_name() {
        let mut reporter = Reporter::new();
        reporter.push_many(
            Finding::DuplicateName { name: "shotA".into() },
            vec!["Seq01/shotA".to_string(), "Seq02/shotA".to_string()],
        );
        reporter.push(Finding::DuplicateName { name: "shotB".into() }, "Seq01/shotB");
        let report = reporter.finish("t");
        assert_eq!(report.items.len(), 2);
        assert!(report.items[0].message.contains("shotA"));
        assert_eq!(report.items[0].paths.len(), 2);
    }

    #[test]
    fn finish_orders_by_severity() {
        let mut reporter = Reporter::new();
        reporter.push(Finding::Recreated, "Seq01/Shot030");
        reporter.push(Finding::RenamedBack, "Seq01/Shot010");
        reporter.push(Finding::InvalidName, "bad name");
        let report = reporter.finish("Synchronization report");
        let order: Vec<Severity> = report.items.iter().map(|i| i.severity).collect();
        assert_eq!(order, vec![Severity::Error, Severity::Warning, Severity::Info]);
        assert!(report.has_errors());
    }

    #[test]
    fn json_uses_lowercase_severity() {
        let mut reporter = Reporter::new();
        reporter.push(Finding::MovedBack, "Seq01/Shot010");
        let json = reporter.finish("t").to_json().unwrap();
        assert!(json.contains("\"severity\": \"warning\""));
        assert!(json.contains("Seq01/Shot010"));
    }
}
