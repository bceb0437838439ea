//! Tenancy scope
//!
//! Two tracked applications share one relational schema; `AppScope` is the
//! discriminator threaded through every context-building step and every
//! generated SQL predicate. Tenant-specific vocabulary (the colloquial
//! ticket-status groupings the Jira board actually uses) is carried here as
//! data so the rest of the pipeline stays a single parameterized component.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which application's data a request is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppScope {
    Legacy,
    #[default]
    Pioneer,
}

/// One colloquial status grouping: terms users say, mapped to the literal
/// status strings present in the store.
#[derive(Debug, Clone, Copy)]
pub struct StatusGroup {
    /// How users phrase it ("closed", "done", ...).
    pub terms: &'static [&'static str],
    /// The exact `tickets.status` values that grouping covers.
    pub statuses: &'static [&'static str],
}

const TICKET_STATUS_GROUPS: &[StatusGroup] = &[
    StatusGroup {
        terms: &["closed", "completed", "done"],
        statuses: &[
            "Done",
            "Deployed",
            "Deoployed To Demo",
            "Deployed To Demo",
            "Deployed to Demo",
            "Ready For Deploy",
            "Ready For Release",
            "Ready for Release",
        ],
    },
    StatusGroup {
        terms: &["open", "todo", "pending"],
        statuses: &[
            "To Do",
            "Design To Do",
            "BLOCKED",
            "Blocked",
            "PUSHED BACK",
            "Pushed Back",
            "Need More Info",
            "No Response",
        ],
    },
    StatusGroup {
        terms: &["in progress", "active", "working"],
        statuses: &[
            "In Progress",
            "Code Review",
            "READY FOR REVIEW",
            "Ready for Review",
            "TESTING",
            "Testing",
            "APPROVED BY QA",
            "Approved by QA",
            "PRODUCT CHECK",
            "Product Check",
            "FEEDBACK",
        ],
    },
];

impl AppScope {
    /// The literal value stored in every table's `app_type` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            AppScope::Legacy => "legacy",
            AppScope::Pioneer => "pioneer",
        }
    }

    /// Human-facing team name used in prompts and summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            AppScope::Legacy => "Legacy",
            AppScope::Pioneer => "Pioneer",
        }
    }

    /// Parse a caller-supplied tag, defaulting to Pioneer for anything
    /// unrecognized (the API contract's default tenant).
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "legacy" => AppScope::Legacy,
            _ => AppScope::Pioneer,
        }
    }

    /// Colloquial-term to literal-status groupings for this tenant. Both
    /// boards currently share one Jira workflow, so the table is common;
    /// the accessor keeps the lookup scoped so a diverging workflow only
    /// touches this module.
    pub fn ticket_status_groups(&self) -> &'static [StatusGroup] {
        TICKET_STATUS_GROUPS
    }
}

impl fmt::Display for AppScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_defaults_to_pioneer() {
        assert_eq!(AppScope::parse("legacy"), AppScope::Legacy);
        assert_eq!(AppScope::parse("LEGACY "), AppScope::Legacy);
        assert_eq!(AppScope::parse("pioneer"), AppScope::Pioneer);
        assert_eq!(AppScope::parse("anything-else"), AppScope::Pioneer);
        assert_eq!(AppScope::default(), AppScope::Pioneer);
    }

    #[test]
    fn serde_round_trip_is_lowercase() {
        let json = serde_json::to_string(&AppScope::Legacy).unwrap();
        assert_eq!(json, "\"legacy\"");
        let back: AppScope = serde_json::from_str("\"pioneer\"").unwrap();
        assert_eq!(back, AppScope::Pioneer);
    }

    #[test]
    fn status_groups_cover_the_three_colloquial_buckets() {
        let groups = AppScope::Pioneer.ticket_status_groups();
        assert_eq!(groups.len(), 3);
        assert!(groups[0].terms.contains(&"closed"));
        assert!(groups[0].statuses.contains(&"Done"));
        assert!(groups[2].statuses.contains(&"Code Review"));
    }
}
