//! Guarded publication of finished product directories.
//!
//! Several conversions may finish for the same product at nearly the same
//! time (EPUB extraction and outline structuring, or two retries of the same
//! job). Each wants to upload the product directory and purge the local copy.
//! The [`Coordinator`] serialises that step with a per-product lock in a
//! shared [`StatusStore`] and exposes per-task status records so workers can
//! wait for their siblings. Product codes that are not a single path segment
//! are refused before any store or file is touched.
//!
//! ```text
//! set_status(doing) ─▶ lock ──ok─────────────────────────▶ upload ─▶ delete local ─▶ set_status(success)
//!                       │                                   │
//!                       └─busy─▶ every poll: lock ──ok──────┘   upload failed ─▶ set_status(fail)
//!                                        │
//!                                        └─budget spent─▶ set_status(fail)
//!                                           (PublicationTimeout while awaited tasks run,
//!                                            LockUnavailable once they are all terminal)
//! ```
//!
//! Every path past the product-code check writes a terminal status, and a
//! lock is only ever released by the call that acquired it.

pub mod coordinator;
pub mod remote;
pub mod store;

pub use coordinator::{Coordinator, PublishOutcome};
pub use remote::{HttpObjectStore, LocalObjectStore, ObjectStore};
pub use store::{MemoryStore, RedisStore, StatusStore};

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Doing,
    Success,
    Fail,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Doing => "doing",
            TaskStatus::Success => "success",
            TaskStatus::Fail => "fail",
        }
    }

    /// `success` and `fail` end a task; `doing` does not.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Doing)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "doing" => Ok(TaskStatus::Doing),
            "success" => Ok(TaskStatus::Success),
            "fail" => Ok(TaskStatus::Fail),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Kind of work tracked per product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    EpubToMd,
    PdfToMd,
    MdToJsonStructure,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::EpubToMd => "epub-to-md",
            TaskKind::PdfToMd => "pdf-to-md",
            TaskKind::MdToJsonStructure => "md-to-json-structure",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "epub-to-md" => Ok(TaskKind::EpubToMd),
            "pdf-to-md" => Ok(TaskKind::PdfToMd),
            "md-to-json-structure" => Ok(TaskKind::MdToJsonStructure),
            other => Err(format!("unknown task kind '{other}'")),
        }
    }
}

/// Latest state of one `(product, task)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub status: TaskStatus,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(status: TaskStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }

    /// Hash fields as stored.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            ("status", self.status.as_str().to_string()),
            ("message", self.message.clone()),
            ("updated_at", self.updated_at.to_rfc3339()),
        ]
    }

    /// Parse stored hash fields. An empty hash means "no record".
    pub fn from_fields(
        key: &str,
        fields: &HashMap<String, String>,
    ) -> Result<Option<Self>, StoreError> {
        if fields.is_empty() {
            return Ok(None);
        }
        let corrupt = |detail: String| StoreError::Corrupt {
            key: key.to_string(),
            detail,
        };

        let status = fields
            .get("status")
            .ok_or_else(|| corrupt("missing 'status'".into()))?
            .parse::<TaskStatus>()
            .map_err(corrupt)?;
        let message = fields.get("message").cloned().unwrap_or_default();
        let updated_at = match fields.get("updated_at") {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map_err(|e| corrupt(format!("bad 'updated_at': {e}")))?
                .with_timezone(&Utc),
            None => return Err(corrupt("missing 'updated_at'".into())),
        };

        Ok(Some(Self {
            status,
            message,
            updated_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_strings() {
        for kind in [TaskKind::EpubToMd, TaskKind::PdfToMd, TaskKind::MdToJsonStructure] {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
        }
        assert_eq!(
            serde_json::to_string(&TaskKind::MdToJsonStructure).unwrap(),
            "\"md-to-json-structure\""
        );
        assert_eq!(serde_json::to_string(&TaskStatus::Fail).unwrap(), "\"fail\"");
        assert!("done".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Doing.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Fail.is_terminal());
    }

    #[test]
    fn record_fields_parse_back() {
        let record = TaskRecord::new(TaskStatus::Success, "uploaded");
        let fields: HashMap<String, String> = record
            .to_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let parsed = TaskRecord::from_fields("k", &fields).unwrap().unwrap();
        assert_eq!(parsed.status, TaskStatus::Success);
        assert_eq!(parsed.message, "uploaded");
        assert_eq!(parsed.updated_at.timestamp(), record.updated_at.timestamp());
    }

    #[test]
    fn empty_and_corrupt_records() {
        assert!(TaskRecord::from_fields("k", &HashMap::new()).unwrap().is_none());

        let mut fields = HashMap::new();
        fields.insert("status".to_string(), "weird".to_string());
        assert!(matches!(
            TaskRecord::from_fields("k", &fields),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
