//! Worker reports: the only thing that ever comes back across the worker
//! boundary.
//!
//! A report is either complete or blocked. Anything that cannot be read as
//! one of those two is not a report at all and is treated as an
//! infrastructure failure by the caller.

use serde::{Deserialize, Serialize};

use super::contract::ReturnFormat;

/// Terminal status of a worker report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// The objective was met; deliverables describe the output
    Complete,
    /// The worker cannot proceed; `reason` says why
    Blocked,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Complete => write!(f, "complete"),
            ReportStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// One produced artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    /// Where the artifact lives
    pub location: String,
    /// What it is
    pub summary: String,
}

/// One decision the worker made while executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// The structured result of a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deliverables: Vec<Deliverable>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions: Vec<Decision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_touched: Vec<String>,
    /// Required when status is blocked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WorkerReport {
    /// A complete report.
    pub fn complete(
        deliverables: Vec<Deliverable>,
        decisions: Vec<Decision>,
        files_touched: Vec<String>,
    ) -> Self {
        Self {
            status: ReportStatus::Complete,
            deliverables,
            decisions,
            files_touched,
            reason: None,
        }
    }

    /// A blocked report with the mandatory reason.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Blocked,
            deliverables: Vec::new(),
            decisions: Vec::new(),
            files_touched: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    /// One-line digest, used when this report is embedded as a prior result
    /// and in log lines.
    pub fn summary(&self) -> String {
        match self.status {
            ReportStatus::Complete => self
                .deliverables
                .first()
                .map(|d| d.summary.clone())
                .unwrap_or_else(|| "objective complete".to_string()),
            ReportStatus::Blocked => self
                .reason
                .clone()
                .unwrap_or_else(|| "blocked without reason".to_string()),
        }
    }

    /// Parse an untyped worker payload.
    ///
    /// Lenient about everything except the status field: a payload without a
    /// recognizable terminal status is not a report.
    ///
    /// # Errors
    /// `MissingStatus` when the field is absent or not a string,
    /// `UnrecognizedStatus` when it is a string this contract doesn't know.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ReportError> {
        let status_str = value
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or(ReportError::MissingStatus)?;

        let status = match status_str.to_ascii_lowercase().as_str() {
            "complete" | "completed" | "done" => ReportStatus::Complete,
            "blocked" => ReportStatus::Blocked,
            other => return Err(ReportError::UnrecognizedStatus(other.to_string())),
        };

        let deliverables = value
            .get("deliverables")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ReportError::InvalidField {
                field: "deliverables",
                message: e.to_string(),
            })?
            .unwrap_or_default();

        let decisions = value
            .get("decisions")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| ReportError::InvalidField {
                field: "decisions",
                message: e.to_string(),
            })?
            .unwrap_or_default();

        let files_touched = value
            .get("files_touched")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|f| f.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let reason = value
            .get("reason")
            .and_then(|r| r.as_str())
            .map(str::to_string);

        Ok(Self {
            status,
            deliverables,
            decisions,
            files_touched,
            reason,
        })
    }

    /// Check this report against the shape the mission demanded.
    ///
    /// # Errors
    /// Returns the first requirement the report fails to meet. Callers treat
    /// any error here as a malformed result, not a semantic blockade.
    pub fn validate_against(&self, format: &ReturnFormat) -> Result<(), ReportError> {
        if self.status == ReportStatus::Blocked
            && self.reason.as_deref().map(str::trim).unwrap_or("").is_empty()
        {
            return Err(ReportError::MissingReason);
        }

        if self.status == ReportStatus::Complete {
            if format.require_deliverables && self.deliverables.is_empty() {
                return Err(ReportError::MissingDeliverables);
            }
            if format.require_files_touched && self.files_touched.is_empty() {
                return Err(ReportError::MissingFilesTouched);
            }
        }

        if format.require_rationale {
            for decision in &self.decisions {
                let has_rationale = decision
                    .rationale
                    .as_deref()
                    .map(|r| !r.trim().is_empty())
                    .unwrap_or(false);
                if !has_rationale {
                    return Err(ReportError::MissingRationale {
                        decision: decision.summary.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Errors reading or validating a worker report.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReportError {
    #[error("Report has no terminal status field")]
    MissingStatus,

    #[error("Unrecognized report status '{0}'")]
    UnrecognizedStatus(String),

    #[error("Report field '{field}' is malformed: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    #[error("Blocked report carries no reason")]
    MissingReason,

    #[error("Complete report lists no deliverables")]
    MissingDeliverables,

    #[error("Complete report lists no touched files")]
    MissingFilesTouched,

    #[error("Decision '{decision}' has no rationale")]
    MissingRationale { decision: String },
}
