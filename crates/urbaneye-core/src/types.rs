//! Domain types shared between the report backend and the assistant.

use serde::{Deserialize, Deserializer, Serialize};

/// Unix epoch seconds, as stored by the report backend.
pub type EpochSeconds = i64;

/// A civic-issue report as returned by `GET /api/v1/reports/my`.
///
/// Only the fields the assistant cites are modeled; unknown fields
/// (coordinates, image URL, assignee, timeline) are ignored on
/// deserialization. Nullable columns fall back to their defaults whether the
/// key is missing or `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub id: Option<String>,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_severity", deserialize_with = "severity_or_default")]
    pub severity: String,
    /// One of `open`, `assigned`, `in_progress`, `resolved`.
    #[serde(default = "default_status", deserialize_with = "status_or_default")]
    pub status: String,
    #[serde(default = "default_department", deserialize_with = "department_or_default")]
    pub department: String,
    /// Creation time. The backend serializes it as `timestamp`.
    #[serde(
        rename = "timestamp",
        alias = "created_at",
        default,
        deserialize_with = "null_as_zero"
    )]
    pub created_at: EpochSeconds,
}

fn default_severity() -> String {
    "medium".to_string()
}

fn default_status() -> String {
    "open".to_string()
}

fn default_department() -> String {
    "General".to_string()
}

fn severity_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_severity))
}

fn status_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_status))
}

fn department_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_else(default_department))
}

fn null_as_zero<'de, D: Deserializer<'de>>(d: D) -> Result<EpochSeconds, D::Error> {
    Ok(Option::<EpochSeconds>::deserialize(d)?.unwrap_or_default())
}

/// Envelope of the backend's report list responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportList {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub reports: Vec<Report>,
}

/// Display identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub name: String,
    pub email: String,
    /// Backend role: civilian, gov_admin, dept_head, field_officer, super_admin.
    pub role: String,
}

impl UserIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            role: role.into(),
        }
    }
}
