use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Base64 encoding for the raw-byte result fields on the wire. Program
/// output is arbitrary bytes, not necessarily valid UTF-8, so it can't be
/// embedded directly into a JSON string the way `error_message` can.
mod raw_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&STANDARD.encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// A supported submission language.
///
/// A closed enum rather than open-ended polymorphism: dispatch is a table
/// lookup over a sealed set of variants. Adding a language is a two-step
/// data change: a new variant here, and a matching entry in
/// `config/languages.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "language_id", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LanguageId {
    Python3,
    Javascript,
    Java,
    Cpp,
    C,
}

impl LanguageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LanguageId::Python3 => "python3",
            LanguageId::Javascript => "javascript",
            LanguageId::Java => "java",
            LanguageId::Cpp => "cpp",
            LanguageId::C => "c",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "python3" => Some(LanguageId::Python3),
            "javascript" => Some(LanguageId::Javascript),
            "java" => Some(LanguageId::Java),
            "cpp" => Some(LanguageId::Cpp),
            "c" => Some(LanguageId::C),
            _ => None,
        }
    }
}

impl fmt::Display for LanguageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a job record. Transitions are enforced only by the Job Store;
/// this type just names the legal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompileError,
    RuntimeError,
    Timeout,
    InternalError,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

/// Per-job overrides a submission may supply, bounded by `Config` at the API
/// boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOverrides {
    pub timeout_ms: Option<u64>,
    pub memory_limit_mib: Option<u64>,
    pub cpu_quota: Option<f64>,
}

/// Input to `JobStore::create`. Fields are immutable after creation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub language_id: LanguageId,
    pub source_code: Vec<u8>,
    pub stdin: Vec<u8>,
    pub overrides: JobOverrides,
}

/// The full mutable job record.
///
/// `stdout`/`stderr`/`compile_output` are kept as raw bytes rather than
/// `String`: a submitted program is free to write arbitrary binary data to
/// its streams, and the record must reproduce it byte-for-byte rather than
/// lossily re-encoding it as UTF-8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub language_id: LanguageId,
    #[serde(skip_serializing)]
    pub source_code: Vec<u8>,
    #[serde(skip_serializing)]
    pub stdin: Vec<u8>,
    pub overrides: JobOverrides,
    pub status: JobStatus,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(with = "raw_bytes")]
    pub stdout: Option<Vec<u8>>,
    #[serde(with = "raw_bytes")]
    pub stderr: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    pub memory_usage_kib: Option<u64>,
    #[serde(with = "raw_bytes")]
    pub compile_output: Option<Vec<u8>>,
    pub error_message: Option<String>,
}

/// Result fields written on a terminal transition. Same byte-preserving
/// rationale as `JobRecord` for `stdout`/`stderr`/`compile_output`.
#[derive(Debug, Clone, Default)]
pub struct TerminalResult {
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
    pub exit_code: Option<i32>,
    pub execution_time_ms: Option<u64>,
    pub memory_usage_kib: Option<u64>,
    pub compile_output: Option<Vec<u8>>,
    pub error_message: Option<String>,
}

/// Backing data for the Submission API's `/health` endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobCounts {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub compile_error: i64,
    pub runtime_error: i64,
    pub timeout: i64,
    pub internal_error: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_id_round_trips_through_its_string_form() {
        for lang in [
            LanguageId::Python3,
            LanguageId::Javascript,
            LanguageId::Java,
            LanguageId::Cpp,
            LanguageId::C,
        ] {
            assert_eq!(LanguageId::from_str_opt(lang.as_str()), Some(lang));
        }
    }

    #[test]
    fn unknown_language_string_is_rejected() {
        assert_eq!(LanguageId::from_str_opt("rust"), None);
        assert_eq!(LanguageId::from_str_opt(""), None);
    }

    #[test]
    fn terminal_statuses_are_all_non_pending_non_running() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        for status in [
            JobStatus::Completed,
            JobStatus::CompileError,
            JobStatus::RuntimeError,
            JobStatus::Timeout,
            JobStatus::InternalError,
        ] {
            assert!(status.is_terminal());
        }
    }
}
