use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Revision,
    Assignment,
    Project,
    Exam,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Revision => "revision",
            TaskType::Assignment => "assignment",
            TaskType::Project => "project",
            TaskType::Exam => "exam",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "revision" => Some(TaskType::Revision),
            "assignment" => Some(TaskType::Assignment),
            "project" => Some(TaskType::Project),
            "exam" => Some(TaskType::Exam),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Overdue => "overdue",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "overdue" => Some(TaskStatus::Overdue),
            _ => None,
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskType {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskType {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskType {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        TaskType::parse(&raw).ok_or_else(|| format!("invalid task_type: {}", raw).into())
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskStatus {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let raw = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        TaskStatus::parse(&raw).ok_or_else(|| format!("invalid task status: {}", raw).into())
    }
}

/// A course deliverable; expands into study sessions until its deadline.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct AcademicTask {
    pub task_id: i64,
    pub course_id: i64,
    pub task_type: TaskType,
    pub title: String,
    pub description: Option<String>,
    pub deadline: DateTime<Utc>,
    pub estimated_hours: Option<f64>,
    pub status: TaskStatus,
}

/// Per-(student, task) scheduling record; every study-session calendar
/// event produced for an academic task points at one of these rows.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct StudySession {
    pub session_id: i64,
    pub student_id: i64,
    pub task_id: i64,
    pub description: String,
    pub estimated_hours: Option<f64>,
    pub preferred_chunk_size: Option<f64>,
    pub priority: i64,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}
