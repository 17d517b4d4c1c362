use crate::error::{Error, ErrorKind};
use crate::models::timestamp;
use derive_more::Display;
use exn::ResultExt;
use std::str::FromStr;
use time::UtcDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TaskStatus {
    #[display("running")]
    Running,
    #[display("completed")]
    Completed,
}
impl FromStr for TaskStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            _ => exn::bail!(ErrorKind::InvalidData("task status")),
        }
    }
}

/// A batch run of the update scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTask {
    pub id: i64,
    pub total_books: u32,
    pub completed_books: u32,
    pub status: TaskStatus,
    pub started_at: UtcDateTime,
    pub completed_at: Option<UtcDateTime>,
}
impl UpdateTask {
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct UpdateTaskRow {
    pub(crate) id: i64,
    pub(crate) total_books: i64,
    pub(crate) completed_books: i64,
    pub(crate) status: String,
    pub(crate) started_at: i64,
    #[sqlx(default)]
    pub(crate) completed_at: Option<i64>,
}
impl TryFrom<UpdateTaskRow> for UpdateTask {
    type Error = Error;
    fn try_from(row: UpdateTaskRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            total_books: u32::try_from(row.total_books).or_raise(|| ErrorKind::InvalidData("total books"))?,
            completed_books: u32::try_from(row.completed_books)
                .or_raise(|| ErrorKind::InvalidData("completed books"))?,
            status: row.status.parse()?,
            started_at: timestamp(row.started_at, "task start")?,
            completed_at: row.completed_at.map(|t| timestamp(t, "task completion")).transpose()?,
        })
    }
}
