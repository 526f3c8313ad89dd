//! Attendance recording
//!
//! Append-only sink for attendance events. One record is appended per
//! successful authentication ceremony; nothing else writes here.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One attendance event
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AttendanceRecord {
    pub user_id: Uuid,
    /// Caller-supplied session/event identifier (e.g. the class session)
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only attendance log
#[async_trait]
pub trait AttendanceLog: Send + Sync {
    async fn append(&self, record: AttendanceRecord);
}

/// In-memory attendance log
#[derive(Default)]
pub struct InMemoryAttendanceLog {
    records: Mutex<Vec<AttendanceRecord>>,
}

impl InMemoryAttendanceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded attendance events
    #[must_use]
    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records
            .lock()
            .expect("attendance log mutex poisoned")
            .clone()
    }
}

#[async_trait]
impl AttendanceLog for InMemoryAttendanceLog {
    async fn append(&self, record: AttendanceRecord) {
        self.records
            .lock()
            .expect("attendance log mutex poisoned")
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appended_records_are_kept_in_order() {
        let log = InMemoryAttendanceLog::new();
        let user = Uuid::new_v4();
        log.append(AttendanceRecord {
            user_id: user,
            session_id: "session-1".into(),
            timestamp: Utc::now(),
        })
        .await;
        log.append(AttendanceRecord {
            user_id: user,
            session_id: "session-2".into(),
            timestamp: Utc::now(),
        })
        .await;

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].session_id, "session-1");
        assert_eq!(records[1].session_id, "session-2");
    }
}
