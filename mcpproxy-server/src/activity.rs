//! Append-only activity log with asynchronous sensitive-data annotation

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Records retained in memory
const ACTIVITY_CAPACITY: usize = 10_000;

/// Where a recorded call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    Mcp,
    Rest,
    Cli,
    Tray,
}

/// One completed virtual tool call
#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub id: u64,
    pub record_type: String,
    pub source: ActivitySource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub arguments: Value,
    pub response_excerpt: String,
    /// Free-form bag; sensitive-data annotations land under
    /// `sensitive_data_detection`
    pub metadata: Value,
}

/// Outcome of a sensitive-data scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub severity: String,
    pub detection_type: String,
    pub summary: String,
}

/// Pluggable detector. Annotation runs on a spawned task and must never
/// hold up the call path.
pub trait SensitiveDataDetector: Send + Sync + 'static {
    fn scan(&self, arguments: &Value, response_excerpt: &str) -> Option<Detection>;
}

/// Query parameters for the activity API
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityFilter {
    pub severity: Option<String>,
    pub detection_type: Option<String>,
    /// Only records that have (true) or lack (false) a detection
    pub sensitive_data: Option<bool>,
    pub tool: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Bounded append-only log of activity records.
///
/// The record store sits behind its own `Arc` so detector tasks can
/// back-fill annotations without holding the log itself.
pub struct ActivityLog {
    records: Arc<Mutex<VecDeque<ActivityRecord>>>,
    next_id: AtomicU64,
    detector: Option<Arc<dyn SensitiveDataDetector>>,
}

impl ActivityLog {
    pub fn new(detector: Option<Arc<dyn SensitiveDataDetector>>) -> Arc<Self> {
        Arc::new(Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(1024))),
            next_id: AtomicU64::new(1),
            detector,
        })
    }

    /// Append a record. When a detector is installed, the scan runs on its
    /// own task and back-fills the record's metadata.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        record_type: impl Into<String>,
        source: ActivitySource,
        server: Option<String>,
        tool: Option<String>,
        status: impl Into<String>,
        arguments: Value,
        response_excerpt: impl Into<String>,
    ) -> u64 {
        let response_excerpt = response_excerpt.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let record = ActivityRecord {
            id,
            record_type: record_type.into(),
            source,
            server,
            tool,
            status: status.into(),
            timestamp: Utc::now(),
            arguments: arguments.clone(),
            response_excerpt: response_excerpt.clone(),
            metadata: serde_json::json!({}),
        };

        {
            let mut records = self.records.lock();
            if records.len() == ACTIVITY_CAPACITY {
                records.pop_front();
            }
            records.push_back(record);
        }

        if let Some(detector) = self.detector.clone() {
            let records = self.records.clone();
            tokio::spawn(async move {
                if let Some(detection) = detector.scan(&arguments, &response_excerpt) {
                    annotate(&records, id, detection);
                }
            });
        }

        id
    }

    /// Records matching `filter`, newest first
    pub fn query(&self, filter: &ActivityFilter) -> Vec<ActivityRecord> {
        let records = self.records.lock();
        records
            .iter()
            .rev()
            .filter(|record| matches_filter(record, filter))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn annotate(records: &Mutex<VecDeque<ActivityRecord>>, id: u64, detection: Detection) {
    let mut records = records.lock();
    if let Some(record) = records.iter_mut().find(|r| r.id == id) {
        record.metadata["sensitive_data_detection"] =
            serde_json::to_value(&detection).unwrap_or(Value::Null);
    }
}

fn matches_filter(record: &ActivityRecord, filter: &ActivityFilter) -> bool {
    let detection = record.metadata.get("sensitive_data_detection");

    if let Some(want) = filter.sensitive_data {
        if detection.is_some() != want {
            return false;
        }
    }
    if let Some(severity) = &filter.severity {
        match detection.and_then(|d| d.get("severity")).and_then(Value::as_str) {
            Some(found) if found == severity => {}
            _ => return false,
        }
    }
    if let Some(detection_type) = &filter.detection_type {
        match detection
            .and_then(|d| d.get("detection_type"))
            .and_then(Value::as_str)
        {
            Some(found) if found == detection_type => {}
            _ => return false,
        }
    }
    if let Some(tool) = &filter.tool {
        if record.tool.as_deref() != Some(tool.as_str()) {
            return false;
        }
    }
    if let Some(since) = filter.since {
        if record.timestamp < since {
            return false;
        }
    }
    if let Some(until) = filter.until {
        if record.timestamp > until {
            return false;
        }
    }

    true
}
