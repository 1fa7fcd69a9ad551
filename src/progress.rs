//! Progress publishing: segment-completion notifications for the frontend.
//!
//! The transport is a boundary; the pipeline only needs `publish` and an
//! explicit `disconnect` at the end of a run.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Wire message sent after each finished segment and once at the end of the
/// session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ProgressMessage {
    #[serde(rename = "PROGRESSING")]
    Progressing {
        segment_index: u64,
        /// URL the frontend loads the segment recording from.
        #[serde(rename = "file_path")]
        artifact_url: String,
        /// Human-readable time range, e.g. "01:00 ~ 02:00".
        #[serde(rename = "segment_name")]
        segment_label: String,
    },
    #[serde(rename = "COMPLETE")]
    Complete,
}

pub trait ProgressPublisher: Send {
    fn publish(&mut self, topic: &str, message: &ProgressMessage) -> Result<()>;

    /// Tear down the transport. Called once after the final message.
    fn disconnect(&mut self) -> Result<()>;
}

pub fn progress_topic(user_id: &str, project_id: &str) -> String {
    format!("visualization/backend/progress/{user_id}/{project_id}")
}

pub fn complete_topic(user_id: &str, project_id: &str) -> String {
    format!("visualization/backend/complete/{user_id}/{project_id}")
}

pub fn artifact_url(server_url: &str, user_id: &str, project_id: &str, segment_index: u64) -> String {
    format!("{server_url}/rrd/{user_id}/{project_id}/{segment_index}.rrd")
}

/// Default publisher: emits each message into the structured log. Used when
/// no broker transport is wired in.
#[derive(Debug, Default)]
pub struct TracingPublisher;

impl ProgressPublisher for TracingPublisher {
    fn publish(&mut self, topic: &str, message: &ProgressMessage) -> Result<()> {
        let body = serde_json::to_string(message)?;
        tracing::info!(topic, %body, "progress update");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Test publisher that records everything it is handed.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<(String, ProgressMessage)>>>,
    disconnected: Arc<Mutex<bool>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, ProgressMessage)> {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_disconnected(&self) -> bool {
        *self.disconnected.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ProgressPublisher for MemoryPublisher {
    fn publish(&mut self, topic: &str, message: &ProgressMessage) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((topic.to_string(), message.clone()));
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        *self.disconnected.lock().unwrap_or_else(|e| e.into_inner()) = true;
        Ok(())
    }
}
