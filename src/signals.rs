//! CAN signal database boundary.
//!
//! The container reader only needs two capabilities from the database:
//! resolving a message name to its frame id (to build the interest set) and
//! decoding a message payload into named physical values. `JsonSignalDatabase`
//! implements them over the JSON document the DBC export tool produces
//! (per message: id, name, signals with start bit, length, factor, offset).

use std::collections::{HashMap, HashSet};
use std::io::Read;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::{ConfigError, SelectedSignal};

pub trait SignalDatabase: Send + Sync {
    /// Frame id for a message name, if the database defines it.
    fn message_id(&self, message_name: &str) -> Option<u32>;

    /// Decode a raw CAN payload into (signal name, physical value) pairs.
    fn decode(&self, message_id: u32, payload: &[u8]) -> Result<Vec<(String, f64)>>;
}

/// Precomputed filter over the externally supplied signal selection:
/// which message ids to decode at all, and which (message, signal) pairs
/// to emit.
#[derive(Debug, Clone, Default)]
pub struct SignalSelection {
    interest: HashSet<u32>,
    allowed: HashSet<(u32, String)>,
}

impl SignalSelection {
    pub fn build(
        entity: &str,
        db: &dyn SignalDatabase,
        selected: &[SelectedSignal],
    ) -> Result<Self, ConfigError> {
        let mut selection = SignalSelection::default();
        for sel in selected {
            let id = db
                .message_id(&sel.message_name)
                .ok_or_else(|| ConfigError::UnknownMessage {
                    entity: entity.to_string(),
                    message: sel.message_name.clone(),
                })?;
            selection.interest.insert(id);
            for name in &sel.signal_names {
                selection.allowed.insert((id, name.clone()));
            }
        }
        Ok(selection)
    }

    pub fn contains_message(&self, message_id: u32) -> bool {
        self.interest.contains(&message_id)
    }

    pub fn allows(&self, message_id: u32, signal_name: &str) -> bool {
        self.allowed
            .contains(&(message_id, signal_name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.interest.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct JsonSignal {
    name: String,
    #[serde(rename = "startBit")]
    start_bit: u32,
    length: u32,
    factor: f64,
    offset: f64,
}

#[derive(Debug, Deserialize)]
struct JsonMessage {
    id: u32,
    name: String,
    signals: Vec<JsonSignal>,
}

/// Signal database backed by the DBC export JSON document.
pub struct JsonSignalDatabase {
    by_name: HashMap<String, u32>,
    by_id: HashMap<u32, JsonMessage>,
}

impl JsonSignalDatabase {
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut buf = String::new();
        reader
            .read_to_string(&mut buf)
            .context("failed to read signal database document")?;
        Self::from_json(&buf)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let messages: Vec<JsonMessage> =
            serde_json::from_str(json).context("invalid signal database document")?;
        let mut by_name = HashMap::new();
        let mut by_id = HashMap::new();
        for msg in messages {
            by_name.insert(msg.name.clone(), msg.id);
            by_id.insert(msg.id, msg);
        }
        Ok(Self { by_name, by_id })
    }
}

impl SignalDatabase for JsonSignalDatabase {
    fn message_id(&self, message_name: &str) -> Option<u32> {
        self.by_name.get(message_name).copied()
    }

    fn decode(&self, message_id: u32, payload: &[u8]) -> Result<Vec<(String, f64)>> {
        let msg = self
            .by_id
            .get(&message_id)
            .with_context(|| format!("unknown message id {message_id}"))?;
        let mut raw_bytes = [0u8; 8];
        let n = payload.len().min(8);
        raw_bytes[..n].copy_from_slice(&payload[..n]);
        let raw = u64::from_le_bytes(raw_bytes);

        let mut values = Vec::with_capacity(msg.signals.len());
        for sig in &msg.signals {
            if sig.length == 0 || sig.length > 64 || sig.start_bit + sig.length > 64 {
                anyhow::bail!("signal '{}' exceeds the 64-bit frame", sig.name);
            }
            let mask = if sig.length == 64 {
                u64::MAX
            } else {
                (1u64 << sig.length) - 1
            };
            let field = (raw >> sig.start_bit) & mask;
            values.push((sig.name.clone(), field as f64 * sig.factor + sig.offset));
        }
        Ok(values)
    }
}
