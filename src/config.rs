//! Session configuration: which files to process, with which parser, under
//! which entity name.
//!
//! The configuration document is validated once at load time. Parser names
//! resolve to a closed enum and signal selections are checked against the
//! signal database before any worker starts, so a bad configuration fails
//! fast with a typed error instead of at first use inside a thread.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::signals::SignalDatabase;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported parser name: {0}")]
    UnknownParser(String),
    #[error("entity '{entity}' selects signals but names no signal database file")]
    MissingSignalDatabase { entity: String },
    #[error("entity '{entity}' selects message '{message}' which the signal database does not define")]
    UnknownMessage { entity: String, message: String },
    #[error("duplicate entity name: {0}")]
    DuplicateEntity(String),
    #[error("configuration lists no files")]
    NoFiles,
}

/// Closed set of supported per-file decoders. The wire names match the
/// configuration documents produced by the session recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    PcapGps,
    PcapLidar,
    Video,
    Riff,
}

impl ParserKind {
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        match name {
            "PcapGpsParser" => Ok(ParserKind::PcapGps),
            "PcapLidarParser" => Ok(ParserKind::PcapLidar),
            "VideoParser" => Ok(ParserKind::Video),
            "RiffParser" => Ok(ParserKind::Riff),
            other => Err(ConfigError::UnknownParser(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParserKind::PcapGps => "PcapGpsParser",
            ParserKind::PcapLidar => "PcapLidarParser",
            ParserKind::Video => "VideoParser",
            ParserKind::Riff => "RiffParser",
        }
    }
}

/// One (message, signals) selection from the CAN stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SelectedSignal {
    pub message_name: String,
    pub signal_names: Vec<String>,
}

/// One input file of the session.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    pub parser: ParserKind,
    pub entity: String,
    pub signal_db_path: Option<String>,
    pub selected_signals: Vec<SelectedSignal>,
}

#[derive(Debug, Deserialize)]
struct RawFileEntry {
    upload_file_path: String,
    parser_name: String,
    entity_name: String,
    #[serde(default)]
    dbc_file_name: Option<String>,
    #[serde(default)]
    selected_signals: Vec<SelectedSignal>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub files: Vec<FileEntry>,
}

impl SessionConfig {
    /// Parse and structurally validate a configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let raw: Vec<RawFileEntry> = serde_json::from_str(json)?;
        let mut files = Vec::with_capacity(raw.len());
        for entry in raw {
            files.push(FileEntry {
                parser: ParserKind::from_name(&entry.parser_name)?,
                path: entry.upload_file_path,
                entity: entry.entity_name,
                signal_db_path: entry.dbc_file_name,
                selected_signals: entry.selected_signals,
            });
        }
        let config = SessionConfig { files };
        config.validate_structure()?;
        Ok(config)
    }

    fn validate_structure(&self) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::NoFiles);
        }
        let mut seen = std::collections::HashSet::new();
        for file in &self.files {
            if !seen.insert(file.entity.as_str()) {
                return Err(ConfigError::DuplicateEntity(file.entity.clone()));
            }
            if file.parser == ParserKind::Riff
                && !file.selected_signals.is_empty()
                && file.signal_db_path.is_none()
            {
                return Err(ConfigError::MissingSignalDatabase {
                    entity: file.entity.clone(),
                });
            }
        }
        Ok(())
    }

    /// Check one file's signal selection against its loaded database.
    pub fn validate_signals(
        file: &FileEntry,
        db: &dyn SignalDatabase,
    ) -> Result<(), ConfigError> {
        for sel in &file.selected_signals {
            if db.message_id(&sel.message_name).is_none() {
                return Err(ConfigError::UnknownMessage {
                    entity: file.entity.clone(),
                    message: sel.message_name.clone(),
                });
            }
        }
        Ok(())
    }
}
