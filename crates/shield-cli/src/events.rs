//! JSON-lines event log
//!
//! One object per line, e.g.
//! `{"event":"blocked","domain":"casino.example","category":"Gambling","threat":"medium","at":"..."}`

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use shield_core::{Category, EventSink, ThreatLevel};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

/// A single logged event
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum Record<'a> {
    Blocked {
        domain: &'a str,
        category: String,
        threat: ThreatLevel,
        at: DateTime<Utc>,
    },
    Started {
        at: DateTime<Utc>,
    },
    Stopped {
        at: DateTime<Utc>,
    },
    Error {
        reason: &'a str,
        at: DateTime<Utc>,
    },
}

/// Appends engine events to a file as JSON lines
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log: {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    fn append(&self, record: &Record<'_>) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| writer.write_all(b"\n"))
            .and_then(|()| writer.flush());
        if let Err(e) = written {
            warn!(error = %e, "Failed to append event");
        }
    }
}

impl EventSink for JsonLinesSink {
    fn on_blocked(&self, domain: &str, category: &Category, threat: ThreatLevel, at: DateTime<Utc>) {
        self.append(&Record::Blocked {
            domain,
            category: category.to_string(),
            threat,
            at,
        });
    }

    fn on_started(&self) {
        self.append(&Record::Started { at: Utc::now() });
    }

    fn on_stopped(&self) {
        self.append(&Record::Stopped { at: Utc::now() });
    }

    fn on_error(&self, reason: &str) {
        self.append(&Record::Error {
            reason,
            at: Utc::now(),
        });
    }
}
