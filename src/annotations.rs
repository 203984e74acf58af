// src/annotations.rs

//! # Advisory Annotation Store
//!
//! Client-only data that decorates on-chain streams: hidden and paused
//! markers, pause intervals, removed-recipient flags, the per-recipient rate
//! cache, the address book and stream templates. None of it is ever sent
//! on-chain and none of it is authoritative.
//!
//! The whole store is one versioned JSON document. Every mutation rewrites
//! the full document (last writer wins); a missing or unreadable file yields
//! an empty store.

use crate::errors::ClientError;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub const DOCUMENT_VERSION: u32 = 1;

/// Named duration presets, in hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurationPreset {
    Week,
    Month,
    Quarter,
    Year,
    Custom,
}

impl DurationPreset {
    pub fn hours(&self) -> Option<u64> {
        match self {
            DurationPreset::Week => Some(168),
            DurationPreset::Month => Some(720),
            DurationPreset::Quarter => Some(2160),
            DurationPreset::Year => Some(8760),
            DurationPreset::Custom => None,
        }
    }
}

impl std::str::FromStr for DurationPreset {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "week" => Ok(DurationPreset::Week),
            "month" => Ok(DurationPreset::Month),
            "quarter" => Ok(DurationPreset::Quarter),
            "year" => Ok(DurationPreset::Year),
            "custom" => Ok(DurationPreset::Custom),
            other => Err(ClientError::Validation(format!("Unknown duration preset: {}", other))),
        }
    }
}

/// A pause interval in unix seconds. `end == None` means still paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausePeriod {
    pub start: i64,
    pub end: Option<i64>,
}

impl PausePeriod {
    pub fn seconds_until(&self, now: i64) -> u64 {
        let end = self.end.unwrap_or(now);
        end.saturating_sub(self.start).max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBookEntry {
    pub id: String,
    pub name: String,
    /// Lowercase hex.
    pub address: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTemplate {
    pub id: String,
    pub name: String,
    /// Hourly rate in token units.
    pub hourly_rate: Decimal,
    pub duration_type: DurationPreset,
    /// Only meaningful for `DurationPreset::Custom`.
    pub duration_hours: Option<u64>,
    pub description: String,
}

impl StreamTemplate {
    pub fn duration(&self) -> u64 {
        self.duration_type.hours().or(self.duration_hours).unwrap_or(24)
    }
}

pub fn default_templates() -> Vec<StreamTemplate> {
    vec![
        StreamTemplate {
            id: "monthly-salary".to_string(),
            name: "Monthly Salary".to_string(),
            hourly_rate: Decimal::from(10),
            duration_type: DurationPreset::Month,
            duration_hours: None,
            description: "Standard monthly salary payment".to_string(),
        },
        StreamTemplate {
            id: "weekly-allowance".to_string(),
            name: "Weekly Allowance".to_string(),
            hourly_rate: Decimal::from(5),
            duration_type: DurationPreset::Week,
            duration_hours: None,
            description: "Weekly allowance payment".to_string(),
        },
        StreamTemplate {
            id: "project-payment".to_string(),
            name: "Project Payment".to_string(),
            hourly_rate: Decimal::from(50),
            duration_type: DurationPreset::Month,
            duration_hours: None,
            description: "Project milestone payment".to_string(),
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    pub version: u32,
    #[serde(rename = "streamfi_hidden_streams", default)]
    pub hidden_streams: BTreeSet<u64>,
    #[serde(rename = "streamfi_paused_streams", default)]
    pub paused_streams: BTreeSet<u64>,
    #[serde(rename = "streamfi_pause_periods", default)]
    pub pause_periods: BTreeMap<u64, Vec<PausePeriod>>,
    /// Keyed by `"{stream_id}_{recipient}"`.
    #[serde(rename = "streamfi_removed_recipients", default)]
    pub removed_recipients: BTreeMap<String, bool>,
    /// stream id -> lowercase recipient -> hourly rate in base units.
    #[serde(rename = "streamfi_recipient_rates", default)]
    pub recipient_rates: BTreeMap<u64, BTreeMap<String, U256>>,
    #[serde(rename = "streamfi_recipients", default)]
    pub recipients: Vec<AddressBookEntry>,
    #[serde(rename = "streamfi_templates", default = "default_templates")]
    pub templates: Vec<StreamTemplate>,
}

impl Default for AnnotationDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            hidden_streams: BTreeSet::new(),
            paused_streams: BTreeSet::new(),
            pause_periods: BTreeMap::new(),
            removed_recipients: BTreeMap::new(),
            recipient_rates: BTreeMap::new(),
            recipients: Vec::new(),
            templates: default_templates(),
        }
    }
}

impl AnnotationDocument {
    /// Total paused seconds for `stream_id`, counting open intervals up to `now`.
    pub fn paused_seconds(&self, stream_id: u64, now: i64) -> u64 {
        self.pause_periods
            .get(&stream_id)
            .map(|periods| periods.iter().map(|p| p.seconds_until(now)).sum())
            .unwrap_or(0)
    }

    pub fn has_pause_annotation(&self, stream_id: u64) -> bool {
        self.paused_streams.contains(&stream_id) || self.pause_periods.contains_key(&stream_id)
    }

    pub fn is_recipient_removed(&self, stream_id: u64, recipient: Address) -> bool {
        self.removed_recipients
            .get(&removed_key(stream_id, recipient))
            .copied()
            .unwrap_or(false)
    }
}

pub fn address_key(address: Address) -> String {
    format!("{:?}", address)
}

fn removed_key(stream_id: u64, recipient: Address) -> String {
    format!("{}_{}", stream_id, address_key(recipient))
}

#[derive(Debug)]
pub struct AnnotationStore {
    path: Option<PathBuf>,
    doc: RwLock<AnnotationDocument>,
}

impl AnnotationStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            doc: RwLock::new(AnnotationDocument::default()),
        }
    }

    /// Opens the store at `path`. Unreadable or incompatible documents are
    /// discarded with a warning.
    pub async fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let doc = match tokio::fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<AnnotationDocument>(&content) {
                Ok(doc) if doc.version == DOCUMENT_VERSION => doc,
                Ok(doc) => {
                    warn!(path = %path.display(), version = doc.version, "Unsupported annotation document version, starting fresh");
                    AnnotationDocument::default()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt annotation document, starting fresh");
                    AnnotationDocument::default()
                }
            },
            Err(_) => AnnotationDocument::default(),
        };
        Self {
            path: Some(path),
            doc: RwLock::new(doc),
        }
    }

    pub async fn snapshot(&self) -> AnnotationDocument {
        self.doc.read().await.clone()
    }

    async fn persist(&self, doc: &AnnotationDocument) -> Result<(), ClientError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(doc).map_err(|e| ClientError::Storage(e.to_string()))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| ClientError::Storage(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Annotation document written");
        Ok(())
    }

    /// Applies `f` to a copy of the document, writes the copy and only then
    /// makes it current. A failed write leaves the store unchanged.
    async fn update<T>(&self, f: impl FnOnce(&mut AnnotationDocument) -> Result<T, ClientError>) -> Result<T, ClientError> {
        let mut doc = self.doc.write().await;
        let mut next = doc.clone();
        let out = f(&mut next)?;
        self.persist(&next).await?;
        *doc = next;
        Ok(out)
    }

    /// Returns `true` when the stream is hidden afterwards.
    pub async fn toggle_hidden(&self, stream_id: u64) -> Result<bool, ClientError> {
        self.update(|doc| {
            if doc.hidden_streams.remove(&stream_id) {
                Ok(false)
            } else {
                doc.hidden_streams.insert(stream_id);
                Ok(true)
            }
        })
        .await
    }

    pub async fn clear_hidden(&self) -> Result<(), ClientError> {
        self.update(|doc| {
            doc.hidden_streams.clear();
            Ok(())
        })
        .await
    }

    /// Pauses or resumes the display of an active stream. Pausing opens an
    /// interval at `now`; resuming closes the last open one. Returns `true`
    /// when the stream is paused afterwards.
    pub async fn toggle_pause(&self, stream_id: u64, stream_active: bool, now: i64) -> Result<bool, ClientError> {
        if !stream_active {
            return Err(ClientError::Validation("Can only pause active streams".to_string()));
        }
        self.update(|doc| {
            let periods = doc.pause_periods.entry(stream_id).or_default();
            if doc.paused_streams.remove(&stream_id) {
                if let Some(last) = periods.last_mut() {
                    if last.end.is_none() {
                        last.end = Some(now);
                    }
                }
                Ok(false)
            } else {
                periods.push(PausePeriod { start: now, end: None });
                doc.paused_streams.insert(stream_id);
                Ok(true)
            }
        })
        .await
    }

    /// Marks a recipient of an inactive stream as removed, or restores it.
    /// Returns `true` when the recipient is marked removed afterwards.
    pub async fn toggle_removed_recipient(
        &self,
        stream_id: u64,
        recipient: Address,
        stream_active: bool,
    ) -> Result<bool, ClientError> {
        if stream_active {
            return Err(ClientError::Validation(
                "Cannot remove recipients from active streams. Create a new stream without this recipient.".to_string(),
            ));
        }
        let key = removed_key(stream_id, recipient);
        self.update(|doc| {
            if doc.removed_recipients.remove(&key).unwrap_or(false) {
                Ok(false)
            } else {
                doc.removed_recipients.insert(key, true);
                Ok(true)
            }
        })
        .await
    }

    pub async fn recipient_rates(&self, stream_id: u64) -> BTreeMap<String, U256> {
        self.doc
            .read()
            .await
            .recipient_rates
            .get(&stream_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_recipient_rates(&self, stream_id: u64, rates: BTreeMap<String, U256>) -> Result<(), ClientError> {
        self.update(|doc| {
            doc.recipient_rates.insert(stream_id, rates);
            Ok(())
        })
        .await
    }

    pub async fn replace_rate_cache(&self, cache: BTreeMap<u64, BTreeMap<String, U256>>) -> Result<(), ClientError> {
        self.update(|doc| {
            doc.recipient_rates = cache;
            Ok(())
        })
        .await
    }

    pub async fn add_address_book_entry(
        &self,
        name: &str,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<AddressBookEntry, ClientError> {
        let name = name.trim();
        let parsed: Option<Address> = address.trim().parse().ok();
        let (false, Some(parsed)) = (name.is_empty(), parsed) else {
            return Err(ClientError::Validation("Please enter a valid name and address".to_string()));
        };
        self.update(|doc| {
            let mut id = now.timestamp_millis();
            if let Some(max) = doc.recipients.iter().filter_map(|r| r.id.parse::<i64>().ok()).max() {
                id = id.max(max + 1);
            }
            let entry = AddressBookEntry {
                id: id.to_string(),
                name: name.to_string(),
                address: address_key(parsed),
                created_at: now,
            };
            doc.recipients.push(entry.clone());
            Ok(entry)
        })
        .await
    }

    /// Returns `true` if an entry was removed.
    pub async fn delete_address_book_entry(&self, id: &str) -> Result<bool, ClientError> {
        self.update(|doc| {
            let before = doc.recipients.len();
            doc.recipients.retain(|r| r.id != id);
            Ok(doc.recipients.len() != before)
        })
        .await
    }

    pub async fn save_template(
        &self,
        name: &str,
        hourly_rate: Option<Decimal>,
        duration_type: DurationPreset,
        duration_hours: Option<u64>,
        now: DateTime<Utc>,
    ) -> Result<StreamTemplate, ClientError> {
        let invalid = || ClientError::Validation("Please fill in hourly rate and duration to save as template".to_string());
        let hourly_rate = hourly_rate.filter(|r| *r > Decimal::ZERO).ok_or_else(invalid)?;
        let duration = duration_type.hours().or(duration_hours).filter(|h| *h > 0).ok_or_else(invalid)?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Template name is required".to_string()));
        }

        let template = StreamTemplate {
            id: now.timestamp_millis().to_string(),
            name: name.to_string(),
            hourly_rate,
            duration_type,
            duration_hours: (duration_type == DurationPreset::Custom).then_some(duration),
            description: format!("Template: {}", name),
        };
        self.update(|doc| {
            doc.templates.push(template.clone());
            Ok(template)
        })
        .await
    }
}
