//! Data types shared across the extraction pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extraction request: which registry to drive and for what query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractRequest {
    /// External registry category, e.g. `"state_board"`.
    pub source_type: String,
    /// Two-letter jurisdiction code, e.g. `"mn"`.
    pub jurisdiction: String,
    /// Locality code within the jurisdiction, e.g. `"minneapolis"`.
    pub locality_code: String,
    /// Profession being searched, e.g. `"electrician"`.
    pub profession: String,
    /// Cap on returned records; `None` means no cap.
    #[serde(default)]
    pub result_limit: Option<usize>,
}

/// A single harvested licensee entry.
///
/// Deduplication key is `(source_type, source_license_id)` — callers
/// upsert on that pair, so re-scraping updates rather than duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub source_type: String,
    pub source_license_id: String,
    pub name: String,
    pub locality: String,
    pub profession: String,
    pub license_status: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub website: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

/// How an extraction call concluded when it did not hard-fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    /// At least one structurally valid record was extracted.
    Success {
        /// `"url/form/extraction"` tags of the winning combination.
        strategy_used: String,
    },
    /// Every strategy was exhausted without a valid record.
    ///
    /// This is a legitimate, cacheable result ("this locality has no
    /// matches"), not a failure, and must never be padded with
    /// placeholder entries.
    Empty,
}

/// The full response of one extraction call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extraction {
    pub records: Vec<LicenseRecord>,
    pub outcome: Outcome,
    pub diagnostics: Diagnostics,
}

impl Extraction {
    pub fn is_empty(&self) -> bool {
        matches!(self.outcome, Outcome::Empty)
    }
}

/// Trace of what the engine tried, in order. Emitted for audit logs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Candidate URLs navigated, in order.
    pub urls_tried: Vec<String>,
    /// One note per strategy step, e.g. `"search_path/locality_form/results_table: 0 valid"`.
    pub steps: Vec<String>,
    /// Count of records discarded by structural validation.
    pub rejected_records: usize,
}

impl Diagnostics {
    pub fn note(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }
}

/// A fetched page, held as plain strings so futures stay `Send`.
#[derive(Debug, Clone)]
pub struct Page {
    /// Final URL after redirects.
    pub url: String,
    /// Raw HTML body.
    pub html: String,
}

impl Page {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}
