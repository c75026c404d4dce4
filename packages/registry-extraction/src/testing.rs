//! Scripted doubles for tests.
//!
//! `MockDriver` serves canned HTML by URL; `ScriptedExtractor` skips
//! page driving entirely and returns a scripted outcome per call, for
//! orchestrator-level tests that do not care about markup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::driver::{FormSubmission, PageDriver};
use crate::engine::Extractor;
use crate::error::{ExtractError, ExtractResult};
use crate::types::{Diagnostics, ExtractRequest, Extraction, LicenseRecord, Outcome, Page};

/// Page driver backed by a URL → HTML map.
///
/// Unknown URLs fail with a navigation error, which is also how tests
/// exercise the hard-failure path.
#[derive(Default)]
pub struct MockDriver {
    pages: HashMap<String, String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a page at an exact URL.
    pub fn with_page(mut self, url: impl Into<String>, html: impl Into<String>) -> Self {
        self.pages.insert(url.into(), html.into());
        self
    }

    fn lookup(&self, url: &str) -> ExtractResult<Page> {
        match self.pages.get(url) {
            Some(html) => Ok(Page::new(url, html.clone())),
            None => Err(ExtractError::Navigation {
                url: url.to_string(),
                reason: "no scripted page".to_string(),
            }),
        }
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn navigate(&self, url: &str) -> ExtractResult<Page> {
        self.lookup(url)
    }

    async fn submit(&self, form: &FormSubmission) -> ExtractResult<Page> {
        self.lookup(&form.action)
    }
}

/// What a [`ScriptedExtractor`] does on each call.
#[derive(Debug, Clone)]
pub enum Script {
    /// Return this many synthetic-but-valid records.
    Records(usize),
    /// Return a successful empty extraction.
    Empty,
    /// Fail with a transient (retryable) error.
    TransientFailure,
    /// Fail permanently as an unsupported source.
    Unsupported,
}

/// Extractor double with a per-locality script and a call counter.
pub struct ScriptedExtractor {
    default_script: Script,
    by_locality: HashMap<String, Script>,
    calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn new(default_script: Script) -> Self {
        Self {
            default_script,
            by_locality: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Override the script for one locality code.
    pub fn with_locality(mut self, locality_code: impl Into<String>, script: Script) -> Self {
        self.by_locality.insert(locality_code.into(), script);
        self
    }

    /// Total extraction calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn records_for(request: &ExtractRequest, count: usize) -> Vec<LicenseRecord> {
        (0..count)
            .map(|i| LicenseRecord {
                source_type: request.source_type.clone(),
                source_license_id: format!(
                    "{}-{}-{}",
                    request.locality_code.to_ascii_uppercase(),
                    request.profession.to_ascii_uppercase(),
                    i
                ),
                name: format!("Licensee {} {}", request.locality_code, i),
                locality: request.locality_code.clone(),
                profession: request.profession.clone(),
                license_status: Some("Active".to_string()),
                phone: None,
                email: None,
                address: None,
                website: None,
                scraped_at: Utc::now(),
            })
            .collect()
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, request: &ExtractRequest) -> ExtractResult<Extraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let script = self
            .by_locality
            .get(&request.locality_code)
            .unwrap_or(&self.default_script);

        match script {
            Script::Records(count) => Ok(Extraction {
                records: Self::records_for(request, *count),
                outcome: Outcome::Success {
                    strategy_used: "scripted".to_string(),
                },
                diagnostics: Diagnostics::default(),
            }),
            Script::Empty => Ok(Extraction {
                records: Vec::new(),
                outcome: Outcome::Empty,
                diagnostics: Diagnostics::default(),
            }),
            Script::TransientFailure => Err(ExtractError::Navigation {
                url: format!("https://scripted/{}", request.locality_code),
                reason: "scripted transient failure".to_string(),
            }),
            Script::Unsupported => Err(ExtractError::Unsupported {
                source_type: request.source_type.clone(),
            }),
        }
    }
}
