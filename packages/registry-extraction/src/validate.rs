//! Structural validation of extracted records.
//!
//! Extraction strategies are heuristic and will happily pull
//! navigation text or page chrome out of a badly matched selector. A
//! record must pass these plausibility checks before the engine will
//! accept it; a strategy whose entire output fails validation is
//! treated as having found nothing, and the engine falls through to
//! the next strategy.

use crate::types::LicenseRecord;

/// Navigation and page-chrome strings that show up when a selector
/// matches site furniture instead of listing data.
const BOILERPLATE: &[&str] = &[
    "home",
    "search",
    "login",
    "log in",
    "sign in",
    "sign up",
    "menu",
    "about",
    "about us",
    "contact",
    "contact us",
    "help",
    "faq",
    "next",
    "previous",
    "back",
    "skip to content",
    "privacy policy",
    "terms of use",
    "accessibility",
    "results per page",
    "no results found",
];

/// Whether a single record is plausible listing data.
pub fn is_plausible(record: &LicenseRecord) -> bool {
    let license_id = record.source_license_id.trim();
    if license_id.is_empty() {
        return false;
    }

    let name = record.name.trim();
    if name.len() < 2 {
        return false;
    }
    if name.chars().all(|c| !c.is_alphanumeric()) {
        return false;
    }

    let lowered_name = name.to_ascii_lowercase();
    if BOILERPLATE.iter().any(|b| lowered_name == *b) {
        return false;
    }

    // A license id that is itself boilerplate means the strategy
    // matched chrome, not data.
    let lowered_id = license_id.to_ascii_lowercase();
    if BOILERPLATE.iter().any(|b| lowered_id == *b) {
        return false;
    }

    true
}

/// Split records into (accepted, rejected_count).
pub fn filter_plausible(records: Vec<LicenseRecord>) -> (Vec<LicenseRecord>, usize) {
    let total = records.len();
    let accepted: Vec<LicenseRecord> = records.into_iter().filter(is_plausible).collect();
    let rejected = total - accepted.len();
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(name: &str, license_id: &str) -> LicenseRecord {
        LicenseRecord {
            source_type: "state_board".to_string(),
            source_license_id: license_id.to_string(),
            name: name.to_string(),
            locality: "duluth".to_string(),
            profession: "plumber".to_string(),
            license_status: None,
            phone: None,
            email: None,
            address: None,
            website: None,
            scraped_at: Utc::now(),
        }
    }

    #[test]
    fn accepts_real_looking_record() {
        assert!(is_plausible(&record("Ada Larson", "EL-4410")));
    }

    #[test]
    fn rejects_empty_license_id() {
        assert!(!is_plausible(&record("Ada Larson", "  ")));
    }

    #[test]
    fn rejects_navigation_text_as_name() {
        assert!(!is_plausible(&record("Next", "2")));
        assert!(!is_plausible(&record("Privacy Policy", "PP-1")));
    }

    #[test]
    fn rejects_punctuation_only_name() {
        assert!(!is_plausible(&record("——", "X-1")));
    }

    #[test]
    fn filter_reports_rejected_count() {
        let records = vec![
            record("Ada Larson", "EL-4410"),
            record("Menu", "1"),
            record("Sam Osei", "EL-9921"),
        ];
        let (accepted, rejected) = filter_plausible(records);
        assert_eq!(accepted.len(), 2);
        assert_eq!(rejected, 1);
    }
}
