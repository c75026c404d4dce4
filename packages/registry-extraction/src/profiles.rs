//! Per-source extraction profiles.
//!
//! A profile fixes the strategy ordering for one registry category.
//! Orderings are deliberate: the cheapest/most reliable variant first,
//! fallbacks after. Unknown source types have no profile, which the
//! engine surfaces as a permanent `Unsupported` error.

use crate::strategy::{ExtractionStrategy, FormStrategy, UrlStrategy};

/// Fixed strategy ordering for one source type.
#[derive(Debug, Clone)]
pub struct SourceProfile {
    pub source_type: &'static str,
    /// Base URL template; `{jurisdiction}` is substituted per request.
    pub base_url: &'static str,
    pub url_strategies: Vec<UrlStrategy>,
    pub form_strategies: Vec<FormStrategy>,
    pub extraction_strategies: Vec<ExtractionStrategy>,
}

/// Look up the built-in profile for a source type.
pub fn profile(source_type: &str) -> Option<SourceProfile> {
    match source_type {
        "state_board" => Some(SourceProfile {
            source_type: "state_board",
            base_url: "https://licensing.{jurisdiction}.gov/board",
            url_strategies: vec![UrlStrategy::RosterByLocality, UrlStrategy::SearchPage],
            form_strategies: vec![FormStrategy::NoForm, FormStrategy::LocalityForm],
            extraction_strategies: vec![
                ExtractionStrategy::ResultsTable,
                ExtractionStrategy::CardList,
            ],
        }),
        "county_registry" => Some(SourceProfile {
            source_type: "county_registry",
            base_url: "https://records.{jurisdiction}.us/licenses",
            url_strategies: vec![UrlStrategy::SearchPage, UrlStrategy::ProfessionIndex],
            form_strategies: vec![
                FormStrategy::LocalityForm,
                FormStrategy::KeywordForm,
                FormStrategy::NoForm,
            ],
            extraction_strategies: vec![
                ExtractionStrategy::CardList,
                ExtractionStrategy::ResultsTable,
                ExtractionStrategy::DefinitionList,
            ],
        }),
        "municipal_portal" => Some(SourceProfile {
            source_type: "municipal_portal",
            base_url: "https://permits.{jurisdiction}.gov",
            url_strategies: vec![UrlStrategy::ProfessionIndex, UrlStrategy::SearchPage],
            form_strategies: vec![FormStrategy::NoForm, FormStrategy::KeywordForm],
            extraction_strategies: vec![
                ExtractionStrategy::DefinitionList,
                ExtractionStrategy::ResultsTable,
            ],
        }),
        _ => None,
    }
}

/// All source types with a built-in profile.
pub fn supported_source_types() -> &'static [&'static str] {
    &["state_board", "county_registry", "municipal_portal"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_supported_source_has_a_profile() {
        for source in supported_source_types() {
            let profile = profile(source).expect("missing profile");
            assert!(!profile.url_strategies.is_empty());
            assert!(!profile.form_strategies.is_empty());
            assert!(!profile.extraction_strategies.is_empty());
        }
    }

    #[test]
    fn unknown_source_has_no_profile() {
        assert!(profile("carrier_pigeon_registry").is_none());
    }
}
