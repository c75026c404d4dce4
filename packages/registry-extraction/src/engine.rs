//! The strategy engine: one bounded, always-terminating pass per call.
//!
//! For each candidate URL the engine tries every form strategy, and for
//! each form result every extraction strategy, accepting the first
//! combination that yields structurally valid records. Exhausting all
//! strategies on a page that loaded is `Outcome::Empty` — a successful
//! call with zero records, never an error and never placeholder data.

use async_trait::async_trait;
use tracing::debug;

use crate::driver::PageDriver;
use crate::error::{ExtractError, ExtractResult};
use crate::profiles;
use crate::strategy::FormApplication;
use crate::types::{Diagnostics, ExtractRequest, Extraction, Outcome, Page};
use crate::validate::filter_plausible;

/// Capability interface consumed by the orchestrator.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, request: &ExtractRequest) -> ExtractResult<Extraction>;
}

/// Strategy engine over a page driver.
pub struct Engine<D: PageDriver> {
    driver: D,
}

impl<D: PageDriver> Engine<D> {
    pub fn new(driver: D) -> Self {
        Self { driver }
    }

    async fn run(&self, request: &ExtractRequest) -> ExtractResult<Extraction> {
        let profile =
            profiles::profile(&request.source_type).ok_or_else(|| ExtractError::Unsupported {
                source_type: request.source_type.clone(),
            })?;

        let mut diagnostics = Diagnostics::default();

        for url_strategy in &profile.url_strategies {
            let Some(url) = url_strategy.build(profile.base_url, request) else {
                diagnostics.note(format!("{}: not applicable", url_strategy.tag()));
                continue;
            };
            diagnostics.urls_tried.push(url.clone());

            // A hard navigation failure aborts the whole call; the
            // orchestrator retries it as a transient error.
            let page = self.driver.navigate(&url).await?;
            debug!(url = %url, strategy = url_strategy.tag(), "navigated");

            for form_strategy in &profile.form_strategies {
                let results_page: Page = match form_strategy.apply(&page, request) {
                    FormApplication::Page(p) => p,
                    FormApplication::Submission(form) => self.driver.submit(&form).await?,
                    FormApplication::NotApplicable => {
                        diagnostics.note(format!(
                            "{}/{}: form not applicable",
                            url_strategy.tag(),
                            form_strategy.tag()
                        ));
                        continue;
                    }
                };

                for extraction_strategy in &profile.extraction_strategies {
                    let raw = extraction_strategy.extract(&results_page, request);
                    let raw_count = raw.len();
                    let (mut valid, rejected) = filter_plausible(raw);
                    diagnostics.rejected_records += rejected;
                    diagnostics.note(format!(
                        "{}/{}/{}: {} raw, {} valid",
                        url_strategy.tag(),
                        form_strategy.tag(),
                        extraction_strategy.tag(),
                        raw_count,
                        valid.len()
                    ));

                    if valid.is_empty() {
                        continue;
                    }

                    if let Some(limit) = request.result_limit {
                        valid.truncate(limit);
                    }

                    let strategy_used = format!(
                        "{}/{}/{}",
                        url_strategy.tag(),
                        form_strategy.tag(),
                        extraction_strategy.tag()
                    );
                    debug!(
                        strategy = %strategy_used,
                        records = valid.len(),
                        rejected = rejected,
                        "extraction succeeded"
                    );
                    return Ok(Extraction {
                        records: valid,
                        outcome: Outcome::Success { strategy_used },
                        diagnostics,
                    });
                }
            }
        }

        debug!(
            source_type = %request.source_type,
            locality = %request.locality_code,
            urls = diagnostics.urls_tried.len(),
            "all strategies exhausted, returning empty"
        );
        Ok(Extraction {
            records: Vec::new(),
            outcome: Outcome::Empty,
            diagnostics,
        })
    }
}

#[async_trait]
impl<D: PageDriver> Extractor for Engine<D> {
    async fn extract(&self, request: &ExtractRequest) -> ExtractResult<Extraction> {
        self.run(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockDriver;

    fn request() -> ExtractRequest {
        ExtractRequest {
            source_type: "state_board".to_string(),
            jurisdiction: "mn".to_string(),
            locality_code: "minneapolis".to_string(),
            profession: "electrician".to_string(),
            result_limit: None,
        }
    }

    const ROSTER_URL: &str =
        "https://licensing.mn.gov/board/roster?locality=minneapolis&profession=electrician";

    #[tokio::test]
    async fn first_url_strategy_with_table_wins() {
        let driver = MockDriver::new().with_page(
            ROSTER_URL,
            r#"<table>
                <tr><td>Ada Larson</td><td>EL-4410</td><td>Active</td></tr>
            </table>"#,
        );
        let extraction = Engine::new(driver).extract(&request()).await.unwrap();
        assert_eq!(extraction.records.len(), 1);
        match extraction.outcome {
            Outcome::Success { ref strategy_used } => {
                assert_eq!(strategy_used, "roster_by_locality/no_form/results_table");
            }
            Outcome::Empty => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn falls_through_to_form_strategy() {
        // Roster page has no data; search page has a locality form whose
        // submission returns a results table.
        let driver = MockDriver::new()
            .with_page(ROSTER_URL, "<p>Nothing here</p>")
            .with_page(
                "https://licensing.mn.gov/board/search",
                r#"<form action="/board/results" method="get">
                    <input name="city" value=""/>
                </form>"#,
            )
            .with_page(
                "https://licensing.mn.gov/board/results",
                r#"<table><tr><td>Sam Osei</td><td>EL-9921</td></tr></table>"#,
            );
        let extraction = Engine::new(driver).extract(&request()).await.unwrap();
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].source_license_id, "EL-9921");
    }

    #[tokio::test]
    async fn exhausted_strategies_return_empty_not_error() {
        let driver = MockDriver::new()
            .with_page(ROSTER_URL, "<p>No matching licensees.</p>")
            .with_page("https://licensing.mn.gov/board/search", "<p>Search</p>");
        let extraction = Engine::new(driver).extract(&request()).await.unwrap();
        assert!(extraction.records.is_empty());
        assert_eq!(extraction.outcome, Outcome::Empty);
        assert!(!extraction.diagnostics.urls_tried.is_empty());
    }

    #[tokio::test]
    async fn navigation_text_is_rejected_then_empty() {
        // A table of navigation links must not be accepted as data.
        let driver = MockDriver::new()
            .with_page(
                ROSTER_URL,
                r#"<table>
                    <tr><td>Next</td><td>2</td></tr>
                    <tr><td>Previous</td><td>1</td></tr>
                </table>"#,
            )
            .with_page("https://licensing.mn.gov/board/search", "<p>Search</p>");
        let extraction = Engine::new(driver).extract(&request()).await.unwrap();
        assert_eq!(extraction.outcome, Outcome::Empty);
        assert!(extraction.records.is_empty());
        assert!(extraction.diagnostics.rejected_records >= 2);
    }

    #[tokio::test]
    async fn unknown_source_type_is_unsupported() {
        let mut req = request();
        req.source_type = "carrier_pigeon_registry".to_string();
        let err = Engine::new(MockDriver::new())
            .extract(&req)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn navigation_failure_is_transient_error() {
        let err = Engine::new(MockDriver::new())
            .extract(&request())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Navigation { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn result_limit_truncates() {
        let mut req = request();
        req.result_limit = Some(1);
        let driver = MockDriver::new().with_page(
            ROSTER_URL,
            r#"<table>
                <tr><td>Ada Larson</td><td>EL-4410</td></tr>
                <tr><td>Sam Osei</td><td>EL-9921</td></tr>
            </table>"#,
        );
        let extraction = Engine::new(driver).extract(&req).await.unwrap();
        assert_eq!(extraction.records.len(), 1);
    }
}
