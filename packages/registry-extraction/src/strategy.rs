//! Tagged extraction strategies.
//!
//! Each registry page is attacked with an ordered list of strategy
//! variants on three axes: which URL to load, how to interact with the
//! page's search form, and how to pull records out of the result
//! markup. Variants are pure with respect to the page they are given;
//! the engine owns ordering and logging.

use chrono::Utc;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::driver::{FormMethod, FormSubmission};
use crate::types::{ExtractRequest, LicenseRecord, Page};

/// How to build a candidate URL for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlStrategy {
    /// The registry's search landing page (form interaction required).
    SearchPage,
    /// A roster page filtered by locality in the query string.
    RosterByLocality,
    /// A per-profession index page.
    ProfessionIndex,
}

impl UrlStrategy {
    pub fn tag(&self) -> &'static str {
        match self {
            UrlStrategy::SearchPage => "search_page",
            UrlStrategy::RosterByLocality => "roster_by_locality",
            UrlStrategy::ProfessionIndex => "profession_index",
        }
    }

    /// Build the candidate URL, or `None` when the variant does not
    /// apply to this request.
    pub fn build(&self, base_url: &str, request: &ExtractRequest) -> Option<String> {
        let base = base_url.replace("{jurisdiction}", &request.jurisdiction);
        match self {
            UrlStrategy::SearchPage => Some(format!("{base}/search")),
            UrlStrategy::RosterByLocality => Some(format!(
                "{base}/roster?locality={}&profession={}",
                request.locality_code, request.profession
            )),
            UrlStrategy::ProfessionIndex => Some(format!("{base}/{}", request.profession)),
        }
    }
}

/// How to interact with a loaded page's search form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormStrategy {
    /// The page is already a results page; no interaction needed.
    NoForm,
    /// Fill a locality/city field (plus profession when present).
    LocalityForm,
    /// Fill a generic keyword box with "profession locality".
    KeywordForm,
}

/// Outcome of applying a form strategy: either a results page to try
/// extraction on, or "this strategy does not apply here".
pub enum FormApplication {
    Page(Page),
    Submission(FormSubmission),
    NotApplicable,
}

impl FormStrategy {
    pub fn tag(&self) -> &'static str {
        match self {
            FormStrategy::NoForm => "no_form",
            FormStrategy::LocalityForm => "locality_form",
            FormStrategy::KeywordForm => "keyword_form",
        }
    }

    /// Work out what submitting this strategy against `page` means.
    ///
    /// Pure: inspects the page only. The engine performs the actual
    /// submission through the driver.
    pub fn apply(&self, page: &Page, request: &ExtractRequest) -> FormApplication {
        match self {
            FormStrategy::NoForm => FormApplication::Page(page.clone()),
            FormStrategy::LocalityForm => {
                match find_form(page, &["locality", "city", "location", "municipality"]) {
                    Some(mut form) => {
                        fill_field(
                            &mut form,
                            &["locality", "city", "location", "municipality"],
                            &request.locality_code,
                        );
                        fill_field(
                            &mut form,
                            &["profession", "license_type", "trade", "occupation"],
                            &request.profession,
                        );
                        FormApplication::Submission(form)
                    }
                    None => FormApplication::NotApplicable,
                }
            }
            FormStrategy::KeywordForm => match find_form(page, &["q", "query", "search", "keyword"])
            {
                Some(mut form) => {
                    fill_field(
                        &mut form,
                        &["q", "query", "search", "keyword"],
                        &format!("{} {}", request.profession, request.locality_code),
                    );
                    FormApplication::Submission(form)
                }
                None => FormApplication::NotApplicable,
            },
        }
    }
}

/// How to pull records out of a results page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// `<table>` rows: name, license id, status, contact columns.
    ResultsTable,
    /// Repeated card/list-item blocks with a "License #" line.
    CardList,
    /// `<dl>` definition lists with labelled fields.
    DefinitionList,
}

impl ExtractionStrategy {
    pub fn tag(&self) -> &'static str {
        match self {
            ExtractionStrategy::ResultsTable => "results_table",
            ExtractionStrategy::CardList => "card_list",
            ExtractionStrategy::DefinitionList => "definition_list",
        }
    }

    /// Extract raw (not yet validated) records from the page.
    pub fn extract(&self, page: &Page, request: &ExtractRequest) -> Vec<LicenseRecord> {
        let document = Html::parse_document(&page.html);
        match self {
            ExtractionStrategy::ResultsTable => extract_table(&document, request),
            ExtractionStrategy::CardList => extract_cards(&document, request),
            ExtractionStrategy::DefinitionList => extract_definition_lists(&document, request),
        }
    }
}

// ---------------------------------------------------------------------------
// Form discovery
// ---------------------------------------------------------------------------

fn selector(css: &str) -> Option<Selector> {
    // Selectors here are static strings; a parse failure is a bug, but
    // we degrade to "nothing matched" rather than panic in library code.
    Selector::parse(css).ok()
}

/// Find the first form on the page containing an input whose name
/// matches one of `field_hints`, and capture its fields.
fn find_form(page: &Page, field_hints: &[&str]) -> Option<FormSubmission> {
    let document = Html::parse_document(&page.html);
    let form_sel = selector("form")?;
    let input_sel = selector("input, select")?;

    for form in document.select(&form_sel) {
        let mut fields = Vec::new();
        let mut matched = false;

        for input in form.select(&input_sel) {
            let Some(name) = input.value().attr("name") else {
                continue;
            };
            let lowered = name.to_ascii_lowercase();
            if field_hints.iter().any(|hint| lowered.contains(hint)) {
                matched = true;
            }
            // Carry hidden inputs so tokens and page state survive.
            let value = input.value().attr("value").unwrap_or_default();
            fields.push((name.to_string(), value.to_string()));
        }

        if !matched {
            continue;
        }

        let action = form.value().attr("action").unwrap_or("");
        let action = resolve_url(&page.url, action)?;
        let method = match form.value().attr("method") {
            Some(m) if m.eq_ignore_ascii_case("post") => FormMethod::Post,
            _ => FormMethod::Get,
        };

        return Some(FormSubmission {
            action,
            method,
            fields,
        });
    }
    None
}

fn fill_field(form: &mut FormSubmission, hints: &[&str], value: &str) {
    for (name, field_value) in &mut form.fields {
        let lowered = name.to_ascii_lowercase();
        if hints.iter().any(|hint| lowered.contains(hint)) {
            *field_value = value.to_string();
            return;
        }
    }
}

fn resolve_url(page_url: &str, action: &str) -> Option<String> {
    if action.is_empty() {
        return Some(page_url.to_string());
    }
    let base = Url::parse(page_url).ok()?;
    base.join(action).ok().map(|u| u.to_string())
}

// ---------------------------------------------------------------------------
// Record extraction
// ---------------------------------------------------------------------------

fn extract_table(document: &Html, request: &ExtractRequest) -> Vec<LicenseRecord> {
    let Some(row_sel) = selector("table tr") else {
        return Vec::new();
    };
    let Some(cell_sel) = selector("td") else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for row in document.select(&row_sel) {
        let cells: Vec<String> = row.select(&cell_sel).map(|cell| text_of(&cell)).collect();
        if cells.len() < 2 {
            continue; // header rows and separators
        }

        // The license id is the first cell that looks like one; the
        // name is the first cell that does not.
        let license_id = cells.iter().find(|c| looks_like_license_id(c));
        let name = cells.iter().find(|c| !looks_like_license_id(c) && !c.is_empty());
        let (Some(license_id), Some(name)) = (license_id, name) else {
            continue;
        };

        let mut record = base_record(request, license_id, name);
        record.license_status = cells
            .iter()
            .find(|c| looks_like_status(c))
            .map(|c| c.to_string());
        record.phone = cells.iter().find(|c| looks_like_phone(c)).cloned();
        record.email = cells.iter().find(|c| c.contains('@')).cloned();
        records.push(record);
    }
    records
}

fn extract_cards(document: &Html, request: &ExtractRequest) -> Vec<LicenseRecord> {
    let Some(card_sel) = selector(".result, .search-result, .licensee, li.record, div.card") else {
        return Vec::new();
    };
    let heading_sel = selector("h2, h3, h4, a, strong");

    let mut records = Vec::new();
    for card in document.select(&card_sel) {
        let body = text_of(&card);
        let Some(license_id) = labelled_value(&body, &["license #", "license no", "license:"])
        else {
            continue;
        };

        let name = heading_sel
            .as_ref()
            .and_then(|sel| card.select(sel).next())
            .map(|el| text_of(&el))
            .unwrap_or_default();
        if name.is_empty() {
            continue;
        }

        let mut record = base_record(request, &license_id, &name);
        record.license_status = labelled_value(&body, &["status:"]);
        record.phone = labelled_value(&body, &["phone:", "tel:"]);
        record.email = labelled_value(&body, &["email:"]);
        record.address = labelled_value(&body, &["address:"]);
        records.push(record);
    }
    records
}

fn extract_definition_lists(document: &Html, request: &ExtractRequest) -> Vec<LicenseRecord> {
    let Some(dl_sel) = selector("dl") else {
        return Vec::new();
    };
    let Some(dt_sel) = selector("dt") else {
        return Vec::new();
    };
    let Some(dd_sel) = selector("dd") else {
        return Vec::new();
    };

    let mut records = Vec::new();
    for dl in document.select(&dl_sel) {
        let labels: Vec<String> = dl
            .select(&dt_sel)
            .map(|el| text_of(&el).to_ascii_lowercase())
            .collect();
        let values: Vec<String> = dl.select(&dd_sel).map(|el| text_of(&el)).collect();

        let field = |hints: &[&str]| -> Option<String> {
            labels
                .iter()
                .position(|label| hints.iter().any(|hint| label.contains(hint)))
                .and_then(|idx| values.get(idx).cloned())
        };

        let (Some(license_id), Some(name)) = (field(&["license"]), field(&["name"])) else {
            continue;
        };

        let mut record = base_record(request, &license_id, &name);
        record.license_status = field(&["status"]);
        record.phone = field(&["phone"]);
        record.email = field(&["email"]);
        record.address = field(&["address"]);
        records.push(record);
    }
    records
}

fn base_record(request: &ExtractRequest, license_id: &str, name: &str) -> LicenseRecord {
    LicenseRecord {
        source_type: request.source_type.clone(),
        source_license_id: license_id.trim().to_string(),
        name: name.trim().to_string(),
        locality: request.locality_code.clone(),
        profession: request.profession.clone(),
        license_status: None,
        phone: None,
        email: None,
        address: None,
        website: None,
        scraped_at: Utc::now(),
    }
}

fn text_of(element: &ElementRef) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Pull `"<label> <value>"` out of a flattened text blob.
fn labelled_value(body: &str, labels: &[&str]) -> Option<String> {
    let lowered = body.to_ascii_lowercase();
    for label in labels {
        if let Some(pos) = lowered.find(label) {
            let after = &body[pos + label.len()..];
            let value: String = after
                .trim_start_matches([':', ' '])
                .chars()
                .take_while(|c| *c != '\n')
                .collect();
            // Values run to the next labelled field on the same line.
            let value = value
                .split("  ")
                .next()
                .unwrap_or("")
                .split(" Status:")
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            let value = match value.split_once(|c: char| c == ';') {
                Some((head, _)) => head.trim().to_string(),
                None => value,
            };
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn looks_like_license_id(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty()
        && trimmed.len() <= 32
        && trimmed.chars().any(|c| c.is_ascii_digit())
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '#')
}

fn looks_like_status(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "active" | "inactive" | "expired" | "suspended" | "pending" | "revoked"
    )
}

fn looks_like_phone(text: &str) -> bool {
    let digits = text.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 7 && text.chars().all(|c| c.is_ascii_digit() || "()-. +".contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ExtractRequest {
        ExtractRequest {
            source_type: "state_board".to_string(),
            jurisdiction: "mn".to_string(),
            locality_code: "minneapolis".to_string(),
            profession: "electrician".to_string(),
            result_limit: None,
        }
    }

    #[test]
    fn url_strategies_substitute_jurisdiction() {
        let url = UrlStrategy::RosterByLocality
            .build("https://licensing.{jurisdiction}.gov/board", &request())
            .unwrap();
        assert_eq!(
            url,
            "https://licensing.mn.gov/board/roster?locality=minneapolis&profession=electrician"
        );
    }

    #[test]
    fn table_extraction_reads_rows() {
        let page = Page::new(
            "https://example.gov/roster",
            r#"<table>
                <tr><th>Name</th><th>License</th><th>Status</th></tr>
                <tr><td>Ada Larson</td><td>EL-4410</td><td>Active</td></tr>
                <tr><td>Sam Osei</td><td>EL-9921</td><td>Expired</td></tr>
            </table>"#,
        );
        let records = ExtractionStrategy::ResultsTable.extract(&page, &request());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "Ada Larson");
        assert_eq!(records[0].source_license_id, "EL-4410");
        assert_eq!(records[0].license_status.as_deref(), Some("Active"));
    }

    #[test]
    fn card_extraction_requires_license_line() {
        let page = Page::new(
            "https://example.gov/results",
            r#"<div class="result"><h3>Maria Chen</h3><p>License #: PL-100; Status: Active</p></div>
               <div class="result"><h3>No License Here</h3><p>just text</p></div>"#,
        );
        let records = ExtractionStrategy::CardList.extract(&page, &request());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_license_id, "PL-100");
        assert_eq!(records[0].name, "Maria Chen");
    }

    #[test]
    fn definition_list_extraction_maps_labels() {
        let page = Page::new(
            "https://example.gov/detail",
            r#"<dl>
                <dt>Name</dt><dd>Lee Okafor</dd>
                <dt>License Number</dt><dd>CO-552</dd>
                <dt>Status</dt><dd>Active</dd>
                <dt>Phone</dt><dd>612-555-0144</dd>
            </dl>"#,
        );
        let records = ExtractionStrategy::DefinitionList.extract(&page, &request());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_license_id, "CO-552");
        assert_eq!(records[0].phone.as_deref(), Some("612-555-0144"));
    }

    #[test]
    fn locality_form_fills_matching_fields() {
        let page = Page::new(
            "https://licensing.mn.gov/board/search",
            r#"<form action="/board/results" method="get">
                <input type="hidden" name="token" value="abc"/>
                <input name="city" value=""/>
                <select name="profession"></select>
            </form>"#,
        );
        match FormStrategy::LocalityForm.apply(&page, &request()) {
            FormApplication::Submission(form) => {
                assert_eq!(form.action, "https://licensing.mn.gov/board/results");
                assert_eq!(form.method, FormMethod::Get);
                assert!(form.fields.contains(&("token".to_string(), "abc".to_string())));
                assert!(form
                    .fields
                    .contains(&("city".to_string(), "minneapolis".to_string())));
            }
            _ => panic!("expected a form submission"),
        }
    }

    #[test]
    fn locality_form_not_applicable_without_matching_input() {
        let page = Page::new(
            "https://example.gov/search",
            r#"<form action="/other"><input name="unrelated"/></form>"#,
        );
        assert!(matches!(
            FormStrategy::LocalityForm.apply(&page, &request()),
            FormApplication::NotApplicable
        ));
    }
}
