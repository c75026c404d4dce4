//! Multi-Strategy Registry Extraction Library
//!
//! Drives public professional-licensing registry pages through an
//! ordered set of strategies and returns either structured license
//! records or an explicit empty result. Stateless per call.
//!
//! # Design
//!
//! - Strategy-driven: URL × form × extraction variants tried in a
//!   fixed, logged order per source type.
//! - Structural validation gates acceptance — a selector that matches
//!   navigation chrome falls through to the next strategy instead of
//!   polluting the result set.
//! - An exhausted page is `Outcome::Empty`, a valid cacheable result;
//!   only unreachable/broken pages are errors.
//! - Library handles page mechanics; the orchestrator owns rate
//!   limiting, retries, and persistence.
//!
//! # Usage
//!
//! ```rust,ignore
//! use registry_extraction::{Engine, Extractor, ExtractRequest, HttpDriver};
//!
//! let driver = HttpDriver::new(std::time::Duration::from_secs(30))?;
//! let engine = Engine::new(driver);
//! let extraction = engine.extract(&request).await?;
//! ```

pub mod driver;
pub mod engine;
pub mod error;
pub mod profiles;
pub mod strategy;
pub mod testing;
pub mod types;
pub mod validate;

pub use driver::{FormMethod, FormSubmission, HttpDriver, PageDriver};
pub use engine::{Engine, Extractor};
pub use error::{ExtractError, ExtractResult};
pub use profiles::{profile, supported_source_types, SourceProfile};
pub use strategy::{ExtractionStrategy, FormStrategy, UrlStrategy};
pub use testing::{MockDriver, Script, ScriptedExtractor};
pub use types::{Diagnostics, ExtractRequest, Extraction, LicenseRecord, Outcome, Page};
pub use validate::{filter_plausible, is_plausible};
