//! Page driver abstraction.
//!
//! The engine drives registry pages through the [`PageDriver`] trait so
//! tests can script page content without any network. The production
//! implementation is [`HttpDriver`]: plain HTTP with form submission by
//! GET query string or POST body, which is how the supported registries
//! actually behave (server-rendered search pages, no client scripting).

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ExtractError, ExtractResult};
use crate::types::Page;

/// HTTP method for a form submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

/// A concrete form submission derived from a page by a form strategy.
#[derive(Debug, Clone)]
pub struct FormSubmission {
    /// Absolute URL the form posts to.
    pub action: String,
    pub method: FormMethod,
    /// Field name/value pairs, including hidden inputs carried over.
    pub fields: Vec<(String, String)>,
}

/// Drives pages: navigation and form interaction.
///
/// Implementations must bound every call — no operation may block
/// indefinitely.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Load a page by URL.
    async fn navigate(&self, url: &str) -> ExtractResult<Page>;

    /// Submit a form and return the resulting page.
    async fn submit(&self, form: &FormSubmission) -> ExtractResult<Page>;
}

/// Production driver over `reqwest`.
pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    /// Create a driver with a per-request timeout.
    pub fn new(request_timeout: Duration) -> ExtractResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("registry-extraction/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn read_page(&self, url: &str, response: reqwest::Response) -> ExtractResult<Page> {
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::Navigation {
                url: url.to_string(),
                reason: format!("status {status}"),
            });
        }
        let html = response.text().await.map_err(|e| map_reqwest(url, e))?;
        Ok(Page::new(final_url, html))
    }
}

#[async_trait]
impl PageDriver for HttpDriver {
    async fn navigate(&self, url: &str) -> ExtractResult<Page> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest(url, e))?;
        self.read_page(url, response).await
    }

    async fn submit(&self, form: &FormSubmission) -> ExtractResult<Page> {
        let request = match form.method {
            FormMethod::Get => self.client.get(&form.action).query(&form.fields),
            FormMethod::Post => self.client.post(&form.action).form(&form.fields),
        };
        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest(&form.action, e))?;
        self.read_page(&form.action, response).await
    }
}

fn map_reqwest(url: &str, error: reqwest::Error) -> ExtractError {
    if error.is_timeout() {
        ExtractError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() || error.is_redirect() {
        ExtractError::Navigation {
            url: url.to_string(),
            reason: error.to_string(),
        }
    } else {
        ExtractError::Http(error)
    }
}
