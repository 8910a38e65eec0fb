//! Post-deploy smoke check against the public site.
//!
//! The front page must answer 200 and link more notebook thumbnails than
//! the configured minimum; every linked notebook must then render with a
//! 200 of its own.

use std::time::Duration;

use regex::Regex;
use reqwest::StatusCode;
use serde::Serialize;
use tabled::Tabled;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::output::display_option;

#[derive(Debug, Error)]
pub enum SmokeError {
    #[error("invalid base URL '{url}': {source}")]
    BaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("front page {url} answered {status}")]
    FrontPage { url: String, status: u16 },

    #[error("front page links {found} thumbnails, expected more than {min}")]
    TooFewThumbnails { found: usize, min: usize },

    #[error("{failed} of {checked} notebooks did not render")]
    Notebooks { failed: usize, checked: usize },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("invalid link pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// One notebook fetched from the front page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Tabled)]
pub struct PageCheck {
    #[tabled(rename = "URL")]
    pub url: String,

    /// Absent when the request itself failed.
    #[tabled(rename = "Status", display = "display_option")]
    pub status: Option<u16>,
}

impl PageCheck {
    pub fn ok(&self) -> bool {
        self.status == Some(StatusCode::OK.as_u16())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SmokeReport {
    pub front_page: String,
    pub pages: Vec<PageCheck>,
}

impl SmokeReport {
    pub fn failures(&self) -> impl Iterator<Item = &PageCheck> {
        self.pages.iter().filter(|p| !p.ok())
    }

    /// Error out when any notebook failed.
    pub fn ensure_ok(&self) -> Result<(), SmokeError> {
        match self.failures().count() {
            0 => Ok(()),
            failed => Err(SmokeError::Notebooks {
                failed,
                checked: self.pages.len(),
            }),
        }
    }
}

/// Finds `href`s of `<a class="... thumbnail ...">` tags.
struct ThumbnailScanner {
    anchor: Regex,
    attr: Regex,
}

impl ThumbnailScanner {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            anchor: Regex::new(r"(?is)<a\s[^>]*>")?,
            attr: Regex::new(r#"(?is)([a-z][a-z-]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)?,
        })
    }

    fn links(&self, html: &str) -> Vec<String> {
        self.anchor
            .find_iter(html)
            .filter_map(|tag| {
                let mut href = None;
                let mut thumbnail = false;
                for caps in self.attr.captures_iter(tag.as_str()) {
                    let value = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .or_else(|| caps.get(4))
                        .map_or("", |m| m.as_str());
                    match caps[1].to_ascii_lowercase().as_str() {
                        "class" => thumbnail = value.split_whitespace().any(|c| c == "thumbnail"),
                        "href" => href = Some(value.to_string()),
                        _ => {}
                    }
                }
                href.filter(|_| thumbnail)
            })
            .collect()
    }
}

/// Thumbnail links on a page, in document order.
pub fn thumbnail_links(html: &str) -> Result<Vec<String>, SmokeError> {
    Ok(ThumbnailScanner::new()?.links(html))
}

pub struct SmokeCheck {
    client: reqwest::Client,
    base: Url,
    min_thumbnails: usize,
}

impl SmokeCheck {
    pub fn new(base_url: &str, min_thumbnails: usize, timeout: Duration) -> Result<Self, SmokeError> {
        let base = Url::parse(base_url).map_err(|source| SmokeError::BaseUrl {
            url: base_url.to_string(),
            source,
        })?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            min_thumbnails,
        })
    }

    /// Check the front page, then every notebook it links.
    ///
    /// Front page failures abort; notebook failures are collected in the
    /// report.
    pub async fn run(&self) -> Result<SmokeReport, SmokeError> {
        let front_page = self.base.to_string();
        info!(url = %front_page, "Checking front page");

        let response = self
            .client
            .get(self.base.clone())
            .send()
            .await
            .map_err(|source| SmokeError::Request {
                url: front_page.clone(),
                source,
            })?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(SmokeError::FrontPage {
                url: front_page,
                status: status.as_u16(),
            });
        }
        let html = response.text().await.map_err(|source| SmokeError::Request {
            url: front_page.clone(),
            source,
        })?;

        let links = thumbnail_links(&html)?;
        if links.len() <= self.min_thumbnails {
            return Err(SmokeError::TooFewThumbnails {
                found: links.len(),
                min: self.min_thumbnails,
            });
        }

        let mut pages = Vec::with_capacity(links.len());
        for link in &links {
            pages.push(self.check_page(link).await);
        }

        let report = SmokeReport { front_page, pages };
        info!(
            checked = report.pages.len(),
            failed = report.failures().count(),
            "Smoke check finished"
        );
        Ok(report)
    }

    async fn check_page(&self, link: &str) -> PageCheck {
        let url = match self.base.join(link) {
            Ok(url) => url,
            Err(e) => {
                warn!(link, error = %e, "Unusable thumbnail link");
                return PageCheck {
                    url: link.to_string(),
                    status: None,
                };
            }
        };

        let status = match self.client.get(url.clone()).send().await {
            Ok(response) => Some(response.status().as_u16()),
            Err(e) => {
                warn!(url = %url, error = %e, "Notebook request failed");
                None
            }
        };
        debug!(url = %url, status = ?status, "Checked notebook");
        PageCheck {
            url: url.to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn front_page(count: usize) -> String {
        let mut html = String::from("<html><body><a href=\"/faq\">FAQ</a>\n");
        for i in 0..count {
            html.push_str(&format!(
                "<a class=\"thumbnail col-md-3\" href=\"/github/demo/nb{i}.ipynb\"><img src=\"/static/{i}.png\"></a>\n"
            ));
        }
        html.push_str("</body></html>");
        html
    }

    async fn site(count: usize) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(front_page(count)))
            .mount(&server)
            .await;
        server
    }

    fn check(server: &MockServer) -> SmokeCheck {
        SmokeCheck::new(&server.uri(), 5, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_only_thumbnail_anchors_are_collected() {
        let html = r#"
            <a href="/faq">FAQ</a>
            <A HREF='/url/example.com/a.ipynb' Class='thumbnail'>a</A>
            <a class="btn thumbnail-ish" href="/nope">x</a>
            <a data-x="1" class=thumbnail href=/github/b.ipynb>b</a>
        "#;
        assert_eq!(
            thumbnail_links(html).unwrap(),
            vec!["/url/example.com/a.ipynb", "/github/b.ipynb"]
        );
    }

    #[tokio::test]
    async fn test_every_notebook_renders() {
        let server = site(6).await;
        Mock::given(method("GET"))
            .and(path_regex("^/github/demo/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(6)
            .mount(&server)
            .await;

        let report = check(&server).run().await.unwrap();

        assert_eq!(report.pages.len(), 6);
        assert!(report.ensure_ok().is_ok());
        assert!(report.pages[0].url.ends_with("/github/demo/nb0.ipynb"));
    }

    #[tokio::test]
    async fn test_failing_notebook_is_reported() {
        let server = site(6).await;
        Mock::given(method("GET"))
            .and(path("/github/demo/nb3.ipynb"))
            .respond_with(ResponseTemplate::new(500))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex("^/github/demo/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let report = check(&server).run().await.unwrap();

        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].status, Some(500));
        assert!(matches!(
            report.ensure_ok(),
            Err(SmokeError::Notebooks { failed: 1, checked: 6 })
        ));
    }

    #[tokio::test]
    async fn test_front_page_needs_enough_thumbnails() {
        let server = site(5).await;

        let err = check(&server).run().await.unwrap_err();
        assert!(matches!(err, SmokeError::TooFewThumbnails { found: 5, min: 5 }));
    }

    #[tokio::test]
    async fn test_front_page_must_answer_ok() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = check(&server).run().await.unwrap_err();
        assert!(matches!(err, SmokeError::FrontPage { status: 503, .. }));
    }
}
