//! Paper search against the arXiv HTML results listing.
//!
//! Notes:
//! - The listing at `https://arxiv.org/search/` is the page a browser
//!   renders; entries live under `li.arxiv-result`.
//! - Parsing is deliberately minimal and resilient: a malformed entry is
//!   skipped, never fatal, and an empty listing is a valid result.

use answerpipe_core::{Error, PaperResult, Result};
use std::time::Duration;

fn arxiv_endpoint_from_env() -> Option<String> {
    std::env::var("ANSWERPIPE_ARXIV_URL")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct ArxivClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl ArxivClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            endpoint: arxiv_endpoint_from_env()
                .unwrap_or_else(|| "https://arxiv.org/search/".to_string()),
            timeout: Duration::from_secs(10),
        }
    }

    /// Point at a different listing endpoint (tests, mirrors).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Newest-first full-text search, one listing page (25 entries).
    pub async fn search(&self, query: &str) -> Result<Vec<PaperResult>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::Argument("query must be non-empty".to_string()));
        }

        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("query", query),
                ("searchtype", "all"),
                ("abstracts", "show"),
                ("order", "-announced_date_first"),
                ("size", "25"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!("arxiv search HTTP {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;
        Ok(parse_results(&body))
    }
}

fn parse_results(html: &str) -> Vec<PaperResult> {
    let doc = html_scraper::Html::parse_document(html);
    let Some(entry_sel) = html_scraper::Selector::parse("li.arxiv-result").ok() else {
        return Vec::new();
    };
    let mut papers = Vec::new();
    for entry in doc.select(&entry_sel) {
        match parse_entry(entry) {
            Some(paper) => papers.push(paper),
            None => tracing::debug!("skipping malformed arxiv entry"),
        }
    }
    papers
}

fn parse_entry(entry: html_scraper::ElementRef<'_>) -> Option<PaperResult> {
    // The identifier line reads "arXiv:2401.12345"; the id is the tail.
    let id_text = text_of(select_first(entry, "p.list-title a")?);
    let paper_id = id_text.rsplit(':').next().unwrap_or("").trim().to_string();
    if paper_id.is_empty() {
        return None;
    }

    let title = text_of(select_first(entry, "p.title")?);
    if title.is_empty() {
        return None;
    }

    let authors = authors_of(entry);
    let abstract_text = select_first(entry, "p.abstract span.abstract-full")
        .or_else(|| select_first(entry, "p.abstract span.abstract-short"))
        .map(|el| clean_abstract(&text_of(el)))
        .unwrap_or_default();

    Some(PaperResult {
        title,
        authors,
        abstract_text,
        link: format!("https://arxiv.org/abs/{paper_id}"),
        submitted_date: submitted_date_of(entry),
    })
}

fn authors_of(entry: html_scraper::ElementRef<'_>) -> Vec<String> {
    let Some(sel) = html_scraper::Selector::parse("p.authors a").ok() else {
        return Vec::new();
    };
    entry
        .select(&sel)
        .map(text_of)
        .filter(|a| !a.is_empty())
        .collect()
}

/// The date line reads "Submitted 16 January, 2024; originally announced
/// January 2024." — the submitted date is the span between the label and
/// the first semicolon.
fn submitted_date_of(entry: html_scraper::ElementRef<'_>) -> String {
    let Some(sel) = html_scraper::Selector::parse("p.is-size-7").ok() else {
        return String::new();
    };
    for p in entry.select(&sel) {
        let text = text_of(p);
        if let Some(rest) = text.split("Submitted").nth(1) {
            let date = rest.split(';').next().unwrap_or("").trim();
            if !date.is_empty() {
                return date.to_string();
            }
        }
    }
    String::new()
}

/// Abstract spans carry the expand/collapse link text; drop it.
fn clean_abstract(s: &str) -> String {
    let s = s.trim();
    let s = s.strip_suffix("△ Less").unwrap_or(s);
    let s = s.strip_suffix("▽ More").unwrap_or(s);
    s.trim().to_string()
}

fn select_first<'a>(
    scope: html_scraper::ElementRef<'a>,
    selector: &str,
) -> Option<html_scraper::ElementRef<'a>> {
    let sel = html_scraper::Selector::parse(selector).ok()?;
    scope.select(&sel).next()
}

fn text_of(el: html_scraper::ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r##"
<html><body>
<ol>
  <li class="arxiv-result">
    <div class="is-marginless">
      <p class="list-title is-inline-block">
        <a href="https://arxiv.org/abs/2401.12345">arXiv:2401.12345</a>
        <span>&nbsp;[<a href="https://arxiv.org/pdf/2401.12345">pdf</a>, <a href="#">other</a>]&nbsp;</span>
      </p>
    </div>
    <p class="title is-5 mathjax">
      Bounded Concurrency
      for Pipeline Workers
    </p>
    <p class="authors">
      <span class="has-text-black-bis">Authors:</span>
      <a href="/a/one">Ada One</a>,
      <a href="/a/two">Bea Two</a>
    </p>
    <p class="abstract mathjax">
      <span class="abstract-short has-text-grey-dark" style="display: none;">
        Short form&hellip; <a href="#">▽ More</a>
      </span>
      <span class="abstract-full has-text-grey-dark" style="display: none;">
        We study bounded fan-out under a shared rate limit. <a href="#">△ Less</a>
      </span>
    </p>
    <p class="is-size-7">
      <span class="has-text-black-bis has-text-weight-semibold">Submitted</span> 16 January, 2024;
      <span class="has-text-black-bis has-text-weight-semibold">originally announced</span> January 2024.
    </p>
  </li>
  <li class="arxiv-result">
    <p class="list-title is-inline-block">
      <a href="https://arxiv.org/abs/2312.00001">arXiv:2312.00001</a>
    </p>
    <p class="title is-5 mathjax">Short Abstracts Only</p>
    <p class="authors">
      <a href="/a/three">Cal Three</a>
    </p>
    <p class="abstract mathjax">
      <span class="abstract-short has-text-grey-dark">Only the short variant is present. <a href="#">▽ More</a></span>
    </p>
    <p class="is-size-7">
      <span class="has-text-black-bis has-text-weight-semibold">Submitted</span> 1 December, 2023;
      <span>originally announced</span> December 2023.
    </p>
  </li>
  <li class="arxiv-result">
    <p class="list-title is-inline-block"><a href="#">arXiv:bad.entry</a></p>
    <!-- no title paragraph: entry must be skipped -->
  </li>
</ol>
</body></html>
"##;

    #[test]
    fn parses_listing_entries() {
        let papers = parse_results(LISTING);
        assert_eq!(papers.len(), 2);

        let p = &papers[0];
        assert_eq!(p.title, "Bounded Concurrency for Pipeline Workers");
        assert_eq!(p.authors, vec!["Ada One".to_string(), "Bea Two".to_string()]);
        assert_eq!(p.link, "https://arxiv.org/abs/2401.12345");
        assert_eq!(
            p.abstract_text,
            "We study bounded fan-out under a shared rate limit."
        );
        assert_eq!(p.submitted_date, "16 January, 2024");
    }

    #[test]
    fn falls_back_to_short_abstract() {
        let papers = parse_results(LISTING);
        assert_eq!(papers[1].abstract_text, "Only the short variant is present.");
        assert_eq!(papers[1].submitted_date, "1 December, 2023");
    }

    #[test]
    fn empty_listing_parses_to_no_papers() {
        assert!(parse_results("<html><body><p>No results</p></body></html>").is_empty());
    }

    #[tokio::test]
    async fn search_sends_listing_query_shape() {
        use axum::extract::Query;
        use std::collections::HashMap;

        let app = axum::Router::new().route(
            "/search/",
            axum::routing::get(|Query(q): Query<HashMap<String, String>>| async move {
                assert_eq!(q["query"], "bounded fan-out");
                assert_eq!(q["searchtype"], "all");
                assert_eq!(q["abstracts"], "show");
                assert_eq!(q["order"], "-announced_date_first");
                assert_eq!(q["size"], "25");
                axum::response::Html(LISTING.to_string())
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client =
            ArxivClient::new(reqwest::Client::new()).with_endpoint(format!("http://{addr}/search/"));

        let papers = client.search("bounded fan-out").await.unwrap();
        assert_eq!(papers.len(), 2);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let client = ArxivClient::new(reqwest::Client::new());
        let err = client.search("   ").await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }
}
