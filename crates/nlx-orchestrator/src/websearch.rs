//! In-process web search adapter (DuckDuckGo Lite).
//!
//! The Lite endpoint serves plain HTML with no API key, which fits the
//! privacy-preserving, no-accounts posture of the platform. Result anchors
//! wrap the destination in a `uddg=` redirect parameter; we unwrap it before
//! returning.

use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const LITE_ENDPOINT: &str = "https://lite.duckduckgo.com/lite/";

#[derive(Debug, Error)]
pub enum WebSearchError {
    #[error("Web search request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, WebSearchError>;

/// One search hit, in the shape stored into `last_search_results`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebSearcher {
    client: reqwest::Client,
}

impl WebSearcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Search the web, returning up to `limit` hits.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        timeout: Duration,
    ) -> Result<Vec<SearchHit>> {
        let body = self
            .client
            .post(LITE_ENDPOINT)
            .form(&[("q", query)])
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let hits = parse_lite_results(&body, limit);
        debug!(query, count = hits.len(), "web search complete");
        Ok(hits)
    }
}

impl Default for WebSearcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract `(title, url, snippet)` triples from a Lite results page.
pub fn parse_lite_results(body: &str, limit: usize) -> Vec<SearchHit> {
    // Anchor and snippet rows alternate in the Lite layout.
    let link_re = Regex::new(r#"<a[^>]*rel="nofollow"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("static regex");
    let snippet_re =
        Regex::new(r#"<td[^>]*class=['"]result-snippet['"][^>]*>(.*?)</td>"#).expect("static regex");

    let snippets: Vec<String> = snippet_re
        .captures_iter(body)
        .map(|c| clean_html(&c[1]))
        .collect();

    link_re
        .captures_iter(body)
        .enumerate()
        .take(limit)
        .map(|(i, c)| SearchHit {
            title: clean_html(&c[2]),
            url: unwrap_redirect(&c[1]),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Unwrap DuckDuckGo's `//duckduckgo.com/l/?uddg=<encoded>` redirect.
fn unwrap_redirect(href: &str) -> String {
    if let Some(start) = href.find("uddg=") {
        let encoded = &href[start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        return percent_decode(encoded);
    }
    href.to_string()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 3 <= bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Strip tags and unescape the handful of entities DuckDuckGo emits.
fn clean_html(s: &str) -> String {
    let tag_re = Regex::new(r"<[^>]+>").expect("static regex");
    let text = tag_re.replace_all(s, "");
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    <table>
      <tr><td>1.</td><td>
        <a rel="nofollow" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.rust%2Dlang.org%2F&rut=abc" class='result-link'><b>Rust</b> Programming Language</a>
      </td></tr>
      <tr><td></td><td class='result-snippet'>A language empowering everyone to build reliable &amp; efficient software.</td></tr>
      <tr><td>2.</td><td>
        <a rel="nofollow" href="https://doc.rust-lang.org/book/" class='result-link'>The Rust Book</a>
      </td></tr>
      <tr><td></td><td class='result-snippet'>Learn <b>Rust</b> from scratch.</td></tr>
    </table>
    "#;

    #[test]
    fn parses_titles_urls_and_snippets() {
        let hits = parse_lite_results(SAMPLE, 5);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Programming Language");
        assert_eq!(hits[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            hits[0].snippet,
            "A language empowering everyone to build reliable & efficient software."
        );
        assert_eq!(hits[1].url, "https://doc.rust-lang.org/book/");
        assert_eq!(hits[1].snippet, "Learn Rust from scratch.");
    }

    #[test]
    fn limit_truncates() {
        let hits = parse_lite_results(SAMPLE, 1);
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn empty_page_yields_no_hits() {
        assert!(parse_lite_results("<html></html>", 5).is_empty());
    }

    #[test]
    fn percent_decode_handles_plus_and_escapes() {
        assert_eq!(percent_decode("a+b%20c%2Fd"), "a b c/d");
        assert_eq!(percent_decode("trailing%2"), "trailing%2");
    }
}
