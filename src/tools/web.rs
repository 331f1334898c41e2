//! Web access tools: `web_fetch` with an SSRF filter and `web_search`
//! backed by Brave Search or Perplexity.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::lookup_host;

use crate::error::{BashError, Result};

use super::{Tool, ToolContext, ToolOutput};

const BRAVE_API_URL: &str = "https://api.search.brave.com/res/v1/web/search";
const PERPLEXITY_API_URL: &str = "https://api.perplexity.ai/chat/completions";
const WEB_USER_AGENT: &str = "bashclaw/0.1 (+https://github.com/bashclaw/bashclaw)";
const DEFAULT_MAX_FETCH_CHARS: usize = 50_000;
const MAX_FETCH_CHARS: usize = 200_000;
const MIN_FETCH_CHARS: usize = 256;
/// Byte cap on response bodies; 4x the char cap covers multi-byte UTF-8.
const MAX_FETCH_BYTES: usize = MAX_FETCH_CHARS * 4;
const FETCH_TIMEOUT_SECS: u64 = 30;

static SEL_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static SEL_MAIN: Lazy<Selector> = Lazy::new(|| Selector::parse("main").unwrap());
static SEL_ARTICLE: Lazy<Selector> = Lazy::new(|| Selector::parse("article").unwrap());
static SEL_BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").unwrap());
static SEL_NOISE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script, style, noscript, nav, footer, header, aside").unwrap());

// ---------------------------------------------------------------------------
// SSRF filter
// ---------------------------------------------------------------------------

/// Check whether a URL's literal host is blocked (loopback, private ranges,
/// link-local, `.local`).
pub fn is_blocked_host(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };
    let host = host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".local") {
        return true;
    }

    // `Url::host_str` keeps IPv6 brackets; strip them before parsing.
    let ip_str = host
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(&host);
    if let Ok(ip) = ip_str.parse::<IpAddr>() {
        return is_private_or_local_ip(ip);
    }
    false
}

fn is_private_or_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => is_private_or_local_ipv4(addr),
        IpAddr::V6(addr) => is_private_or_local_ipv6(addr),
    }
}

fn is_private_or_local_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()
        || addr.is_private()
        || addr.is_link_local()
        || addr.is_unspecified()
        || addr.is_broadcast()
        || addr.octets()[0] == 0
}

fn is_private_or_local_ipv6(addr: Ipv6Addr) -> bool {
    let first = addr.segments()[0];
    addr.is_loopback()
        || addr.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // ULA fc00::/7
        || (first & 0xffc0) == 0xfe80 // link-local fe80::/10
}

/// Resolve a hostname and verify none of its addresses are private or
/// local. Catches DNS-based SSRF where a public name points at an internal
/// address like `169.254.169.254`.
async fn resolve_and_check(url: &Url) -> Result<()> {
    let Some(host) = url.host_str() else {
        return Err(BashError::SecurityViolation("SSRF: URL has no host".into()));
    };
    // Literal IPs were already checked against the blocklist.
    if host.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = lookup_host(format!("{}:{}", host, port))
        .await
        .map_err(|e| BashError::Tool(format!("DNS lookup failed for '{}': {}", host, e)))?;

    for addr in addrs {
        if is_private_or_local_ip(addr.ip()) {
            return Err(BashError::SecurityViolation(format!(
                "SSRF: DNS for '{}' resolved to private address {}",
                host,
                addr.ip()
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// web_fetch
// ---------------------------------------------------------------------------

/// Fetch a URL and return its body text, truncated to `maxChars`.
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch an http(s) URL and return its readable text content"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http/https URL to fetch"
                },
                "maxChars": {
                    "type": "integer",
                    "description": "Maximum characters of content to return"
                }
            },
            "required": ["url"]
        })
    }

    fn bridge_exposed(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let Some(url) = args
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        else {
            return Ok(ToolOutput::error("error: missing 'url' parameter"));
        };

        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(ToolOutput::error(format!("error: invalid URL: {}", e))),
        };

        if !matches!(parsed.scheme(), "http" | "https") {
            return Ok(ToolOutput::error(
                "error: only http/https URLs are allowed",
            ));
        }
        if is_blocked_host(&parsed) {
            return Ok(ToolOutput::error(
                "SSRF blocked: host is local or on a private network",
            ));
        }
        if let Err(e) = resolve_and_check(&parsed).await {
            return Ok(ToolOutput::error(e.to_string()));
        }

        let max_chars = args
            .get("maxChars")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_FETCH_CHARS)
            .clamp(MIN_FETCH_CHARS, MAX_FETCH_CHARS);

        let response = self
            .client
            .get(parsed)
            .header("User-Agent", WEB_USER_AGENT)
            .send()
            .await
            .map_err(|e| BashError::Tool(format!("web fetch failed: {}", e)))?;

        // Re-check after redirects; a public URL may bounce to an internal
        // address.
        if is_blocked_host(response.url()) {
            return Ok(ToolOutput::error(format!(
                "SSRF blocked: redirect landed on a private host: {}",
                response.url()
            )));
        }

        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Ok(ToolOutput::error(format!("error: HTTP {}", status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let body = read_body_limited(response, MAX_FETCH_BYTES).await?;

        let mut text = if content_type.contains("text/html") || body.trim_start().starts_with('<')
        {
            html_to_text(&body)
        } else {
            body
        };

        let truncated = text.len() > max_chars;
        if truncated {
            let mut end = max_chars;
            while end > 0 && !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }

        Ok(ToolOutput::json(&json!({
            "url": url,
            "final_url": final_url,
            "status": status.as_u16(),
            "truncated": truncated,
            "text": text,
        })))
    }
}

async fn read_body_limited(response: reqwest::Response, max_bytes: usize) -> Result<String> {
    let mut buf: Vec<u8> = Vec::new();
    let mut stream = response;
    loop {
        match stream.chunk().await {
            Ok(Some(chunk)) => {
                let remaining = max_bytes.saturating_sub(buf.len());
                if remaining == 0 {
                    break;
                }
                let take = chunk.len().min(remaining);
                buf.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                return Err(BashError::Tool(format!("failed to read body: {}", e)));
            }
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Extract readable text from an HTML document: the title plus the text of
/// the main content root, with script/style/nav noise removed and
/// whitespace collapsed.
fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);

    let title = document
        .select(&SEL_TITLE)
        .next()
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let root = document
        .select(&SEL_MAIN)
        .next()
        .or_else(|| document.select(&SEL_ARTICLE).next())
        .or_else(|| document.select(&SEL_BODY).next());

    let mut body_text = String::new();
    if let Some(root) = root {
        let noise: Vec<_> = root.select(&SEL_NOISE).flat_map(|el| el.text()).collect();
        for piece in root.text() {
            if noise.contains(&piece) {
                continue;
            }
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            if !body_text.is_empty() {
                body_text.push(' ');
            }
            body_text.push_str(piece);
        }
    }
    let body_text = normalize_whitespace(&body_text);

    match title {
        Some(title) if !body_text.is_empty() => format!("# {}\n\n{}", title, body_text),
        Some(title) => format!("# {}", title),
        None => body_text,
    }
}

fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// web_search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWebResults>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResults {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    title: String,
    url: String,
    #[serde(default)]
    description: Option<String>,
}

/// Web search tool. Backend selection by environment: Brave when
/// `BRAVE_SEARCH_API_KEY` is set, Perplexity when `PERPLEXITY_API_KEY` is;
/// without either key the tool is unavailable.
pub struct WebSearchTool {
    client: Client,
}

impl WebSearchTool {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn brave_key() -> Option<String> {
        std::env::var("BRAVE_SEARCH_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    fn perplexity_key() -> Option<String> {
        std::env::var("PERPLEXITY_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
    }

    async fn search_brave(&self, key: &str, query: &str) -> Result<String> {
        let response = self
            .client
            .get(BRAVE_API_URL)
            .header("Accept", "application/json")
            .header("User-Agent", WEB_USER_AGENT)
            .header("X-Subscription-Token", key)
            .query(&[("q", query), ("count", "5")])
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(|e| BashError::Tool(format!("web search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BashError::Tool(format!(
                "Brave Search API error: {}",
                response.status()
            )));
        }
        let payload: BraveResponse = response
            .json()
            .await
            .map_err(|e| BashError::Tool(format!("bad search response: {}", e)))?;

        let results = payload.web.map(|w| w.results).unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No web search results for '{}'.", query));
        }

        let mut output = format!("Web search results for '{}':\n\n", query);
        for (index, item) in results.iter().enumerate() {
            output.push_str(&format!("{}. {}\n   {}\n", index + 1, item.title, item.url));
            if let Some(desc) = item.description.as_deref().map(str::trim) {
                if !desc.is_empty() {
                    output.push_str(&format!("   {}\n", desc));
                }
            }
        }
        Ok(output.trim_end().to_string())
    }

    async fn search_perplexity(&self, key: &str, query: &str) -> Result<String> {
        let body = json!({
            "model": "sonar",
            "messages": [
                {"role": "system", "content": "Answer with concise, sourced search results."},
                {"role": "user", "content": query}
            ]
        });
        let response = self
            .client
            .post(PERPLEXITY_API_URL)
            .header("Authorization", format!("Bearer {}", key))
            .header("content-type", "application/json")
            .json(&body)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| BashError::Tool(format!("web search failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(BashError::Tool(format!(
                "Perplexity API error: {}",
                response.status()
            )));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| BashError::Tool(format!("bad search response: {}", e)))?;
        let answer = payload
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("");
        if answer.is_empty() {
            Ok(format!("No web search results for '{}'.", query))
        } else {
            Ok(answer.to_string())
        }
    }
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web and return ranked results"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        })
    }

    fn available(&self) -> bool {
        Self::brave_key().is_some() || Self::perplexity_key().is_some()
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| BashError::Tool("missing 'query' parameter".into()))?;

        if let Some(key) = Self::brave_key() {
            return Ok(ToolOutput::ok(self.search_brave(&key, query).await?));
        }
        if let Some(key) = Self::perplexity_key() {
            return Ok(ToolOutput::ok(self.search_perplexity(&key, query).await?));
        }
        Err(BashError::Tool(
            "no web search backend configured: set BRAVE_SEARCH_API_KEY or PERPLEXITY_API_KEY"
                .into(),
        ))
    }
}
