//! HTML index adapters
//!
//! Both HTML shapes scrape anchor links from index pages and keep the ones
//! whose file name matches the job pattern:
//! - single-page sources publish everything on one index page
//! - paginated sources spread it over numbered pages built from a template

use super::http::{fetch_bytes, fetch_text};
use super::{file_name, Download, Item, LinkMatcher, SiteAdapter};
use crate::retry::RetryExecutor;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Which index pages a source publishes
#[derive(Debug, Clone)]
pub enum HtmlPages {
    Single(Url),
    Paginated {
        /// URL containing a `{page}` placeholder
        template: String,
        first_page: u32,
        max_pages: u32,
    },
}

/// Adapter for the single-page and paginated HTML shapes
pub struct HtmlSourceAdapter {
    name: String,
    pages: HtmlPages,
    selector: Selector,
    matcher: LinkMatcher,
    client: Client,
    retry: RetryExecutor,
    empty_expected: bool,
}

impl HtmlSourceAdapter {
    pub fn new(
        name: &str,
        pages: HtmlPages,
        selector: &str,
        matcher: LinkMatcher,
        client: Client,
        retry: RetryExecutor,
        empty_expected: bool,
    ) -> Result<Self> {
        let selector = Selector::parse(selector)
            .map_err(|e| HarvestError::Adapter(format!("invalid selector '{}': {}", selector, e)))?;

        Ok(Self {
            name: name.to_string(),
            pages,
            selector,
            matcher,
            client,
            retry,
            empty_expected,
        })
    }

    /// Fetches one index page and returns its matching items
    async fn page_items(&self, url: Url) -> Result<Vec<Item>> {
        let body = self
            .retry
            .call(url.as_str(), None, |timeout| {
                fetch_text(&self.client, &url, timeout)
            })
            .await?;

        let items: Vec<Item> = extract_links(&body, &url, &self.selector)
            .into_iter()
            .filter_map(|link| {
                let name = file_name(&link)?;
                self.matcher.item(&name, link)
            })
            .collect();

        debug!(job = %self.name, page = %url, items = items.len(), "Scanned index page");
        Ok(items)
    }
}

/// Substitutes the page number into a paginated URL template
pub(crate) fn page_url(template: &str, page: u32) -> Result<Url> {
    let url = template.replace("{page}", &page.to_string());
    Ok(Url::parse(&url)?)
}

/// Extracts absolute http(s) links from the elements matching `selector`
///
/// # Arguments
///
/// * `html` - The HTML content to parse
/// * `base_url` - The base URL for resolving relative links
/// * `selector` - Elements to read `href` from
///
/// # Returns
///
/// Resolved links in document order. Fragment-only links and the
/// javascript:, mailto:, tel: and data: schemes are skipped.
pub fn extract_links(html: &str, base_url: &Url, selector: &Selector) -> Vec<Url> {
    let document = Html::parse_document(html);

    document
        .select(selector)
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .collect()
}

fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    match absolute.scheme() {
        "http" | "https" => Some(absolute),
        _ => None,
    }
}

/// Flattens one page result into a stream of per-item results
fn page_stream(page: Result<Vec<Item>>) -> BoxStream<'static, Result<Item>> {
    match page {
        Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
        Err(e) => stream::once(async move { Err(e) }).boxed(),
    }
}

#[async_trait]
impl SiteAdapter for HtmlSourceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> BoxStream<'_, Result<Item>> {
        match &self.pages {
            HtmlPages::Single(url) => stream::once(self.page_items(url.clone()))
                .flat_map(page_stream)
                .boxed(),
            HtmlPages::Paginated {
                template,
                first_page,
                max_pages,
            } => {
                let last_page = first_page.saturating_add(max_pages.saturating_sub(1));
                stream::unfold(Some(*first_page), move |page| async move {
                    let page = page?;
                    if page > last_page {
                        return None;
                    }

                    let url = match page_url(template, page) {
                        Ok(url) => url,
                        Err(e) => return Some((Err(e), None)),
                    };

                    match self.page_items(url).await {
                        // The first page without matches ends the listing
                        Ok(items) if items.is_empty() => None,
                        Ok(items) => Some((Ok(items), page.checked_add(1))),
                        Err(e) => Some((Err(e), None)),
                    }
                })
                .flat_map(page_stream)
                .boxed()
            }
        }
    }

    fn empty_result_expected(&self) -> bool {
        self.empty_expected
    }

    async fn download(&self, item: &Item, timeout: Duration) -> Result<Download> {
        let bytes = fetch_bytes(&self.client, &item.link, timeout).await?;
        Ok(Download {
            item: item.clone(),
            bytes,
        })
    }
}
