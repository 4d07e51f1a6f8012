//! Site adapters
//!
//! Concrete sources come in a few structural shapes. Each shape is one
//! variant of [`Adapter`]; the core only ever talks to the [`SiteAdapter`]
//! capability:
//! - `discover()` lazily yields the items a source currently offers
//! - `process()` and `download()` are the per-item stage transforms

mod ftp;
mod html;
mod http;

pub use ftp::{FtpEntry, FtpListingAdapter};
pub use html::{extract_links, HtmlPages, HtmlSourceAdapter};
pub use http::{build_http_client, fetch_bytes, fetch_text};

use crate::config::{JobConfig, SourceConfig};
use crate::retry::RetryExecutor;
use crate::{HarvestError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use regex::Regex;
use std::time::Duration;
use url::Url;

/// A discovered unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// Identity key, unique per source
    pub key: String,

    /// Category tag used by category filters
    pub category: String,

    /// Size in bytes, when the source advertises it
    pub size: Option<u64>,

    /// Where the item is fetched from
    pub link: Url,

    /// Raw path on the source server, when the link's percent-encoded path
    /// is not what the server expects (FTP names with spaces or `#`)
    pub remote_path: Option<String>,
}

impl Item {
    pub fn new(key: impl Into<String>, category: impl Into<String>, link: Url) -> Self {
        Self {
            key: key.into(),
            category: category.into(),
            size: None,
            link,
            remote_path: None,
        }
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size = size;
        self
    }

    pub fn with_remote_path(mut self, path: impl Into<String>) -> Self {
        self.remote_path = Some(path.into());
        self
    }
}

/// A downloaded item, ready for storage
#[derive(Debug, Clone)]
pub struct Download {
    pub item: Item,
    pub bytes: Vec<u8>,
}

/// The capability the core depends on
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Job name this adapter serves
    fn name(&self) -> &str;

    /// Lazily yields the items the source currently offers
    ///
    /// Network work happens as the stream is polled, so a consumer that
    /// stops early stops paying for further pages.
    fn discover(&self) -> BoxStream<'_, Result<Item>>;

    /// Whether an empty discovery is normal for this source
    fn empty_result_expected(&self) -> bool {
        false
    }

    /// Per-item preparation before download
    async fn process(&self, item: Item) -> Result<Item> {
        Ok(item)
    }

    /// Fetches one item within the given timeout budget
    async fn download(&self, item: &Item, timeout: Duration) -> Result<Download>;
}

/// The closed set of source shapes
pub enum Adapter {
    SinglePageHtml(HtmlSourceAdapter),
    PaginatedHtml(HtmlSourceAdapter),
    FtpListing(FtpListingAdapter),
}

impl Adapter {
    /// Builds the adapter described by a job's `[job.source]` section
    pub fn from_job(job: &JobConfig, client: reqwest::Client, retry: RetryExecutor) -> Result<Self> {
        let matcher = LinkMatcher::new(job.source.pattern())?;

        let adapter = match &job.source {
            SourceConfig::SinglePageHtml { url, selector, .. } => {
                Adapter::SinglePageHtml(HtmlSourceAdapter::new(
                    &job.name,
                    HtmlPages::Single(Url::parse(url)?),
                    selector,
                    matcher,
                    client,
                    retry,
                    job.empty_expected,
                )?)
            }
            SourceConfig::PaginatedHtml {
                url_template,
                selector,
                first_page,
                max_pages,
                ..
            } => Adapter::PaginatedHtml(HtmlSourceAdapter::new(
                &job.name,
                HtmlPages::Paginated {
                    template: url_template.clone(),
                    first_page: *first_page,
                    max_pages: *max_pages,
                },
                selector,
                matcher,
                client,
                retry,
                job.empty_expected,
            )?),
            SourceConfig::FtpListing {
                host,
                port,
                username,
                password,
                directory,
                ..
            } => Adapter::FtpListing(FtpListingAdapter::new(
                &job.name,
                ftp::FtpTarget {
                    host: host.clone(),
                    port: *port,
                    username: username.clone(),
                    password: password.clone(),
                    directory: directory.clone(),
                },
                matcher,
                retry,
                job.empty_expected,
            )),
        };

        Ok(adapter)
    }

    fn inner(&self) -> &dyn SiteAdapter {
        match self {
            Adapter::SinglePageHtml(adapter) | Adapter::PaginatedHtml(adapter) => adapter,
            Adapter::FtpListing(adapter) => adapter,
        }
    }
}

#[async_trait]
impl SiteAdapter for Adapter {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn discover(&self) -> BoxStream<'_, Result<Item>> {
        self.inner().discover()
    }

    fn empty_result_expected(&self) -> bool {
        self.inner().empty_result_expected()
    }

    async fn process(&self, item: Item) -> Result<Item> {
        self.inner().process(item).await
    }

    async fn download(&self, item: &Item, timeout: Duration) -> Result<Download> {
        self.inner().download(item, timeout).await
    }
}

/// Turns matching file names into items
///
/// Named capture groups `key` and `category` override the defaults: the
/// file name is the key and its lower-cased extension the category.
#[derive(Debug, Clone)]
pub struct LinkMatcher {
    pattern: Regex,
}

impl LinkMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| HarvestError::Adapter(format!("invalid pattern '{}': {}", pattern, e)))?;
        Ok(Self { pattern })
    }

    /// Builds an item for `name` when it matches the pattern
    pub fn item(&self, name: &str, link: Url) -> Option<Item> {
        let captures = self.pattern.captures(name)?;

        let key = captures
            .name("key")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| name.to_string());

        let category = captures
            .name("category")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| extension_of(name));

        Some(Item::new(key, category, link))
    }
}

/// Lower-cased extension, or an empty string
fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Last non-empty path segment of a URL
pub(crate) fn file_name(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()
        .map(|segment| segment.to_string())
}
