//! FTP listing adapter
//!
//! Lists one remote directory and downloads matching files. The FTP client
//! is synchronous, so every session runs on the blocking pool and uses the
//! blocking retry variant there.

use super::{Download, Item, LinkMatcher, SiteAdapter};
use crate::retry::RetryExecutor;
use crate::{HarvestError, Result, TransientKind};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::io::{self, Read};
use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, warn};
use url::Url;

const TRANSFER_CHUNK: usize = 64 * 1024;

/// Where and how to log in
#[derive(Debug, Clone)]
pub(crate) struct FtpTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub directory: String,
}

impl FtpTarget {
    fn label(&self) -> String {
        format!("ftp://{}:{}{}", self.host, self.port, self.directory)
    }
}

/// Parsed Unix-style `LIST` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    /// Parses a line such as `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 data.nc`
    ///
    /// The name is everything after the time/year column, so names with
    /// spaces survive. Lines with fewer than nine columns are rejected.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_start();
        let mut fields = Vec::with_capacity(8);
        for _ in 0..8 {
            let end = rest.find(char::is_whitespace)?;
            fields.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }

        let name = rest.trim_end();
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }

        Some(Self {
            name: name.to_string(),
            is_directory: fields[0].starts_with('d'),
            size: fields[4].parse().ok(),
        })
    }
}

/// Adapter for FTP-listing sources
pub struct FtpListingAdapter {
    name: String,
    target: FtpTarget,
    matcher: LinkMatcher,
    retry: RetryExecutor,
    empty_expected: bool,
}

impl FtpListingAdapter {
    pub(crate) fn new(
        name: &str,
        target: FtpTarget,
        matcher: LinkMatcher,
        retry: RetryExecutor,
        empty_expected: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            target,
            matcher,
            retry,
            empty_expected,
        }
    }

    /// Lists the directory and maps matching files to items
    async fn list_items(&self) -> Result<Vec<Item>> {
        let target = self.target.clone();
        let retry = self.retry.clone();
        let label = target.label();

        let lines = tokio::task::spawn_blocking(move || {
            retry.call_blocking(&label, None, |timeout| list_directory(&target, timeout))
        })
        .await
        .map_err(|e| HarvestError::Adapter(format!("FTP listing task failed: {}", e)))??;

        self.items_from_listing(&lines)
    }

    /// Maps `LIST` output to items, skipping directories
    ///
    /// The link percent-encodes the name; the raw server path travels
    /// alongside it for `RETR`.
    fn items_from_listing(&self, lines: &[String]) -> Result<Vec<Item>> {
        let base = self.base_url()?;
        let directory = self.target.directory.trim_end_matches('/');

        let mut items = Vec::new();
        for entry in lines.iter().filter_map(|line| FtpEntry::parse(line)) {
            if entry.is_directory {
                continue;
            }

            let mut link = base.clone();
            link.path_segments_mut()
                .map_err(|()| HarvestError::Adapter(format!("{} cannot hold a path", base)))?
                .pop_if_empty()
                .push(&entry.name);

            if let Some(item) = self.matcher.item(&entry.name, link) {
                items.push(
                    item.with_size(entry.size)
                        .with_remote_path(format!("{}/{}", directory, entry.name)),
                );
            }
        }

        debug!(job = %self.name, listed = lines.len(), items = items.len(), "Scanned FTP directory");
        Ok(items)
    }

    fn base_url(&self) -> Result<Url> {
        let directory = self.target.directory.trim_end_matches('/');
        let url = format!(
            "ftp://{}:{}{}/",
            self.target.host, self.target.port, directory
        );
        Ok(Url::parse(&url)?)
    }
}

#[async_trait]
impl SiteAdapter for FtpListingAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn discover(&self) -> BoxStream<'_, Result<Item>> {
        stream::once(self.list_items())
            .flat_map(|listed| match listed {
                Ok(items) => stream::iter(items.into_iter().map(Ok)).boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }

    fn empty_result_expected(&self) -> bool {
        self.empty_expected
    }

    async fn download(&self, item: &Item, timeout: Duration) -> Result<Download> {
        let target = self.target.clone();
        let path = retr_path(item);

        let bytes = tokio::task::spawn_blocking(move || retrieve(&target, &path, timeout))
            .await
            .map_err(|e| HarvestError::Adapter(format!("FTP download task failed: {}", e)))??;

        Ok(Download {
            item: item.clone(),
            bytes,
        })
    }
}

fn connect(target: &FtpTarget, timeout: Duration) -> Result<FtpStream> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| ftp_error(target, FtpError::ConnectionError(e)))?
        .next()
        .ok_or_else(|| HarvestError::Ftp {
            target: target.label(),
            message: "host did not resolve".to_string(),
        })?;

    debug!(host = %target.host, port = target.port, "Connecting to FTP server");
    let mut ftp = FtpStream::connect_timeout(addr, timeout).map_err(|e| ftp_error(target, e))?;
    ftp.get_ref()
        .set_read_timeout(Some(timeout))
        .map_err(|e| ftp_error(target, FtpError::ConnectionError(e)))?;

    ftp.set_mode(Mode::ExtendedPassive);
    ftp.login(&target.username, &target.password)
        .map_err(|e| ftp_error(target, e))?;
    ftp.transfer_type(FileType::Binary)
        .map_err(|e| ftp_error(target, e))?;

    Ok(ftp)
}

fn list_directory(target: &FtpTarget, timeout: Duration) -> Result<Vec<String>> {
    let mut ftp = connect(target, timeout)?;
    let lines = ftp
        .list(Some(&target.directory))
        .map_err(|e| ftp_error(target, e))?;
    quit(&mut ftp);
    Ok(lines)
}

/// Server path to `RETR` for an item
fn retr_path(item: &Item) -> String {
    item.remote_path
        .clone()
        .unwrap_or_else(|| item.link.path().to_string())
}

fn retrieve(target: &FtpTarget, path: &str, timeout: Duration) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;
    let mut ftp = connect(target, timeout)?;

    let mut stream = ftp.retr_as_stream(path).map_err(|e| ftp_error(target, e))?;
    stream
        .get_ref()
        .set_read_timeout(Some(timeout))
        .map_err(|e| ftp_error(target, FtpError::ConnectionError(e)))?;
    let bytes = read_until(&mut stream, deadline)
        .map_err(|e| ftp_error(target, FtpError::ConnectionError(e)))?;
    ftp.finalize_retr_stream(stream)
        .map_err(|e| ftp_error(target, e))?;

    quit(&mut ftp);
    Ok(bytes)
}

/// Reads a transfer to the end, failing once `deadline` has passed
///
/// The attempt timeout on the async side cannot stop a blocking thread, so
/// the transfer enforces it itself.
fn read_until<R: Read>(reader: &mut R, deadline: Instant) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut chunk = vec![0u8; TRANSFER_CHUNK];
    loop {
        if Instant::now() >= deadline {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "transfer exceeded its attempt timeout",
            ));
        }
        match reader.read(&mut chunk) {
            Ok(0) => return Ok(bytes),
            Ok(n) => bytes.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

fn quit(ftp: &mut FtpStream) {
    if let Err(e) = ftp.quit() {
        warn!("Failed to quit FTP session gracefully: {}", e);
    }
}

/// Connection-level failures are transient, protocol replies are not
fn ftp_error(target: &FtpTarget, err: FtpError) -> HarvestError {
    match err {
        FtpError::ConnectionError(e) => HarvestError::Network {
            target: target.label(),
            kind: if e.kind() == std::io::ErrorKind::TimedOut
                || e.kind() == std::io::ErrorKind::WouldBlock
            {
                TransientKind::Timeout
            } else {
                TransientKind::FtpConnection
            },
            message: e.to_string(),
        },
        other => HarvestError::Ftp {
            target: target.label(),
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> FtpTarget {
        FtpTarget {
            host: "ftp.example.org".to_string(),
            port: 21,
            username: "anonymous".to_string(),
            password: "anonymous@".to_string(),
            directory: "/pub/sst/".to_string(),
        }
    }

    #[test]
    fn test_parse_file_entry() {
        let entry =
            FtpEntry::parse("-rw-r--r--   1 ftp ftp  123456 Jan 15 12:00 sst_20261019.nc").unwrap();
        assert_eq!(entry.name, "sst_20261019.nc");
        assert!(!entry.is_directory);
        assert_eq!(entry.size, Some(123456));
    }

    #[test]
    fn test_parse_directory_entry() {
        let entry = FtpEntry::parse("drwxr-xr-x   2 ftp ftp  4096 Jan 15  2025 archive").unwrap();
        assert_eq!(entry.name, "archive");
        assert!(entry.is_directory);
    }

    #[test]
    fn test_parse_name_with_spaces() {
        let entry = FtpEntry::parse("-rw-r--r-- 1 ftp ftp 10 Oct 19 08:00 monthly report.csv").unwrap();
        assert_eq!(entry.name, "monthly report.csv");
    }

    #[test]
    fn test_parse_rejects_short_and_dot_lines() {
        assert!(FtpEntry::parse("").is_none());
        assert!(FtpEntry::parse("total 12").is_none());
        assert!(FtpEntry::parse("drwxr-xr-x 2 ftp ftp 4096 Jan 15 12:00 .").is_none());
    }

    #[test]
    fn test_connection_errors_are_transient() {
        let err = ftp_error(
            &target(),
            FtpError::ConnectionError(std::io::Error::from(std::io::ErrorKind::ConnectionReset)),
        );
        assert!(err.is_transient());

        let err = ftp_error(&target(), FtpError::BadResponse);
        assert!(!err.is_transient());
    }

    fn adapter(pattern: &str) -> FtpListingAdapter {
        FtpListingAdapter::new(
            "sst",
            target(),
            LinkMatcher::new(pattern).unwrap(),
            RetryExecutor::new(
                crate::RetryPolicy::from_config(&crate::config::RetryConfig::default()).unwrap(),
            ),
            false,
        )
    }

    fn listing(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn test_items_link_into_directory() {
        let base = adapter(r"\.nc$").base_url().unwrap();
        let link = base.join("sst_20261019.nc").unwrap();
        assert_eq!(link.as_str(), "ftp://ftp.example.org/pub/sst/sst_20261019.nc");
        assert_eq!(link.path(), "/pub/sst/sst_20261019.nc");
    }

    #[test]
    fn test_listing_to_items_and_retr_paths() {
        let lines = listing(&[
            "total 3",
            "drwxr-xr-x 2 ftp ftp 4096 Jan 15  2025 archive",
            "-rw-r--r-- 1 ftp ftp 2048 Oct 19 08:00 sst_20261019.nc",
            "-rw-r--r-- 1 ftp ftp 10 Oct 19 08:00 monthly report.csv",
            "-rw-r--r-- 1 ftp ftp 12 Oct 19 08:00 a#b.csv",
            "-rw-r--r-- 1 ftp ftp 99 Oct 19 08:00 readme.txt",
        ]);

        let items = adapter(r"\.(nc|csv)$").items_from_listing(&lines).unwrap();
        let keys: Vec<_> = items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["sst_20261019.nc", "monthly report.csv", "a#b.csv"]);

        assert_eq!(items[0].size, Some(2048));
        assert_eq!(retr_path(&items[0]), "/pub/sst/sst_20261019.nc");
        assert_eq!(retr_path(&items[1]), "/pub/sst/monthly report.csv");
        assert_eq!(retr_path(&items[2]), "/pub/sst/a#b.csv");

        // The link stays a well-formed URL for logs
        assert_eq!(items[1].link.path(), "/pub/sst/monthly%20report.csv");
        assert_eq!(items[2].link.path(), "/pub/sst/a%23b.csv");
        assert_eq!(items[2].link.fragment(), None);
    }

    #[test]
    fn test_retr_path_falls_back_to_link() {
        let item = Item::new(
            "x.nc",
            "nc",
            Url::parse("ftp://ftp.example.org/pub/x.nc").unwrap(),
        );
        assert_eq!(retr_path(&item), "/pub/x.nc");
    }

    #[test]
    fn test_read_until_collects_whole_transfer() {
        let data = vec![7u8; TRANSFER_CHUNK * 2 + 5];
        let mut reader = io::Cursor::new(data.clone());
        let read = read_until(&mut reader, Instant::now() + Duration::from_secs(60)).unwrap();
        assert_eq!(read, data);
    }

    #[test]
    fn test_read_until_stops_past_deadline() {
        struct Trickle;
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                std::thread::sleep(Duration::from_millis(20));
                buf[0] = 1;
                Ok(1)
            }
        }

        let started = Instant::now();
        let err = read_until(&mut Trickle, started + Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
