//! Writing captured documents to disk, and the filename policies sites use.
//!
//! Files land in `<base>/raw/<site-folder>/`. The directory is created on
//! demand. Nothing is verified after the write (no checksum, no size check).

use std::path::PathBuf;

use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Response;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};
use url::Url;

use crate::error::{Result, ScrapeError};

static REPORT_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"rpt\d+").expect("static regex"));

/// Writes files into one destination directory.
#[derive(Debug, Clone)]
pub struct Downloader {
    dir: PathBuf,
}

impl Downloader {
    /// Use `dir` as destination, creating it if needed.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ScrapeError::io(&dir, e))?;
        Ok(Self { dir })
    }

    /// Final path for `filename`, reduced to a single path component.
    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(safe_component(filename))
    }

    /// Stream a response body to `filename` chunk by chunk.
    #[instrument(level = "info", skip_all, fields(%filename))]
    pub async fn stream_to_file(&self, response: Response, filename: &str) -> Result<PathBuf> {
        let path = self.path_for(filename);
        let url = response.url().to_string();
        let mut file = fs::File::create(&path)
            .await
            .map_err(|e| ScrapeError::io(&path, e))?;

        let mut stream = response.bytes_stream();
        let mut bytes_written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ScrapeError::http(&url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ScrapeError::io(&path, e))?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| ScrapeError::io(&path, e))?;

        info!(bytes = bytes_written, path = %path.display(), "Successfully downloaded");
        Ok(path)
    }

    /// Write a whole body to `filename`.
    pub async fn write_bytes(&self, filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path_for(filename);
        fs::write(&path, bytes)
            .await
            .map_err(|e| ScrapeError::io(&path, e))?;
        info!(bytes = bytes.len(), path = %path.display(), "Downloaded");
        Ok(path)
    }

    /// Write extracted page text to `filename` as UTF-8.
    pub async fn write_text(&self, filename: &str, text: &str) -> Result<PathBuf> {
        self.write_bytes(filename, text.as_bytes()).await
    }
}

/// Last path segment of a URL, percent-decoded, without query or fragment.
pub fn filename_from_url(url: &str) -> String {
    let tail = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .unwrap_or_default(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or("")
            .rsplit('/')
            .next()
            .unwrap_or("")
            .to_string(),
    };
    urlencoding::decode(&tail)
        .map(|decoded| decoded.into_owned())
        .unwrap_or(tail)
}

/// Prefix the URL tail with the report number (`rpt12345_`) found in the URL,
/// so identically named files from different reports do not collide.
pub fn report_prefixed_filename(url: &str) -> String {
    let name = filename_from_url(url);
    match REPORT_NUMBER.find(url) {
        Some(m) => format!("{}_{}", m.as_str(), name),
        None => name,
    }
}

/// Keep only ASCII letters, digits and spaces.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}

/// Lowercase extension of a filename or URL path, without the dot.
pub fn file_extension(name: &str) -> Option<String> {
    let tail = name.split(['?', '#']).next().unwrap_or(name);
    let tail = tail.rsplit('/').next().unwrap_or(tail);
    tail.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Strip directory separators and parent references from a filename.
fn safe_component(filename: &str) -> String {
    let name: String = filename
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    let name = name.trim();
    if name.is_empty() || name == "." || name == ".." {
        "download".to_string()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://www.cdc.gov/eis/media/pdfs/Oswego-Student.pdf?v=2"),
            "Oswego-Student.pdf"
        );
        assert_eq!(
            filename_from_url("https://x.org/files/Annual%20Report.pdf"),
            "Annual Report.pdf"
        );
        assert_eq!(filename_from_url("relative/path/a.csv?x=1"), "a.csv");
    }

    #[test]
    fn test_report_prefixed_filename() {
        assert_eq!(
            report_prefixed_filename("https://www.samhsa.gov/data/sites/default/files/reports/rpt42728/2022-nsduh.pdf"),
            "rpt42728_2022-nsduh.pdf"
        );
        assert_eq!(
            report_prefixed_filename("https://www.samhsa.gov/data/sites/default/files/tables.xlsx"),
            "tables.xlsx"
        );
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(
            sanitize_title("WHO position paper: Rabies (2024)!"),
            "WHO position paper Rabies 2024"
        );
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("report.PDF").as_deref(), Some("pdf"));
        assert_eq!(file_extension("https://x/y/data.xlsx?dl=1").as_deref(), Some("xlsx"));
        assert_eq!(file_extension("https://x/y/noext"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn test_safe_component() {
        assert_eq!(safe_component("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(safe_component(".."), "download");
        assert_eq!(safe_component(" a.pdf "), "a.pdf");
    }

    #[tokio::test]
    async fn test_stream_to_file_writes_body() {
        let server = MockServer::start().await;
        let body = vec![7u8; 64 * 1024];
        Mock::given(method("GET"))
            .and(path("/doc.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(dir.path().join("raw").join("site")).await.unwrap();
        let response = reqwest::get(format!("{}/doc.pdf", server.uri())).await.unwrap();
        let written = downloader.stream_to_file(response, "doc.pdf").await.unwrap();

        assert_eq!(written, dir.path().join("raw/site/doc.pdf"));
        assert_eq!(std::fs::read(written).unwrap(), body);
    }

    #[tokio::test]
    async fn test_write_text() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(dir.path()).await.unwrap();
        let written = downloader.write_text("malaria.txt", "Key facts\nMalaria").await.unwrap();
        assert_eq!(std::fs::read_to_string(written).unwrap(), "Key facts\nMalaria");
    }
}
