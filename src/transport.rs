use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_CHARSET, ACCEPT_ENCODING, ACCEPT_LANGUAGE, CONTENT_ENCODING, HeaderMap,
    HeaderValue, USER_AGENT,
};

use crate::error::GeoError;

pub struct Fetched {
    pub body: Box<dyn Read + Send>,
    pub content_length: Option<u64>,
    pub content_encoding: Option<String>,
}

impl Fetched {
    pub fn is_gzip_encoded(&self) -> bool {
        self.content_encoding
            .as_deref()
            .map(|value| value.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false)
    }
}

pub trait Transport: Send + Sync {
    fn get(&self, url: &str) -> Result<Fetched, GeoError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn get(&self, url: &str) -> Result<Fetched, GeoError> {
        (**self).get(url)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get(&self, url: &str) -> Result<Fetched, GeoError> {
        (**self).get(url)
    }
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, GeoError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-gm/{}", env!("CARGO_PKG_VERSION"))).map_err(
                |err| GeoError::FetchHttp {
                    url: String::new(),
                    message: err.to_string(),
                },
            )?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(
            ACCEPT_CHARSET,
            HeaderValue::from_static("ISO-8859-1,utf-8;q=0.7,*;q=0.3"),
        );
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.8"));
        // Bodies are streamed for as long as they take; only connecting is bounded.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(60))
            .timeout(None)
            .build()
            .map_err(|err| GeoError::FetchHttp {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    pub fn normalize_url(url: &str) -> String {
        if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nlm.nih.gov/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/{}", rest);
        }
        if let Some(rest) = url.strip_prefix("ftp://ftp.ncbi.nih.gov/pub/geo/") {
            return format!("https://ftp.ncbi.nlm.nih.gov/geo/{}", rest);
        }
        url.to_string()
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Fetched, GeoError> {
        let target = Self::normalize_url(url);
        let response = self
            .client
            .get(&target)
            .send()
            .map_err(|err| GeoError::FetchHttp {
                url: target.clone(),
                message: err.to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "GEO request failed".to_string());
            return Err(GeoError::FetchStatus {
                url: target,
                status,
                message,
            });
        }
        let content_length = response.content_length();
        let content_encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        Ok(Fetched {
            body: Box::new(response),
            content_length,
            content_encoding,
        })
    }
}

// `?`, `&` and `=` in the URL path map to `_` under `root`.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    root: Utf8PathBuf,
}

impl LocalTransport {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn local_path(&self, url: &str) -> Utf8PathBuf {
        let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        let path = without_scheme
            .split_once('/')
            .map(|(_, rest)| rest)
            .unwrap_or("");
        let path = path.replace(['?', '&', '='], "_");
        self.root.join(path)
    }
}

impl Transport for LocalTransport {
    fn get(&self, url: &str) -> Result<Fetched, GeoError> {
        let path = self.local_path(url);
        let not_found = || GeoError::FetchStatus {
            url: url.to_string(),
            status: 404,
            message: format!("{path} not found in local mirror"),
        };
        if url.ends_with('/') {
            if !path.as_std_path().is_dir() {
                return Err(not_found());
            }
            let mut names = fs::read_dir(path.as_std_path())?
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
                .filter_map(|entry| entry.file_name().to_str().map(|name| name.to_string()))
                .collect::<Vec<_>>();
            names.sort();
            let listing = names.join("\n").into_bytes();
            return Ok(Fetched {
                content_length: Some(listing.len() as u64),
                body: Box::new(Cursor::new(listing)),
                content_encoding: None,
            });
        }
        if !path.as_std_path().is_file() {
            return Err(not_found());
        }
        let file = File::open(path.as_std_path())?;
        let content_length = file.metadata().ok().map(|meta| meta.len());
        Ok(Fetched {
            body: Box::new(file),
            content_length,
            content_encoding: None,
        })
    }
}
