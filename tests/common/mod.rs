#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8PathBuf;
use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;

use kira_geo_matrix::cache::CacheStore;
use kira_geo_matrix::config::Settings;
use kira_geo_matrix::domain::{PlatformAccession, SeriesAccession};
use kira_geo_matrix::error::GeoError;
use kira_geo_matrix::fetch::Fetcher;
use kira_geo_matrix::model::Repository;
use kira_geo_matrix::progress::NoProgress;
use kira_geo_matrix::transport::{Fetched, Transport};

struct Response {
    body: Vec<u8>,
    gzip_encoded: bool,
}

#[derive(Default)]
pub struct MockTransport {
    responses: Mutex<HashMap<String, Response>>,
    requests: Mutex<Vec<String>>,
}

impl MockTransport {
    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Response {
                body: body.into(),
                gzip_encoded: false,
            },
        );
    }

    /// Serves `body` gzip-compressed with `Content-Encoding: gzip`.
    pub fn serve_encoded(&self, url: &str, body: &[u8]) {
        self.responses.lock().unwrap().insert(
            url.to_string(),
            Response {
                body: gzip(body),
                gzip_encoded: true,
            },
        );
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| *requested == url)
            .count()
    }
}

impl Transport for MockTransport {
    fn get(&self, url: &str) -> Result<Fetched, GeoError> {
        self.requests.lock().unwrap().push(url.to_string());
        let responses = self.responses.lock().unwrap();
        let Some(response) = responses.get(url) else {
            return Err(GeoError::FetchStatus {
                url: url.to_string(),
                status: 404,
                message: "not served by mock".to_string(),
            });
        };
        Ok(Fetched {
            body: Box::new(Cursor::new(response.body.clone())),
            content_length: Some(response.body.len() as u64),
            content_encoding: response.gzip_encoded.then(|| "gzip".to_string()),
        })
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub struct Fixture {
    pub dir: TempDir,
    pub transport: Arc<MockTransport>,
    pub repo: Repository<Arc<MockTransport>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let cache_root = root.join("cache");
        let scratch_dir = root.join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();

        let mut settings = Settings::with_roots(cache_root.clone(), scratch_dir);
        settings.report_progress = false;
        adjust(&mut settings);

        let transport = Arc::new(MockTransport::default());
        let fetcher = Fetcher::new(
            transport.clone(),
            Some(CacheStore::new(cache_root)),
            Arc::new(NoProgress),
        );
        Self {
            dir,
            transport,
            repo: Repository::new(fetcher, settings),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        self.repo
            .fetcher()
            .cache()
            .expect("fixture repository has a cache")
    }

    pub fn serve_brief(&self, id: &str, text: &str) {
        let id: SeriesAccession = id.parse().unwrap();
        let url = self.repo.settings().endpoints.series_brief_url(&id);
        self.transport.serve(&url, text);
    }

    /// Serves the same document as both quick view and data view.
    pub fn serve_platform(&self, id: &str, text: &str) {
        let id: PlatformAccession = id.parse().unwrap();
        let endpoints = &self.repo.settings().endpoints;
        self.transport.serve(&endpoints.platform_brief_url(&id), text);
        self.transport.serve(&endpoints.platform_data_url(&id), text);
    }

    /// Serves gzip-compressed series matrix files plus a bare-name listing of them.
    pub fn serve_matrix_files(&self, id: &str, files: &[(&str, &str)]) {
        let id: SeriesAccession = id.parse().unwrap();
        let dir_url = self.repo.settings().endpoints.series_matrix_dir_url(&id);
        let listing = files
            .iter()
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join("\n");
        self.transport.serve(&dir_url, listing);
        for (name, text) in files {
            self.transport
                .serve(&format!("{dir_url}{name}"), gzip(text.as_bytes()));
        }
    }
}

/// Brief series record declaring `platforms` and `samples`.
pub fn brief(id: &str, series_type: &str, platforms: &[&str], samples: &[&str]) -> String {
    let mut text = format!(
        "^SERIES = {id}\n!Series_title = Synthetic study {id}\n!Series_type = {series_type}\n"
    );
    for platform in platforms {
        text.push_str(&format!("!Series_platform_id = {platform}\n"));
    }
    for sample in samples {
        text.push_str(&format!("!Series_sample_id = {sample}\n"));
    }
    text
}

pub const EXPRESSION: &str = "Expression profiling by array";

/// Expression platform with GENE_SYMBOL and GB_ACC columns.
pub fn expression_platform(id: &str, rows: &[(&str, &str)]) -> String {
    let mut text = format!(
        "^PLATFORM = {id}\n\
         !Platform_title = Synthetic expression array\n\
         #ID = spot identifier\n\
         #GENE_SYMBOL = Gene symbol\n\
         #GB_ACC = GenBank accession\n\
         !platform_table_begin\n\
         ID\tGENE_SYMBOL\tGB_ACC\n"
    );
    for (row_id, gene) in rows {
        text.push_str(&format!("{row_id}\t{gene}\tNM_{row_id}\n"));
    }
    text.push_str("!platform_table_end\n");
    text
}

fn quoted(values: &[&str]) -> String {
    values
        .iter()
        .map(|value| format!("\"{value}\""))
        .collect::<Vec<_>>()
        .join("\t")
}

/// A series matrix file: sample header block, quoted title row, data rows.
pub fn matrix_file(samples: &[(&str, &str)], rows: &[&[&str]]) -> String {
    let ids = samples.iter().map(|(gsm, _)| *gsm).collect::<Vec<_>>();
    let titles = samples.iter().map(|(_, title)| *title).collect::<Vec<_>>();
    let tissue = vec!["tissue: liver"; samples.len()];
    let count = rows.len().to_string();
    let counts = vec![count.as_str(); samples.len()];

    let mut text = String::from("!Series_title\t\"Synthetic\"\n");
    text.push_str(&format!("!Sample_title\t{}\n", quoted(&titles)));
    text.push_str(&format!("!Sample_geo_accession\t{}\n", quoted(&ids)));
    text.push_str(&format!("!Sample_characteristics_ch1\t{}\n", quoted(&tissue)));
    text.push_str(&format!("!Sample_data_row_count\t{}\n", quoted(&counts)));
    text.push_str("!series_matrix_table_begin\n");
    text.push_str(&format!("\"ID_REF\"\t{}\n", quoted(&ids)));
    for row in rows {
        let mut cells = vec![format!("\"{}\"", row[0])];
        cells.extend(row[1..].iter().map(|cell| cell.to_string()));
        text.push_str(&cells.join("\t"));
        text.push('\n');
    }
    text.push_str("!series_matrix_table_end\n");
    text
}
