use std::sync::Arc;

use tracing::info;

use crate::cache::CacheStore;
use crate::config::Settings;
use crate::domain::{PlatformAccession, SeriesAccession};
use crate::error::GeoError;
use crate::fetch::{DataStream, FetchOptions, FetchStream, Fetcher};
use crate::gzip::CompressionWrapper;
use crate::model::remote::RemoteFile;
use crate::model::study::Study;
use crate::progress::{NoProgress, ProgressSink, TracingProgress};
use crate::soft::SoftLines;
use crate::transport::{HttpTransport, LocalTransport, Transport};

pub struct Repository<T: Transport> {
    fetcher: Fetcher<T>,
    settings: Settings,
}

impl Repository<Box<dyn Transport>> {
    pub fn from_settings(settings: Settings) -> Result<Self, GeoError> {
        let progress: Arc<dyn ProgressSink> = if settings.report_progress {
            Arc::new(TracingProgress)
        } else {
            Arc::new(NoProgress)
        };
        let fetcher = match &settings.local_root {
            Some(root) => {
                info!("Reading GEO data from local mirror {root}.");
                let transport: Box<dyn Transport> = Box::new(LocalTransport::new(root.clone()));
                Fetcher::new(transport, None, progress)
            }
            None => {
                let transport: Box<dyn Transport> = Box::new(HttpTransport::new()?);
                let cache = CacheStore::new(settings.cache_root.clone());
                Fetcher::new(transport, Some(cache), progress)
            }
        };
        Ok(Self { fetcher, settings })
    }
}

impl<T: Transport> Repository<T> {
    pub fn new(fetcher: Fetcher<T>, settings: Settings) -> Self {
        Self { fetcher, settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    pub fn fetch_options(&self, options: FetchOptions) -> FetchOptions {
        FetchOptions {
            use_cache: options.use_cache && self.settings.use_cache,
            write_cache: options.write_cache && self.settings.write_cache,
            report: options.report && self.settings.report_progress,
            ..options
        }
    }

    pub fn open(&self, url: &str, options: FetchOptions) -> Result<FetchStream, GeoError> {
        self.fetcher.read(url, self.fetch_options(options))
    }

    pub fn open_lines(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<SoftLines<FetchStream>, GeoError> {
        Ok(SoftLines::new(self.open(url, options)?))
    }

    pub fn open_remote(
        &self,
        file: &RemoteFile,
        options: FetchOptions,
    ) -> Result<SoftLines<DataStream>, GeoError> {
        let options = FetchOptions {
            expected_size: file.size.or(options.expected_size),
            ..options
        };
        let stream = self.open(&file.url, options)?;
        let data: DataStream = if file.compressed {
            Box::new(CompressionWrapper::new(stream))
        } else {
            Box::new(stream)
        };
        Ok(SoftLines::new(data))
    }

    pub fn list(&self, dir_url: &str) -> Result<Vec<RemoteFile>, GeoError> {
        let mut lines = self.open_lines(dir_url, FetchOptions::default())?;
        let mut listing = Vec::new();
        while let Some(line) = lines.next_line()? {
            listing.push(line);
        }
        lines.close()?;
        Ok(RemoteFile::parse_listing(dir_url, &listing))
    }

    pub fn study(
        &self,
        id: SeriesAccession,
        platform: Option<PlatformAccession>,
    ) -> Result<Study, GeoError> {
        let mut study = Study::new(id, None, platform);
        study.load_brief(self)?;
        study.resolve_type(self)?;
        Ok(study)
    }

    pub fn populated_study(
        &self,
        id: SeriesAccession,
        platform: Option<PlatformAccession>,
    ) -> Result<Study, GeoError> {
        let mut study = self.study(id, platform)?;
        study.populate(self)?;
        Ok(study)
    }
}
