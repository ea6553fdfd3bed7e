use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cache::{CacheStore, PendingEntry};
use crate::error::GeoError;
use crate::gzip::CompressionWrapper;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::transport::Transport;

pub const REPORT_SIZE: u64 = 131_072;

const DRAIN_BLOCK: usize = 64 * 1024;

pub trait ClosableRead: Read {
    fn close(&mut self) -> Result<(), GeoError>;
}

impl<T: ClosableRead + ?Sized> ClosableRead for Box<T> {
    fn close(&mut self) -> Result<(), GeoError> {
        (**self).close()
    }
}

pub type DataStream = Box<dyn ClosableRead + Send>;

pub struct Releasable<R> {
    inner: Option<R>,
}

impl<R: Read> Releasable<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: Read> Read for Releasable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Ok(0),
        }
    }
}

impl<R: Read> ClosableRead for Releasable<R> {
    fn close(&mut self) -> Result<(), GeoError> {
        self.inner = None;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub use_cache: bool,
    pub write_cache: bool,
    pub expected_size: Option<u64>,
    pub finalize: bool,
    pub report: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            write_cache: true,
            expected_size: None,
            finalize: true,
            report: true,
        }
    }
}

impl FetchOptions {
    pub fn partial() -> Self {
        Self {
            finalize: false,
            ..Self::default()
        }
    }
}

pub struct Fetcher<T: Transport> {
    transport: T,
    cache: Option<CacheStore>,
    progress: Arc<dyn ProgressSink>,
}

impl<T: Transport> Fetcher<T> {
    pub fn new(transport: T, cache: Option<CacheStore>, progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            transport,
            cache,
            progress,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    pub fn read(&self, url: &str, options: FetchOptions) -> Result<FetchStream, GeoError> {
        if options.use_cache {
            if let Some(cache) = &self.cache {
                if let Some(file) = cache.open_complete(url)? {
                    info!("Fetched {url} from cache.");
                    return Ok(FetchStream::Cached(CompressionWrapper::new(
                        Releasable::new(file),
                    )));
                }
            }
        }
        info!("Downloading {url} from network.");

        let fetched = self.transport.get(url)?;
        let expected_size = fetched.content_length.or(options.expected_size);
        let body: DataStream = if fetched.is_gzip_encoded() {
            debug!("Decompressing gzip-encoded response for {url}.");
            Box::new(CompressionWrapper::new(Releasable::new(fetched.body)))
        } else {
            Box::new(Releasable::new(fetched.body))
        };
        let pending = match (&self.cache, options.write_cache) {
            (Some(cache), true) => Some(cache.begin(url)?),
            _ => None,
        };

        Ok(FetchStream::Network(MonitoredStream {
            url: url.to_string(),
            inner: Some(body),
            cache: pending,
            expected_size,
            report: options.report,
            finalize: options.finalize,
            bytes_read: 0,
            bytes_since_report: 0,
            completed: false,
            closed: false,
            progress: self.progress.clone(),
        }))
    }
}

pub enum FetchStream {
    Cached(CompressionWrapper<Releasable<File>>),
    Network(MonitoredStream),
}

impl FetchStream {
    pub fn is_cached(&self) -> bool {
        matches!(self, FetchStream::Cached(_))
    }
}

impl Read for FetchStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FetchStream::Cached(stream) => stream.read(buf),
            FetchStream::Network(stream) => stream.read(buf),
        }
    }
}

impl ClosableRead for FetchStream {
    fn close(&mut self) -> Result<(), GeoError> {
        match self {
            FetchStream::Cached(stream) => stream.close(),
            FetchStream::Network(stream) => stream.close(),
        }
    }
}

// Closes itself once the source signals end of stream.
pub struct MonitoredStream {
    url: String,
    inner: Option<DataStream>,
    cache: Option<PendingEntry>,
    expected_size: Option<u64>,
    report: bool,
    finalize: bool,
    bytes_read: u64,
    bytes_since_report: u64,
    completed: bool,
    closed: bool,
    progress: Arc<dyn ProgressSink>,
}

impl MonitoredStream {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn handle_block(&mut self, block: &[u8]) -> Result<(), GeoError> {
        self.bytes_read += block.len() as u64;

        if block.is_empty() {
            self.completed = true;
            if self.report {
                self.report_progress();
            }
            return self.close();
        }

        if let Some(entry) = self.cache.as_mut() {
            entry.write_block(block)?;
        }

        if self.report {
            self.bytes_since_report += block.len() as u64;
            if self.bytes_since_report >= REPORT_SIZE {
                self.bytes_since_report = 0;
                self.report_progress();
            }
        }
        Ok(())
    }

    fn report_progress(&self) {
        self.progress.event(ProgressEvent {
            url: self.url.clone(),
            bytes_read: self.bytes_read,
            expected_size: self.expected_size,
            completed: self.completed,
        });
    }

    // Line-wise while reporting progress, in blocks otherwise.
    fn drain(&mut self) -> Result<(), GeoError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        let drained = if self.report {
            self.drain_lines(&mut inner)
        } else {
            self.drain_blocks(&mut inner)
        };
        self.inner = Some(inner);
        drained?;
        self.handle_block(&[])
    }

    fn drain_lines(&mut self, inner: &mut DataStream) -> Result<(), GeoError> {
        let mut reader = BufReader::with_capacity(DRAIN_BLOCK, inner);
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                return Ok(());
            }
            self.handle_block(&line)?;
        }
    }

    fn drain_blocks(&mut self, inner: &mut DataStream) -> Result<(), GeoError> {
        let mut buf = vec![0u8; DRAIN_BLOCK];
        loop {
            let n = match inner.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.handle_block(&buf[..n])?;
        }
    }

    fn teardown(&mut self) -> Result<(), GeoError> {
        self.closed = true;
        let released = match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        };

        if self.completed {
            info!("Download complete. {} bytes read.", self.bytes_read);
        } else {
            info!(
                "Download closed before completion. {} bytes read.",
                self.bytes_read
            );
        }
        if let Some(entry) = self.cache.take() {
            if self.completed {
                entry.commit()?;
            } else {
                entry.discard()?;
            }
        }
        released
    }
}

impl Read for MonitoredStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        let n = inner.read(buf)?;
        self.handle_block(&buf[..n]).map_err(into_io_error)?;
        Ok(n)
    }
}

impl ClosableRead for MonitoredStream {
    fn close(&mut self) -> Result<(), GeoError> {
        if self.closed {
            debug!("Redundant call to close(), ignored for {}.", self.url);
            return Ok(());
        }
        info!("Closing download of {}...", self.url);

        if self.finalize && !self.completed && self.cache.is_some() {
            info!("Finalizing download of {}.", self.url);
            if let Err(err) = self.drain() {
                if let Err(teardown) = self.teardown() {
                    warn!("Teardown after failed finalize of {}: {teardown}", self.url);
                }
                return Err(err);
            }
            if !self.closed {
                warn!("Close sequence not completed as expected for {}.", self.url);
                return self.teardown();
            }
            return Ok(());
        }

        self.teardown()
    }
}

impl Drop for MonitoredStream {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(err) = self.close() {
                warn!("Failed to close download of {}: {err}", self.url);
            }
        }
    }
}

fn into_io_error(err: GeoError) -> io::Error {
    match err {
        GeoError::Io(err) => err,
        other => io::Error::other(other),
    }
}
