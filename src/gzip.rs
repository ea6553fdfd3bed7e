use std::io::{self, Read};

use flate2::read::MultiGzDecoder;

use crate::error::GeoError;
use crate::fetch::ClosableRead;

// Closing also closes the stream being decoded.
pub struct CompressionWrapper<R: ClosableRead> {
    decoder: Option<MultiGzDecoder<R>>,
}

impl<R: ClosableRead> CompressionWrapper<R> {
    pub fn new(inner: R) -> Self {
        Self {
            decoder: Some(MultiGzDecoder::new(inner)),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.decoder.is_none()
    }

    pub fn get_ref(&self) -> Option<&R> {
        self.decoder.as_ref().map(|decoder| decoder.get_ref())
    }
}

impl<R: ClosableRead> Read for CompressionWrapper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.read(buf),
            None => Ok(0),
        }
    }
}

impl<R: ClosableRead> ClosableRead for CompressionWrapper<R> {
    fn close(&mut self) -> Result<(), GeoError> {
        let Some(mut decoder) = self.decoder.take() else {
            return Ok(());
        };
        let result = decoder.get_mut().close();
        drop(decoder);
        result
    }
}
