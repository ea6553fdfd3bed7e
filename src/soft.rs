use std::io::{BufRead, BufReader, Read};

use crate::error::GeoError;
use crate::fetch::ClosableRead;

pub const SERIES_TABLE_BEGIN: &str = "!series_matrix_table_begin";
pub const SERIES_TABLE_END: &str = "!series_matrix_table_end";
pub const PLATFORM_TABLE_BEGIN: &str = "!platform_table_begin";
pub const PLATFORM_TABLE_END: &str = "!platform_table_end";
pub const ID_COLUMN: &str = "ID_REF";

pub fn split_tab_row(line: &str) -> Vec<String> {
    line.split('\t').map(unquote).collect()
}

fn unquote(field: &str) -> String {
    if field.len() >= 2 && field.starts_with('"') && field.ends_with('"') {
        field[1..field.len() - 1].replace("\"\"", "\"")
    } else {
        field.to_string()
    }
}

pub struct SoftLines<R: Read> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    lines_read: usize,
}

impl<R: Read> SoftLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            lines_read: 0,
        }
    }

    pub fn lines_read(&self) -> usize {
        self.lines_read
    }

    pub fn next_line(&mut self) -> Result<Option<String>, GeoError> {
        self.buf.clear();
        let n = self.reader.read_until(b'\n', &mut self.buf)?;
        if n == 0 {
            return Ok(None);
        }
        self.lines_read += 1;
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    pub fn expect_line(&mut self, what: &str) -> Result<String, GeoError> {
        self.next_line()?
            .ok_or_else(|| GeoError::malformed(format!("unexpected end of stream, expected {what}")))
    }

    // Consumes through `sentinel`, returning the number of lines.
    pub fn skip_through(&mut self, sentinel: &str) -> Result<usize, GeoError> {
        let mut consumed = 0;
        while let Some(line) = self.next_line()? {
            consumed += 1;
            if line.trim() == sentinel {
                break;
            }
        }
        Ok(consumed)
    }
}

impl<R: ClosableRead> SoftLines<R> {
    pub fn close(&mut self) -> Result<(), GeoError> {
        self.reader.get_mut().close()
    }
}
