use std::io::Read;

use tracing::{info, warn};

use crate::error::GeoError;
use crate::fetch::{ClosableRead, DataStream};
use crate::soft::{SERIES_TABLE_END, SoftLines, split_tab_row};

// First file's cells, then every other file's cells after its row id.
pub fn merge_row_lines(study: &str, lines: &[String]) -> Result<Vec<String>, GeoError> {
    let mut row: Vec<String> = Vec::new();
    for line in lines {
        let cells = split_tab_row(line);
        if row.is_empty() {
            row = cells;
            continue;
        }
        let (Some(expected), Some(found)) = (row.first(), cells.first()) else {
            continue;
        };
        if expected != found {
            return Err(GeoError::malformed(format!(
                "row id mismatch in {study}: '{expected}' vs '{found}'"
            )));
        }
        row.extend(cells.into_iter().skip(1));
    }
    Ok(row)
}

pub struct RowStream<R: Read = DataStream> {
    study: String,
    sources: Vec<SoftLines<R>>,
    expected_columns: usize,
    estimated_rows: Option<usize>,
    rows_read: usize,
    table_ended: bool,
    done: bool,
}

impl<R: Read> RowStream<R> {
    pub fn new(
        study: impl Into<String>,
        sources: Vec<SoftLines<R>>,
        expected_columns: usize,
        estimated_rows: Option<usize>,
    ) -> Self {
        Self {
            study: study.into(),
            sources,
            expected_columns,
            estimated_rows,
            rows_read: 0,
            table_ended: false,
            done: false,
        }
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn file_count(&self) -> usize {
        self.sources.len()
    }

    fn next_row(&mut self) -> Result<Option<Vec<String>>, GeoError> {
        let file_count = self.sources.len();
        loop {
            let mut lines = Vec::with_capacity(file_count);
            for source in &mut self.sources {
                if let Some(line) = source.next_line()? {
                    lines.push(line);
                }
            }
            if lines.is_empty() {
                self.finish()?;
                return Ok(None);
            }
            if lines.len() < file_count {
                return Err(GeoError::malformed(format!(
                    "only {} of {file_count} files of {} have more lines",
                    lines.len(),
                    self.study
                )));
            }

            let ended = lines
                .iter()
                .filter(|line| line.trim() == SERIES_TABLE_END)
                .count();
            if ended == file_count {
                self.table_ended = true;
                continue;
            }
            if ended > 0 {
                return Err(GeoError::malformed(format!(
                    "{SERIES_TABLE_END} reached in {ended} of {file_count} files of {}",
                    self.study
                )));
            }
            if lines.iter().all(|line| line.trim().is_empty()) {
                continue;
            }
            if self.table_ended {
                return Err(GeoError::malformed(format!(
                    "data after {SERIES_TABLE_END} in {}",
                    self.study
                )));
            }

            let row = merge_row_lines(&self.study, &lines)?;
            if row.len() != self.expected_columns {
                warn!(
                    "Row {} of {} has {} cells, expected {}.",
                    row.first().map(String::as_str).unwrap_or(""),
                    self.study,
                    row.len(),
                    self.expected_columns
                );
            }
            self.rows_read += 1;
            return Ok(Some(row));
        }
    }

    fn finish(&mut self) -> Result<(), GeoError> {
        if !self.table_ended {
            return Err(GeoError::malformed(format!(
                "{} ended without {SERIES_TABLE_END}",
                self.study
            )));
        }
        info!(
            "All {} files of {} read to the end: {} rows.",
            self.sources.len(),
            self.study,
            self.rows_read
        );
        match self.estimated_rows {
            Some(estimate) if estimate != self.rows_read => warn!(
                "{} rows read from {}, {} were announced.",
                self.rows_read, self.study, estimate
            ),
            _ => {}
        }
        Ok(())
    }
}

impl<R: ClosableRead> RowStream<R> {
    pub fn close(&mut self) -> Result<(), GeoError> {
        self.done = true;
        let mut first_error = None;
        for source in &mut self.sources {
            if let Err(err) = source.close() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<R: Read> Iterator for RowStream<R> {
    type Item = Result<Vec<String>, GeoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_row() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
