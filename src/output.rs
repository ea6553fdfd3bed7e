use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use serde::Serialize;

use crate::domain::{SpecialColumn, StudyType};
use crate::error::GeoError;
use crate::filter::MISSING_VALUE;
use crate::model::study::Study;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowLayout {
    #[default]
    Raw,
    Mine,
}

impl fmt::Display for RowLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLayout::Raw => write!(f, "raw"),
            RowLayout::Mine => write!(f, "mine"),
        }
    }
}

impl FromStr for RowLayout {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(RowLayout::Raw),
            "mine" => Ok(RowLayout::Mine),
            other => Err(GeoError::ConfigParse(format!("unknown row layout {other}"))),
        }
    }
}

const FILTERED_VALUES_START: usize = 5;

pub struct RowWriter<W: Write> {
    out: W,
    layout: RowLayout,
    rows_seen: usize,
    rows_written: usize,
}

impl<W: Write> RowWriter<W> {
    pub fn new(out: W, layout: RowLayout) -> Self {
        Self {
            out,
            layout,
            rows_seen: 0,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn write_row(&mut self, row: &[String]) -> io::Result<()> {
        self.rows_seen += 1;
        match self.layout {
            RowLayout::Raw => self.write_cells(row.iter().map(String::as_str)),
            RowLayout::Mine => {
                if self.rows_seen == 1 {
                    return Ok(());
                }
                let gene = row.get(1).map(String::as_str).unwrap_or("");
                let values = row
                    .iter()
                    .skip(FILTERED_VALUES_START)
                    .map(|value| if value == MISSING_VALUE { "" } else { value.as_str() });
                self.write_cells(std::iter::once(gene).chain(values))
            }
        }
    }

    fn write_cells<'a>(&mut self, cells: impl Iterator<Item = &'a str>) -> io::Result<()> {
        let line = cells.collect::<Vec<_>>().join("\t");
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn finish(mut self) -> io::Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }
}

#[derive(Debug, Serialize)]
pub struct PlatformSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub study_type: StudyType,
    pub columns: usize,
    pub special_columns: BTreeMap<SpecialColumn, Option<String>>,
}

#[derive(Debug, Serialize)]
pub struct StudySummary {
    pub id: String,
    pub label: String,
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub study_type: Option<StudyType>,
    pub pseudo: bool,
    pub populated: bool,
    pub platform: Option<PlatformSummary>,
    pub samples: usize,
    pub subjects: usize,
    pub columns: usize,
    pub estimated_rows: Option<usize>,
    pub substudies: Vec<StudySummary>,
}

impl StudySummary {
    pub fn from_study(study: &Study) -> Self {
        Self {
            id: study.id().to_string(),
            label: study.label(),
            title: study.title().map(|title| title.to_string()),
            study_type: study.study_type(),
            pseudo: study.is_pseudo(),
            populated: study.is_populated(),
            platform: study.platform().map(|platform| PlatformSummary {
                id: platform.id().to_string(),
                study_type: platform.study_type(),
                columns: platform.column_titles().len(),
                special_columns: platform.special_columns().clone(),
            }),
            samples: study.samples().len(),
            subjects: study.subject_samples().len(),
            columns: study.column_titles().len(),
            estimated_rows: study.estimated_rows(),
            substudies: study
                .substudies()
                .values()
                .map(StudySummary::from_study)
                .collect(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &StudySummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    #[test]
    fn mine_layout_drops_header_and_statistics() {
        let mut writer = RowWriter::new(Vec::new(), RowLayout::Mine);
        writer
            .write_row(&row(&["ID_REF", "GENE_SYMBOL", "NUM_VALUES", "MEAN", "STD", "GSM1", "GSM2"]))
            .unwrap();
        writer
            .write_row(&row(&["r1", "APOE", "1", "2.0", "0.0", "2.0", "None"]))
            .unwrap();
        assert_eq!(writer.rows_written(), 1);
        let out = writer.finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "APOE\t2.0\t\n");
    }

    #[test]
    fn raw_layout_keeps_everything() {
        let mut writer = RowWriter::new(Vec::new(), RowLayout::Raw);
        writer.write_row(&row(&["ID_REF", "GSM1"])).unwrap();
        writer.write_row(&row(&["r1", "None"])).unwrap();
        let out = writer.finish().unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "ID_REF\tGSM1\nr1\tNone\n");
    }

    #[test]
    fn layouts_parse() {
        assert_eq!("MINE".parse::<RowLayout>().unwrap(), RowLayout::Mine);
        assert!("csv".parse::<RowLayout>().is_err());
    }
}
