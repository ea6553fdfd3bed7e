use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};

use camino::Utf8Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use crate::config::{Settings, validate_percentile};
use crate::domain::{GENE_IDENTITY_PREFERENCE, SpecialColumn, StudyType};
use crate::error::GeoError;
use crate::model::platform::Platform;
use crate::model::repository::Repository;
use crate::model::study::Study;
use crate::soft::ID_COLUMN;
use crate::transport::Transport;

pub const NUM_VALUES_COLUMN: &str = "NUM_VALUES";
pub const MEAN_COLUMN: &str = "MEAN";
pub const STD_COLUMN: &str = "STD";
pub const MISSING_VALUE: &str = "None";

pub fn parse_value(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok()
}

pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{value:?}"),
        None => MISSING_VALUE.to_string(),
    }
}

pub fn merge_values(values: &[&str]) -> Option<f64> {
    let parsed = values
        .iter()
        .filter_map(|value| parse_value(value))
        .collect::<Vec<_>>();
    if parsed.is_empty() {
        return None;
    }
    Some(parsed.iter().sum::<f64>() / parsed.len() as f64)
}

pub fn merge_titles(titles: &[&str]) -> String {
    let mut titles = titles.to_vec();
    titles.sort_unstable();
    titles.join(";")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnClass {
    Passthrough(usize),
    Merged(Vec<usize>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    classes: Vec<ColumnClass>,
    width: usize,
}

impl ColumnMap {
    pub fn build(
        titles: &[String],
        subject_of: impl Fn(&str) -> Option<String>,
        subject_samples: &BTreeMap<String, Vec<String>>,
    ) -> Self {
        let positions = titles
            .iter()
            .enumerate()
            .map(|(index, title)| (title.as_str(), index))
            .collect::<HashMap<_, _>>();
        let mut consumed = HashSet::new();
        let mut classes = Vec::new();
        for (index, title) in titles.iter().enumerate() {
            if consumed.contains(&index) {
                continue;
            }
            let Some(subject) = subject_of(title) else {
                consumed.insert(index);
                classes.push(ColumnClass::Passthrough(index));
                continue;
            };
            let mut members = vec![index];
            consumed.insert(index);
            for gsm in subject_samples.get(&subject).into_iter().flatten() {
                match positions.get(gsm.as_str()) {
                    Some(&column) if consumed.insert(column) => members.push(column),
                    Some(_) => {}
                    None => warn!("Sample {gsm} of subject {subject} has no column."),
                }
            }
            members.sort_unstable();
            classes.push(ColumnClass::Merged(members));
        }
        Self {
            classes,
            width: titles.len(),
        }
    }

    pub fn classes(&self) -> &[ColumnClass] {
        &self.classes
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn merged_class_count(&self) -> usize {
        self.classes
            .iter()
            .filter(|class| matches!(class, ColumnClass::Merged(_)))
            .count()
    }

    pub fn merge<T>(
        &self,
        row: &[String],
        passthrough: impl Fn(&str) -> T,
        merge: impl Fn(&[&str]) -> T,
    ) -> Result<Vec<T>, GeoError> {
        if row.len() != self.width {
            return Err(GeoError::ColumnMerge(format!(
                "row {} has {} columns, column map expects {}",
                row.first().map(String::as_str).unwrap_or(""),
                row.len(),
                self.width
            )));
        }
        Ok(self
            .classes
            .iter()
            .map(|class| match class {
                ColumnClass::Passthrough(index) => passthrough(&row[*index]),
                ColumnClass::Merged(members) => {
                    let values = members
                        .iter()
                        .map(|index| row[*index].as_str())
                        .collect::<Vec<_>>();
                    merge(&values)
                }
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowStats {
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

impl RowStats {
    pub fn compute(values: &[Option<f64>]) -> Self {
        let present = values.iter().flatten().copied().collect::<Vec<_>>();
        if present.is_empty() {
            return Self {
                count: 0,
                mean: None,
                std: None,
            };
        }
        let count = present.len();
        let mean = present.iter().sum::<f64>() / count as f64;
        let variance = present
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count as f64;
        Self {
            count,
            mean: Some(mean),
            std: Some(variance.sqrt()),
        }
    }
}

// Missing statistics sort below every number.
fn compare_stat(left: Option<f64>, right: Option<f64>) -> std::cmp::Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.total_cmp(&right),
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

// Highest-mean row per gene, first on ties; then the top `floor(percentile * n)` by std.
pub fn select_rows(
    rows_per_gene: &BTreeMap<String, Vec<String>>,
    row_stats: &HashMap<String, RowStats>,
    percentile: f64,
) -> Vec<String> {
    let stat = |row_id: &String, pick: fn(&RowStats) -> Option<f64>| {
        row_stats.get(row_id).and_then(pick)
    };
    let mut representatives = Vec::with_capacity(rows_per_gene.len());
    for row_ids in rows_per_gene.values() {
        let mut best: Option<&String> = None;
        for row_id in row_ids {
            let better = match best {
                None => true,
                Some(current) => {
                    compare_stat(stat(row_id, |s| s.mean), stat(current, |s| s.mean)).is_gt()
                }
            };
            if better {
                best = Some(row_id);
            }
        }
        if let Some(row_id) = best {
            representatives.push(row_id.clone());
        }
    }

    representatives.sort_by(|left, right| {
        compare_stat(stat(right, |s| s.std), stat(left, |s| s.std))
    });
    let keep = (representatives.len() as f64 * percentile).floor() as usize;
    representatives.truncate(keep);
    representatives
}

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions {
    pub merge_columns: bool,
    pub percentile: f64,
}

impl FilterOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            merge_columns: settings.merge_columns,
            percentile: settings.percentile,
        }
    }
}

pub struct EqtlFilter<'a> {
    study: &'a mut Study,
    options: FilterOptions,
    gene_column: SpecialColumn,
    column_map: Option<ColumnMap>,
}

impl<'a> EqtlFilter<'a> {
    pub fn new(study: &'a mut Study, options: FilterOptions) -> Result<Self, GeoError> {
        if !study.is_populated() {
            return Err(GeoError::NotPopulated(format!(
                "{study} must be populated to filter rows"
            )));
        }
        if study.study_type() != Some(StudyType::Eqtl) {
            return Err(GeoError::StudyTypeMismatch {
                study: study.label(),
                found: study
                    .study_type()
                    .map(|study_type| study_type.to_string())
                    .unwrap_or_else(|| "unresolved".to_string()),
            });
        }
        validate_percentile(options.percentile)?;

        let platform = study
            .platform()
            .ok_or_else(|| GeoError::NotPopulated(format!("{study} has no platform")))?;
        let gene_column = GENE_IDENTITY_PREFERENCE
            .iter()
            .copied()
            .find(|column| platform.special_column(*column).is_some())
            .ok_or_else(|| GeoError::NoGeneColumn(platform.id().to_string()))?;
        info!(
            "Selected column {gene_column} ('{}') to identify genes of {study}.",
            platform.special_column(gene_column).unwrap_or_default()
        );

        let samples = study.samples().len();
        let subjects = study.subject_samples().len();
        let column_map = if options.merge_columns && samples > subjects {
            let map = ColumnMap::build(
                study.column_titles(),
                |title| {
                    study
                        .samples()
                        .get(title)
                        .map(|sample| sample.subject_key().to_string())
                },
                study.subject_samples(),
            );
            info!(
                "Created column merge map for {study}: {samples} samples to {subjects} subjects."
            );
            if map.class_count() != subjects + 1 {
                warn!(
                    "Column merge map of {study} has {} classes, expected {}.",
                    map.class_count(),
                    subjects + 1
                );
            }
            Some(map)
        } else {
            info!(
                "No column merge map for {study} (merging {}).",
                if options.merge_columns { "enabled" } else { "disabled" }
            );
            None
        };

        Ok(Self {
            study,
            options,
            gene_column,
            column_map,
        })
    }

    pub fn gene_column(&self) -> SpecialColumn {
        self.gene_column
    }

    pub fn column_map(&self) -> Option<&ColumnMap> {
        self.column_map.as_ref()
    }

    pub fn header(&self) -> Result<Vec<String>, GeoError> {
        let titles = match &self.column_map {
            Some(map) => map.merge(
                self.study.column_titles(),
                |title| title.to_string(),
                merge_titles,
            )?,
            None => self.study.column_titles().to_vec(),
        };
        let mut header = vec![
            ID_COLUMN.to_string(),
            self.gene_column.to_string(),
            NUM_VALUES_COLUMN.to_string(),
            MEAN_COLUMN.to_string(),
            STD_COLUMN.to_string(),
        ];
        header.extend(titles.into_iter().skip(1));
        Ok(header)
    }

    pub fn run<T: Transport>(self, repo: &Repository<T>) -> Result<FilterRun, GeoError> {
        let header = self.header()?;
        info!("Started filter pass 1 for {}; this may take a while.", self.study);
        let rows = self.study.rows(repo)?;
        let platform = self
            .study
            .platform()
            .ok_or_else(|| GeoError::NotPopulated(format!("{} has no platform", self.study)))?;
        let label = self.study.label();
        let scratch = first_pass(
            &label,
            rows,
            platform,
            self.gene_column,
            self.column_map.as_ref(),
            &repo.settings().scratch_dir,
        )?;

        let FirstPass {
            file,
            excluded_rows,
            rows_per_gene,
            row_stats,
            rows_read,
        } = scratch;
        let kept = rows_read - excluded_rows.len();
        info!(
            "Filter pass 1 complete for {label}: {} of {rows_read} rows removed for no gene identity, {kept} remain.",
            excluded_rows.len()
        );
        if !rows_per_gene.is_empty() {
            info!(
                "{} unique genes, {:.1} rows per gene.",
                rows_per_gene.len(),
                kept as f64 / rows_per_gene.len() as f64
            );
        }

        let selected = select_rows(&rows_per_gene, &row_stats, self.options.percentile);
        info!(
            "Selected top {}% of {} gene representatives by standard deviation: {} rows.",
            self.options.percentile * 100.0,
            rows_per_gene.len(),
            selected.len()
        );
        if selected.is_empty() {
            warn!("No rows of {label} pass the filter; output will be the header only.");
        }

        Ok(FilterRun {
            header,
            gene_column: self.gene_column,
            excluded_rows,
            rows_per_gene,
            row_stats,
            accepted: selected.into_iter().collect(),
            rows_read,
            scratch: file,
        })
    }
}

struct FirstPass {
    file: NamedTempFile,
    excluded_rows: Vec<String>,
    rows_per_gene: BTreeMap<String, Vec<String>>,
    row_stats: HashMap<String, RowStats>,
    rows_read: usize,
}

fn first_pass<I>(
    label: &str,
    rows: I,
    platform: &Platform,
    gene_column: SpecialColumn,
    column_map: Option<&ColumnMap>,
    scratch_dir: &Utf8Path,
) -> Result<FirstPass, GeoError>
where
    I: Iterator<Item = Result<Vec<String>, GeoError>>,
{
    let file = tempfile::Builder::new()
        .prefix(&format!("{label}.rowmerge."))
        .tempfile_in(scratch_dir)?;
    let mut writer = BufWriter::new(file.as_file());
    let mut excluded_rows = Vec::new();
    let mut rows_per_gene: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut row_stats = HashMap::new();
    let mut rows_read = 0;

    for row in rows {
        let row = row?;
        rows_read += 1;
        let Some(row_id) = row.first().cloned() else {
            continue;
        };
        let gene = match platform.lookup(&row_id, gene_column)? {
            Some(gene) if !gene.is_empty() => gene.to_string(),
            _ => {
                excluded_rows.push(row_id);
                continue;
            }
        };
        rows_per_gene.entry(gene.clone()).or_default().push(row_id.clone());

        let values = match column_map {
            Some(map) => map.merge(&row, parse_value, merge_values)?,
            None => row.iter().map(|cell| parse_value(cell)).collect(),
        };
        let values = &values[1.min(values.len())..];
        let stats = RowStats::compute(values);

        let mut line = vec![
            row_id.clone(),
            gene,
            stats.count.to_string(),
            format_value(stats.mean),
            format_value(stats.std),
        ];
        line.extend(values.iter().map(|value| format_value(*value)));
        writer.write_all(line.join("\t").as_bytes())?;
        writer.write_all(b"\n")?;
        row_stats.insert(row_id, stats);
    }
    writer.flush()?;
    drop(writer);

    Ok(FirstPass {
        file,
        excluded_rows,
        rows_per_gene,
        row_stats,
        rows_read,
    })
}

pub struct FilterRun {
    header: Vec<String>,
    gene_column: SpecialColumn,
    excluded_rows: Vec<String>,
    rows_per_gene: BTreeMap<String, Vec<String>>,
    row_stats: HashMap<String, RowStats>,
    accepted: HashSet<String>,
    rows_read: usize,
    scratch: NamedTempFile,
}

impl FilterRun {
    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn gene_column(&self) -> SpecialColumn {
        self.gene_column
    }

    pub fn excluded_rows(&self) -> &[String] {
        &self.excluded_rows
    }

    pub fn rows_per_gene(&self) -> &BTreeMap<String, Vec<String>> {
        &self.rows_per_gene
    }

    pub fn row_stats(&self, row_id: &str) -> Option<&RowStats> {
        self.row_stats.get(row_id)
    }

    pub fn accepted(&self) -> &HashSet<String> {
        &self.accepted
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn scratch_path(&self) -> &std::path::Path {
        self.scratch.path()
    }

    pub fn rows(&self) -> Result<FilteredRows<'_>, GeoError> {
        let file = self.scratch.reopen()?;
        Ok(FilteredRows {
            header: Some(self.header.clone()),
            lines: BufReader::new(file).lines(),
            accepted: &self.accepted,
            emitted: 0,
            done: false,
        })
    }
}

pub struct FilteredRows<'a> {
    header: Option<Vec<String>>,
    lines: Lines<BufReader<std::fs::File>>,
    accepted: &'a HashSet<String>,
    emitted: usize,
    done: bool,
}

impl FilteredRows<'_> {
    fn finish(&mut self) {
        self.done = true;
        if self.emitted != self.accepted.len() {
            warn!(
                "{} rows emitted, {} were accepted.",
                self.emitted,
                self.accepted.len()
            );
        } else {
            info!("Filter complete: {} rows emitted.", self.emitted);
        }
    }
}

impl Iterator for FilteredRows<'_> {
    type Item = Result<Vec<String>, GeoError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(Ok(header));
        }
        if self.done {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    let row = line
                        .trim_end_matches(['\r', '\n'])
                        .split('\t')
                        .map(|cell| cell.to_string())
                        .collect::<Vec<_>>();
                    if row.first().is_some_and(|id| self.accepted.contains(id)) {
                        self.emitted += 1;
                        return Some(Ok(row));
                    }
                }
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(err.into()));
                }
                None => {
                    self.finish();
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(mean: f64, std: f64) -> RowStats {
        RowStats {
            count: 2,
            mean: Some(mean),
            std: Some(std),
        }
    }

    #[test]
    fn merges_numeric_values() {
        assert_eq!(merge_values(&["1.0", "3.0"]), Some(2.0));
        assert_eq!(merge_values(&["2.0", "None"]), Some(2.0));
        assert_eq!(merge_values(&["None", "None"]), None);
        assert_eq!(merge_titles(&["GSM2", "GSM1"]), "GSM1;GSM2");
    }

    #[test]
    fn population_std() {
        let stats = RowStats::compute(&[Some(1.0), None, Some(3.0)]);
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, Some(2.0));
        assert_eq!(stats.std, Some(1.0));
        assert_eq!(RowStats::compute(&[None]).mean, None);
    }

    #[test]
    fn column_map_groups_subjects() {
        let titles = ["ID_REF", "GSM1", "GSM2", "GSM3"]
            .map(String::from)
            .to_vec();
        let subjects = BTreeMap::from([
            ("A".to_string(), vec!["GSM1".to_string(), "GSM3".to_string()]),
            ("C".to_string(), vec!["GSM2".to_string()]),
        ]);
        let subject_of = |title: &str| match title {
            "GSM1" | "GSM3" => Some("A".to_string()),
            "GSM2" => Some("C".to_string()),
            _ => None,
        };
        let map = ColumnMap::build(&titles, subject_of, &subjects);
        assert_eq!(
            map.classes(),
            &[
                ColumnClass::Passthrough(0),
                ColumnClass::Merged(vec![1, 3]),
                ColumnClass::Merged(vec![2]),
            ]
        );
        assert_eq!(map.merged_class_count(), 2);

        let row = ["r1", "1.0", "5", "3.0"].map(String::from).to_vec();
        let merged = map.merge(&row, parse_value, merge_values).unwrap();
        assert_eq!(merged, vec![None, Some(2.0), Some(5.0)]);
        assert!(matches!(
            map.merge(&row[..3], parse_value, merge_values),
            Err(GeoError::ColumnMerge(_))
        ));
    }

    #[test]
    fn representative_has_highest_mean() {
        let rows_per_gene = BTreeMap::from([
            ("G".to_string(), vec!["r1".to_string(), "r2".to_string()]),
            ("H".to_string(), vec!["r3".to_string()]),
        ]);
        let row_stats = HashMap::from([
            ("r1".to_string(), stats(5.0, 1.0)),
            ("r2".to_string(), stats(9.0, 1.0)),
            ("r3".to_string(), stats(1.0, 0.5)),
        ]);
        let selected = select_rows(&rows_per_gene, &row_stats, 1.0);
        assert_eq!(selected, vec!["r2".to_string(), "r3".to_string()]);
    }

    #[test]
    fn keeps_floor_of_percentile() {
        let mut rows_per_gene = BTreeMap::new();
        let mut row_stats = HashMap::new();
        for i in 0..10 {
            rows_per_gene.insert(format!("G{i}"), vec![format!("r{i}")]);
            row_stats.insert(format!("r{i}"), stats(1.0, i as f64));
        }
        let selected = select_rows(&rows_per_gene, &row_stats, 0.75);
        assert_eq!(selected.len(), 7);
        let expected = (3..10).rev().map(|i| format!("r{i}")).collect::<Vec<_>>();
        assert_eq!(selected, expected);

        let one = BTreeMap::from([("G".to_string(), vec!["r9".to_string()])]);
        assert!(select_rows(&one, &row_stats, 0.5).is_empty());
    }

    #[test]
    fn formats_like_scratch_rows() {
        assert_eq!(format_value(Some(2.0)), "2.0");
        assert_eq!(format_value(Some(0.25)), "0.25");
        assert_eq!(format_value(None), "None");
    }
}
