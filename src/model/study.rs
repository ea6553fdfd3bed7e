use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::{AttrMap, PlatformAccession, SeriesAccession, StudyType, declared_study_type};
use crate::error::GeoError;
use crate::fetch::{DataStream, FetchOptions};
use crate::model::platform::Platform;
use crate::model::remote::RemoteFile;
use crate::model::repository::Repository;
use crate::model::rows::RowStream;
use crate::model::sample::Sample;
use crate::soft::{ID_COLUMN, SERIES_TABLE_BEGIN, SoftLines, split_tab_row};
use crate::transport::Transport;

static SERIES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\^SERIES = (\w+)").expect("static series pattern"));
static ATTRIBUTE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!Series_(\S+) = ?(.*)$").expect("static attribute pattern"));
static SUPER_SERIES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^SuperSeries of: (GSE\d+)$").expect("static relation pattern")
});
static SAMPLE_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!Sample_(\w+)\t(.+)$").expect("static sample pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Population {
    New,
    BriefLoaded,
    TypeResolved,
    Populated,
}

// Pseudo substudies are keyed `GSE-GPL` and share the parent accession.
#[derive(Debug)]
pub struct Study {
    id: SeriesAccession,
    parent: Option<SeriesAccession>,
    selected_platform: Option<PlatformAccession>,
    state: Population,
    study_type: Option<StudyType>,
    pseudo: bool,
    attributes: AttrMap,
    substudies: BTreeMap<String, Study>,
    samples: BTreeMap<String, Sample>,
    subject_samples: BTreeMap<String, Vec<String>>,
    subject_pattern: Option<Regex>,
    platform: Option<Platform>,
    column_titles: Vec<String>,
    estimated_rows: Option<usize>,
}

impl Study {
    pub fn new(
        id: SeriesAccession,
        parent: Option<SeriesAccession>,
        selected_platform: Option<PlatformAccession>,
    ) -> Self {
        Self {
            id,
            parent,
            selected_platform,
            state: Population::New,
            study_type: None,
            pseudo: false,
            attributes: AttrMap::new(),
            substudies: BTreeMap::new(),
            samples: BTreeMap::new(),
            subject_samples: BTreeMap::new(),
            subject_pattern: None,
            platform: None,
            column_titles: Vec::new(),
            estimated_rows: None,
        }
    }

    pub fn label(&self) -> String {
        self.to_string()
    }

    pub fn load_brief<T: Transport>(&mut self, repo: &Repository<T>) -> Result<(), GeoError> {
        if self.state >= Population::BriefLoaded {
            warn!("Brief record of {self} already loaded.");
            return Ok(());
        }
        let url = repo.settings().endpoints.series_brief_url(&self.id);
        let mut lines = repo.open_lines(&url, FetchOptions::default())?;
        self.parse_brief(&mut lines)?;
        lines.close()
    }

    pub fn parse_brief<R: Read>(&mut self, lines: &mut SoftLines<R>) -> Result<(), GeoError> {
        let first = lines.expect_line("^SERIES line")?;
        let Some(caps) = SERIES_LINE.captures(first.trim()) else {
            return Err(GeoError::malformed(format!(
                "expected ^SERIES line for {}, got '{first}'",
                self.id
            )));
        };
        if !caps[1].eq_ignore_ascii_case(self.id.as_str()) {
            return Err(GeoError::malformed(format!(
                "expected series {}, record describes {}",
                self.id, &caps[1]
            )));
        }
        while let Some(line) = lines.next_line()? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(caps) = ATTRIBUTE_LINE.captures(line) else {
                return Err(GeoError::malformed(format!(
                    "unexpected line in brief record of {}: '{line}'",
                    self.id
                )));
            };
            self.attributes
                .entry(caps[1].to_string())
                .or_default()
                .push(caps[2].trim().to_string());
        }
        self.state = Population::BriefLoaded;
        debug!("Loaded {} brief attributes of {self}.", self.attributes.len());
        Ok(())
    }

    pub fn resolve_type<T: Transport>(&mut self, repo: &Repository<T>) -> Result<(), GeoError> {
        if self.state >= Population::TypeResolved {
            warn!("Type of {self} already resolved.");
            return Ok(());
        }
        if self.state < Population::BriefLoaded {
            self.load_brief(repo)?;
        }

        let platform_ids = self.attribute_values("platform_id").to_vec();
        let related = self
            .attribute_values("relation")
            .iter()
            .filter_map(|relation| SUPER_SERIES.captures(relation))
            .map(|caps| caps[1].parse::<SeriesAccession>())
            .collect::<Result<Vec<_>, _>>()?;

        if !related.is_empty() {
            info!("{self} is a super series of {} studies.", related.len());
            self.study_type = Some(StudyType::Super);
            for id in related {
                let child = Study::new(id, Some(self.id.clone()), None);
                self.substudies.insert(child.label(), child);
            }
        } else if platform_ids.len() > 1 && self.selected_platform.is_none() {
            info!(
                "{self} spans {} platforms; splitting into pseudo substudies.",
                platform_ids.len()
            );
            self.study_type = Some(StudyType::Super);
            self.pseudo = true;
            for platform in &platform_ids {
                let child = Study::new(
                    self.id.clone(),
                    Some(self.id.clone()),
                    Some(platform.parse()?),
                );
                self.substudies.insert(child.label(), child);
            }
        } else {
            self.resolve_leaf(repo, &platform_ids)?;
        }

        for child in self.substudies.values_mut() {
            child.resolve_type(repo)?;
        }
        self.state = Population::TypeResolved;
        Ok(())
    }

    fn resolve_leaf<T: Transport>(
        &mut self,
        repo: &Repository<T>,
        platform_ids: &[String],
    ) -> Result<(), GeoError> {
        let platform_id: PlatformAccession = match &self.selected_platform {
            Some(selected) => {
                if !platform_ids
                    .iter()
                    .any(|id| id.eq_ignore_ascii_case(selected.as_str()))
                {
                    return Err(GeoError::malformed(format!(
                        "{} does not use platform {selected}",
                        self.id
                    )));
                }
                self.pseudo = platform_ids.len() > 1;
                selected.clone()
            }
            None => platform_ids
                .first()
                .ok_or_else(|| {
                    GeoError::malformed(format!("{} declares no platform_id", self.id))
                })?
                .parse()?,
        };

        let pattern = repo.settings().subject_pattern(&self.id).clone();
        for gsm in self.attribute_values("sample_id").to_vec() {
            self.samples
                .insert(gsm.clone(), Sample::new(gsm, pattern.clone()));
        }
        self.subject_pattern = Some(pattern);

        let declared_lines = self.attribute_values("type");
        if declared_lines.len() > 1 {
            info!("{self} declares {} types: {declared_lines:?}.", declared_lines.len());
        }
        let declared = declared_study_type(declared_lines);
        let platform = if self.pseudo {
            let platform = Platform::populate(repo, platform_id, None)?;
            info!(
                "Type of pseudo study {self} taken from its platform: {}.",
                platform.study_type()
            );
            platform
        } else {
            if declared.is_none() {
                warn!(
                    "{self} declares no measurable type ({:?}); treating it as {}.",
                    self.attribute_values("type"),
                    StudyType::Other
                );
            }
            Platform::populate(repo, platform_id, Some(declared.unwrap_or(StudyType::Other)))?
        };
        self.study_type = Some(platform.study_type());
        self.platform = Some(platform);
        Ok(())
    }

    pub fn populate<T: Transport>(&mut self, repo: &Repository<T>) -> Result<(), GeoError> {
        if self.state == Population::Populated {
            warn!("{self} is already populated.");
            return Ok(());
        }
        if self.state < Population::TypeResolved {
            self.resolve_type(repo)?;
        }

        if self.study_type == Some(StudyType::Super) {
            for child in self.substudies.values_mut() {
                child.populate(repo)?;
            }
        } else {
            self.populate_leaf(repo)?;
        }
        self.state = Population::Populated;
        Ok(())
    }

    fn populate_leaf<T: Transport>(&mut self, repo: &Repository<T>) -> Result<(), GeoError> {
        let files = self.data_files(repo)?;
        let mut sources = Self::open_files(repo, &files, FetchOptions::partial())?;
        for source in &mut sources {
            self.read_sample_header(source)?;
        }
        self.column_titles.clear();
        for source in &mut sources {
            self.read_column_titles(source)?;
            source.close()?;
        }

        let unpopulated = self
            .samples
            .values()
            .filter(|sample| !sample.is_populated())
            .map(|sample| sample.id().to_string())
            .collect::<Vec<_>>();
        if !unpopulated.is_empty() {
            if self.pseudo {
                debug!(
                    "Dropped {} samples of {self} belonging to other platforms.",
                    unpopulated.len()
                );
            } else {
                warn!(
                    "Not all samples of {self} have attributes; dropping {}.",
                    unpopulated.join(", ")
                );
            }
            self.samples.retain(|_, sample| sample.is_populated());
        }
        if self.samples.is_empty() {
            warn!("{self} has no samples.");
        }
        self.estimated_rows = self.estimate_rows();
        if self.column_titles.len() != self.samples.len() + 1 {
            warn!(
                "{self} has {} column titles for {} samples.",
                self.column_titles.len(),
                self.samples.len()
            );
        }
        info!(
            "Populated {self}: {} samples, {} subjects, ~{} rows.",
            self.samples.len(),
            self.subject_samples.len(),
            self.estimated_rows
                .map(|rows| rows.to_string())
                .unwrap_or_else(|| "?".to_string())
        );
        Ok(())
    }

    pub fn data_files<T: Transport>(&self, repo: &Repository<T>) -> Result<Vec<RemoteFile>, GeoError> {
        let dir_url = repo.settings().endpoints.series_matrix_dir_url(&self.id);
        let mut files = repo.list(&dir_url)?;
        if self.pseudo {
            if let Some(platform) = &self.selected_platform {
                let names_platform = platform_token(platform)?;
                files.retain(|file| names_platform.is_match(&file.filename));
            }
        }
        if files.is_empty() {
            return Err(GeoError::malformed(format!("no data files listed for {self}")));
        }
        debug!(
            "Data files of {self}: {}",
            files
                .iter()
                .map(|file| file.filename.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(files)
    }

    fn open_files<T: Transport>(
        repo: &Repository<T>,
        files: &[RemoteFile],
        options: FetchOptions,
    ) -> Result<Vec<SoftLines<DataStream>>, GeoError> {
        files
            .iter()
            .map(|file| repo.open_remote(file, options))
            .collect()
    }

    pub fn read_sample_header<R: Read>(&mut self, lines: &mut SoftLines<R>) -> Result<(), GeoError> {
        let mut rows: Vec<(String, Vec<String>)> = Vec::new();
        let mut reached_table = false;
        while let Some(line) = lines.next_line()? {
            if line.trim() == SERIES_TABLE_BEGIN {
                reached_table = true;
                break;
            }
            if let Some(caps) = SAMPLE_LINE.captures(&line) {
                rows.push((caps[1].to_string(), split_tab_row(&caps[2])));
            }
        }
        if !reached_table {
            return Err(GeoError::malformed(format!(
                "data file of {self} has no {SERIES_TABLE_BEGIN}"
            )));
        }

        let accessions = rows
            .iter()
            .find(|(key, _)| key == "geo_accession")
            .map(|(_, values)| values.clone())
            .ok_or_else(|| {
                GeoError::malformed(format!("data file of {self} has no !Sample_geo_accession"))
            })?;

        let pattern = self.subject_pattern.clone().unwrap_or_else(|| {
            Regex::new(r"^(?:(.*)())").expect("static subject pattern")
        });
        for (index, gsm) in accessions.iter().enumerate() {
            let label = self.label();
            let sample = self.samples.entry(gsm.clone()).or_insert_with(|| {
                warn!("Sample {gsm} is not listed in the brief record of {label}.");
                Sample::new(gsm.clone(), pattern.clone())
            });
            for (key, values) in &rows {
                let Some(value) = values.get(index) else {
                    return Err(GeoError::malformed(format!(
                        "!Sample_{key} of {label} has {} values for {} samples",
                        values.len(),
                        accessions.len()
                    )));
                };
                sample.add_pair(key, value);
            }
            sample.split_derivatives();
            sample.mark_populated();
            self.subject_samples
                .entry(sample.subject_key().to_string())
                .or_default()
                .push(gsm.clone());
        }
        Ok(())
    }

    pub fn read_column_titles<R: Read>(&mut self, lines: &mut SoftLines<R>) -> Result<(), GeoError> {
        let line = lines.expect_line("column titles")?;
        let titles = split_tab_row(&line);
        if titles.first().map(String::as_str) != Some(ID_COLUMN) {
            return Err(GeoError::malformed(format!(
                "column titles of {self} do not start with {ID_COLUMN}"
            )));
        }
        if self.column_titles.is_empty() {
            self.column_titles = titles;
        } else {
            self.column_titles.extend(titles.into_iter().skip(1));
        }
        Ok(())
    }

    fn estimate_rows(&self) -> Option<usize> {
        let mut estimate: Option<usize> = None;
        for sample in self.samples.values() {
            match sample
                .attribute("data_row_count")
                .and_then(|count| count.trim().parse::<usize>().ok())
            {
                Some(count) => estimate = Some(estimate.map_or(count, |known| known.max(count))),
                None => {
                    warn!("Sample {} of {self} has no usable data_row_count.", sample.id());
                    return None;
                }
            }
        }
        estimate
    }

    pub fn rows<T: Transport>(&mut self, repo: &Repository<T>) -> Result<RowStream, GeoError> {
        if self.state < Population::TypeResolved {
            self.resolve_type(repo)?;
        }
        if self.study_type == Some(StudyType::Super) {
            return Err(GeoError::SuperStudyAccess {
                study: self.label(),
                substudies: self.substudies.keys().cloned().collect::<Vec<_>>().join(", "),
            });
        }
        if self.state < Population::Populated {
            warn!("Reading rows of {self} before it was populated; populating now.");
            self.populate(repo)?;
        }
        if let Some(platform) = self.platform.as_mut() {
            platform.load(repo)?;
        }

        let files = self.data_files(repo)?;
        let mut sources = Self::open_files(repo, &files, FetchOptions::default())?;
        for source in &mut sources {
            source.skip_through(SERIES_TABLE_BEGIN)?;
            let titles = source.expect_line("column titles")?;
            if !titles.contains(ID_COLUMN) {
                warn!("Title row of a data file of {self} lacks {ID_COLUMN}.");
            }
        }
        Ok(RowStream::new(
            self.label(),
            sources,
            self.column_titles.len(),
            self.estimated_rows,
        ))
    }

    fn attribute_values(&self, key: &str) -> &[String] {
        self.attributes
            .get(key)
            .map(|values| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn id(&self) -> &SeriesAccession {
        &self.id
    }

    pub fn parent(&self) -> Option<&SeriesAccession> {
        self.parent.as_ref()
    }

    pub fn selected_platform(&self) -> Option<&PlatformAccession> {
        self.selected_platform.as_ref()
    }

    pub fn state(&self) -> Population {
        self.state
    }

    pub fn is_populated(&self) -> bool {
        self.state == Population::Populated
    }

    pub fn study_type(&self) -> Option<StudyType> {
        self.study_type
    }

    pub fn is_pseudo(&self) -> bool {
        self.pseudo
    }

    pub fn attributes(&self) -> &AttrMap {
        &self.attributes
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attribute_values(key).first().map(String::as_str)
    }

    pub fn title(&self) -> Option<&str> {
        self.attribute("title")
    }

    pub fn substudies(&self) -> &BTreeMap<String, Study> {
        &self.substudies
    }

    pub fn substudy_mut(&mut self, label: &str) -> Option<&mut Study> {
        self.substudies.get_mut(label)
    }

    pub fn samples(&self) -> &BTreeMap<String, Sample> {
        &self.samples
    }

    pub fn subject_samples(&self) -> &BTreeMap<String, Vec<String>> {
        &self.subject_samples
    }

    pub fn platform(&self) -> Option<&Platform> {
        self.platform.as_ref()
    }

    pub fn column_titles(&self) -> &[String] {
        &self.column_titles
    }

    pub fn estimated_rows(&self) -> Option<usize> {
        self.estimated_rows
    }
}

// `GPL1` as a whole token, so that it does not match `GPL10`.
fn platform_token(platform: &PlatformAccession) -> Result<Regex, GeoError> {
    Regex::new(&format!(
        r"(?i)(^|[^a-z0-9]){}([^0-9]|$)",
        regex::escape(platform.as_str())
    ))
    .map_err(|err| GeoError::malformed(format!("platform pattern for {platform}: {err}")))
}

impl fmt::Display for Study {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.selected_platform {
            Some(platform) => write!(f, "{}-{}", self.id, platform),
            None => write!(f, "{}", self.id),
        }
    }
}
