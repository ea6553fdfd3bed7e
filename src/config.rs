use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{PlatformAccession, SeriesAccession, SpecialColumn};
use crate::error::GeoError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-gm.json";
pub const DEFAULT_PERCENTILE: f64 = 0.75;
// Whole title is the subject.
pub const DEFAULT_SUBJECT_PATTERN: &str = "(.*)()";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub scratch_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub local_root: Option<Utf8PathBuf>,
    #[serde(default)]
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub write_cache: Option<bool>,
    #[serde(default)]
    pub report_progress: Option<bool>,
    #[serde(default)]
    pub merge_columns: Option<bool>,
    #[serde(default)]
    pub percentile: Option<f64>,
    #[serde(default)]
    pub endpoints: Option<Endpoints>,
    #[serde(default)]
    pub studies: BTreeMap<String, StudyEntry>,
    #[serde(default)]
    pub platforms: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StudyEntry {
    #[serde(default)]
    pub subject_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Endpoints {
    #[serde(default = "default_query_base")]
    pub query_base: String,
    #[serde(default = "default_series_base")]
    pub series_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            query_base: default_query_base(),
            series_base: default_series_base(),
        }
    }
}

impl Endpoints {
    pub fn series_brief_url(&self, id: &SeriesAccession) -> String {
        format!(
            "{}?acc={}&targ=self&view=brief&form=text",
            self.query_base,
            id.as_str()
        )
    }

    pub fn series_matrix_dir_url(&self, id: &SeriesAccession) -> String {
        format!(
            "{}/{}/{}/matrix/",
            self.series_base.trim_end_matches('/'),
            id.bucket(),
            id.as_str()
        )
    }

    pub fn platform_brief_url(&self, id: &PlatformAccession) -> String {
        format!(
            "{}?acc={}&targ=self&view=quick&form=text",
            self.query_base,
            id.as_str()
        )
    }

    pub fn platform_data_url(&self, id: &PlatformAccession) -> String {
        format!(
            "{}?acc={}&targ=gpl&view=data&form=text",
            self.query_base,
            id.as_str()
        )
    }
}

fn default_query_base() -> String {
    "https://www.ncbi.nlm.nih.gov/geo/query/acc.cgi".to_string()
}

fn default_series_base() -> String {
    "https://ftp.ncbi.nlm.nih.gov/geo/series".to_string()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_root: Utf8PathBuf,
    pub scratch_dir: Utf8PathBuf,
    pub local_root: Option<Utf8PathBuf>,
    pub use_cache: bool,
    pub write_cache: bool,
    pub report_progress: bool,
    pub merge_columns: bool,
    pub percentile: f64,
    pub endpoints: Endpoints,
    subject_patterns: HashMap<String, Regex>,
    default_subject_pattern: Regex,
    column_overrides: HashMap<String, BTreeMap<SpecialColumn, String>>,
}

impl Settings {
    pub fn with_roots(cache_root: Utf8PathBuf, scratch_dir: Utf8PathBuf) -> Self {
        let config = Config {
            cache_root: Some(cache_root),
            scratch_dir: Some(scratch_dir),
            ..Config::default()
        };
        match ConfigLoader::resolve_config(config) {
            Ok(settings) => settings,
            Err(err) => unreachable!("built-in settings failed to resolve: {err}"),
        }
    }

    pub fn subject_pattern(&self, id: &SeriesAccession) -> &Regex {
        self.subject_patterns
            .get(id.as_str())
            .unwrap_or(&self.default_subject_pattern)
    }

    pub fn set_subject_pattern(
        &mut self,
        id: &SeriesAccession,
        pattern: &str,
    ) -> Result<(), GeoError> {
        let regex = compile_subject_pattern(id.as_str(), pattern)?;
        self.subject_patterns.insert(id.as_str().to_string(), regex);
        Ok(())
    }

    pub fn column_overrides(&self, id: &PlatformAccession) -> Option<&BTreeMap<SpecialColumn, String>> {
        self.column_overrides.get(id.as_str())
    }

    pub fn set_column_override(&mut self, id: &PlatformAccession, column: SpecialColumn, title: &str) {
        self.column_overrides
            .entry(id.as_str().to_string())
            .or_default()
            .insert(column, title.to_string());
    }

    pub fn set_percentile(&mut self, percentile: f64) -> Result<(), GeoError> {
        self.percentile = validate_percentile(percentile)?;
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, GeoError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GeoError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GeoError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<Settings, GeoError> {
        let cache_root = match config.cache_root {
            Some(root) => root,
            None => default_cache_root()?,
        };
        let scratch_dir = match config.scratch_dir {
            Some(dir) => dir,
            None => Utf8PathBuf::from_path_buf(std::env::temp_dir()).map_err(|_| {
                GeoError::ConfigParse("system temp directory is not valid UTF-8".to_string())
            })?,
        };
        let percentile = validate_percentile(config.percentile.unwrap_or(DEFAULT_PERCENTILE))?;

        let mut subject_patterns = HashMap::new();
        for (id, pattern) in builtin_subject_patterns() {
            subject_patterns.insert(id.to_string(), compile_subject_pattern(id, pattern)?);
        }
        for (id, entry) in &config.studies {
            let id: SeriesAccession = id.parse()?;
            if let Some(pattern) = &entry.subject_pattern {
                subject_patterns.insert(
                    id.as_str().to_string(),
                    compile_subject_pattern(id.as_str(), pattern)?,
                );
            }
        }

        let mut column_overrides = HashMap::new();
        for (id, columns) in config.platforms {
            let id: PlatformAccession = id.parse()?;
            let columns = columns
                .into_iter()
                .map(|(name, title)| Ok((name.parse::<SpecialColumn>()?, title)))
                .collect::<Result<BTreeMap<_, _>, GeoError>>()?;
            column_overrides.insert(id.as_str().to_string(), columns);
        }

        Ok(Settings {
            cache_root,
            scratch_dir,
            local_root: config.local_root,
            use_cache: config.use_cache.unwrap_or(true),
            write_cache: config.write_cache.unwrap_or(true),
            report_progress: config.report_progress.unwrap_or(true),
            merge_columns: config.merge_columns.unwrap_or(true),
            percentile,
            endpoints: config.endpoints.unwrap_or_default(),
            subject_patterns,
            default_subject_pattern: compile_subject_pattern("default", DEFAULT_SUBJECT_PATTERN)?,
            column_overrides,
        })
    }
}

pub fn builtin_subject_patterns() -> Vec<(&'static str, &'static str)> {
    vec![("GSE25935", r"([^_]+)(?:_rep(\d+))?")]
}

fn compile_subject_pattern(study: &str, pattern: &str) -> Result<Regex, GeoError> {
    // Anchored at the start only, like a prefix match.
    Regex::new(&format!("^(?:{pattern})")).map_err(|err| GeoError::InvalidPattern {
        study: study.to_string(),
        message: err.to_string(),
    })
}

pub fn validate_percentile(percentile: f64) -> Result<f64, GeoError> {
    if percentile > 0.0 && percentile <= 1.0 {
        Ok(percentile)
    } else {
        Err(GeoError::InvalidPercentile(percentile))
    }
}

fn default_cache_root() -> Result<Utf8PathBuf, GeoError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-geo-matrix")).ok()
        })
        .ok_or_else(|| GeoError::ConfigParse("unable to resolve cache directory".to_string()))
}
