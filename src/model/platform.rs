use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::domain::{AttrMap, GUESSABLE_TYPES, PlatformAccession, SpecialColumn, StudyType};
use crate::error::GeoError;
use crate::fetch::FetchOptions;
use crate::model::repository::Repository;
use crate::soft::{PLATFORM_TABLE_BEGIN, PLATFORM_TABLE_END, SoftLines};
use crate::transport::Transport;

// Free-text attributes outweigh single column matches.
const META_WEIGHT: u32 = 6;

static PLATFORM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\^PLATFORM = (\w+)").expect("static platform pattern"));
static COLUMN_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([^=]+?) = ?(.*)").expect("static column pattern"));
static ATTRIBUTE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^!Platform_([^=]+?) = ?(.*)").expect("static attribute pattern")
});
static NON_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z]+").expect("static word separator"));

fn words(text: &str) -> Vec<String> {
    NON_LETTERS
        .split(&text.to_lowercase())
        .filter(|word| !word.is_empty())
        .map(|word| word.to_string())
        .collect()
}

pub fn keyword_score(title: &str, description: &str, keywords: &[&str]) -> u32 {
    let title_words = words(title);
    let description_words = words(description);
    keywords
        .iter()
        .map(|keyword| {
            let in_title = title_words.iter().any(|word| word == keyword);
            let in_description = description_words.iter().any(|word| word == keyword);
            2 * u32::from(in_title) + u32::from(in_description)
        })
        .sum()
}

#[derive(Debug, Clone)]
pub struct Platform {
    id: PlatformAccession,
    study_type: StudyType,
    attributes: AttrMap,
    column_titles: Vec<String>,
    column_descriptions: Vec<(String, String)>,
    special_columns: BTreeMap<SpecialColumn, Option<String>>,
    rows: HashMap<String, HashMap<String, String>>,
    folded_ids: HashMap<String, String>,
    loaded: bool,
}

impl Platform {
    pub fn populate<T: Transport>(
        repo: &Repository<T>,
        id: PlatformAccession,
        declared: Option<StudyType>,
    ) -> Result<Self, GeoError> {
        let url = repo.settings().endpoints.platform_brief_url(&id);
        let mut lines = repo.open_lines(&url, FetchOptions::default())?;
        let overrides = repo.settings().column_overrides(&id).cloned();
        let platform = Self::from_brief(id, &mut lines, declared, overrides.as_ref())?;
        lines.close()?;
        Ok(platform)
    }

    pub fn from_brief<R: Read>(
        id: PlatformAccession,
        lines: &mut SoftLines<R>,
        declared: Option<StudyType>,
        overrides: Option<&BTreeMap<SpecialColumn, String>>,
    ) -> Result<Self, GeoError> {
        let mut platform = Platform {
            id,
            study_type: StudyType::Other,
            attributes: AttrMap::new(),
            column_titles: Vec::new(),
            column_descriptions: Vec::new(),
            special_columns: BTreeMap::new(),
            rows: HashMap::new(),
            folded_ids: HashMap::new(),
            loaded: false,
        };
        platform.parse_header(lines)?;
        let title_line = lines.expect_line("platform column titles")?;
        platform.column_titles = title_line
            .split('\t')
            .map(|title| title.trim().to_string())
            .collect();
        if platform.column_titles.len() != platform.column_descriptions.len() {
            warn!(
                "Platform {} declares {} column descriptions but {} column titles.",
                platform.id,
                platform.column_descriptions.len(),
                platform.column_titles.len()
            );
        }

        platform.study_type = match declared {
            Some(study_type) => {
                if study_type.keywords().is_some() && platform.column_descriptions.len() >= 2 {
                    let guessed = platform.guess_type()?;
                    if guessed != study_type {
                        warn!(
                            "Platform {} looks like {guessed} but its study declares {study_type}.",
                            platform.id
                        );
                    }
                }
                study_type
            }
            None => platform.guess_type()?,
        };
        platform.resolve_special_columns(overrides)?;
        info!(
            "Platform {} populated as {} with {} columns.",
            platform.id,
            platform.study_type,
            platform.column_titles.len()
        );
        Ok(platform)
    }

    fn parse_header<R: Read>(&mut self, lines: &mut SoftLines<R>) -> Result<(), GeoError> {
        let first = lines.expect_line("^PLATFORM line")?;
        let Some(caps) = PLATFORM_LINE.captures(first.trim()) else {
            return Err(GeoError::malformed(format!(
                "expected ^PLATFORM line for {}, got '{first}'",
                self.id
            )));
        };
        if !caps[1].eq_ignore_ascii_case(self.id.as_str()) {
            return Err(GeoError::malformed(format!(
                "expected platform {}, document describes {}",
                self.id, &caps[1]
            )));
        }

        loop {
            let Some(line) = lines.next_line()? else {
                return Err(GeoError::malformed(format!(
                    "platform {} ended before {PLATFORM_TABLE_BEGIN}",
                    self.id
                )));
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == PLATFORM_TABLE_BEGIN {
                return Ok(());
            }
            if let Some(caps) = COLUMN_LINE.captures(line) {
                let title = caps[1].trim().to_string();
                if !self.column_descriptions.iter().any(|(known, _)| *known == title) {
                    self.column_descriptions.push((title, caps[2].trim().to_string()));
                }
            } else if let Some(caps) = ATTRIBUTE_LINE.captures(line) {
                let values = self.attributes.entry(caps[1].trim().to_string()).or_default();
                let value = caps[2].trim().to_string();
                if !values.contains(&value) {
                    values.push(value);
                }
            } else {
                return Err(GeoError::malformed(format!(
                    "unexpected line in platform {}: '{line}'",
                    self.id
                )));
            }
        }
    }

    // First type in GUESSABLE_TYPES wins ties.
    pub fn guess_type(&self) -> Result<StudyType, GeoError> {
        if self.column_descriptions.len() < 2 {
            return Err(GeoError::NotPopulated(format!(
                "platform {} has no column descriptions to guess a type from",
                self.id
            )));
        }

        let mut best: Option<(StudyType, u32)> = None;
        for study_type in GUESSABLE_TYPES {
            let Some(table) = study_type.keywords() else {
                continue;
            };
            let mut score = 0;
            for (title, description) in &self.column_descriptions {
                score += keyword_score(title, description, table.meta);
                for (_, keywords) in table.columns {
                    score += keyword_score(title, description, keywords);
                }
            }
            for (key, values) in &self.attributes {
                score += META_WEIGHT * keyword_score(key, &values.join(" "), table.meta);
            }
            debug!("Platform {} scores {score} as {study_type}.", self.id);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((study_type, score));
            }
        }

        let (study_type, score) = best.unwrap_or((StudyType::Other, 0));
        info!("Guessed platform {} to be {study_type} (score {score}).", self.id);
        Ok(study_type)
    }

    fn resolve_special_columns(
        &mut self,
        overrides: Option<&BTreeMap<SpecialColumn, String>>,
    ) -> Result<(), GeoError> {
        let Some(table) = self.study_type.keywords() else {
            return Ok(());
        };
        for (column, _) in table.columns {
            let title = match overrides.and_then(|map| map.get(column)) {
                Some(title) => {
                    if !self.column_titles.iter().any(|known| known == title) {
                        return Err(GeoError::malformed(format!(
                            "override {column} = {title} names no column of platform {}",
                            self.id
                        )));
                    }
                    Some(title.clone())
                }
                None => self.find_column(*column),
            };
            self.special_columns.insert(*column, title);
        }
        Ok(())
    }

    pub fn find_column(&self, column: SpecialColumn) -> Option<String> {
        let keywords = self
            .study_type
            .keywords()
            .and_then(|table| table.columns.iter().find(|(known, _)| *known == column))
            .map(|(_, keywords)| *keywords)?;

        let mut best: Option<(&str, u32)> = None;
        for (title, description) in &self.column_descriptions {
            let score = keyword_score(title, description, keywords);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((title, score));
            }
        }
        match best {
            Some((title, score)) if score > 1 => {
                debug!("Column {column} of platform {} is '{title}'.", self.id);
                Some(title.to_string())
            }
            _ => {
                warn!("Could not find column {column} in platform {}.", self.id);
                None
            }
        }
    }

    pub fn load<T: Transport>(&mut self, repo: &Repository<T>) -> Result<(), GeoError> {
        if self.loaded {
            debug!("Platform {} already loaded.", self.id);
            return Ok(());
        }
        let url = repo.settings().endpoints.platform_data_url(&self.id);
        let mut lines = repo.open_lines(&url, FetchOptions::default())?;
        self.load_rows(&mut lines)?;
        lines.close()
    }

    pub fn load_rows<R: Read>(&mut self, lines: &mut SoftLines<R>) -> Result<(), GeoError> {
        self.parse_header(lines)?;
        let title_line = lines.expect_line("platform column titles")?;
        self.column_titles = title_line
            .split('\t')
            .map(|title| title.trim().to_string())
            .collect();

        let mut ended = false;
        while let Some(line) = lines.next_line()? {
            if line.trim() == PLATFORM_TABLE_END {
                ended = true;
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            let mut fields = line.split('\t');
            let Some(row_id) = fields.next().map(str::trim) else {
                continue;
            };
            let mut description = HashMap::new();
            for (title, value) in self.column_titles.iter().skip(1).zip(fields) {
                let value = value.trim();
                if !value.is_empty() {
                    description.insert(title.clone(), value.to_string());
                }
            }
            if let Some(previous) = self
                .folded_ids
                .insert(row_id.to_lowercase(), row_id.to_string())
                .filter(|previous| previous != row_id)
            {
                warn!(
                    "Platform {} rows '{previous}' and '{row_id}' differ only in case.",
                    self.id
                );
            }
            self.rows.insert(row_id.to_string(), description);
        }
        if !ended {
            warn!(
                "Platform {} data ended without {PLATFORM_TABLE_END}.",
                self.id
            );
        }
        self.loaded = true;
        info!("Loaded {} row descriptions for platform {}.", self.rows.len(), self.id);
        Ok(())
    }

    pub fn lookup(&self, row_id: &str, column: SpecialColumn) -> Result<Option<&str>, GeoError> {
        if !self.loaded {
            return Err(GeoError::NotPopulated(format!(
                "row descriptions of platform {} are not loaded",
                self.id
            )));
        }
        let Some(title) = self.special_columns.get(&column) else {
            return Err(GeoError::malformed(format!(
                "column {column} is not defined for {} platform {}",
                self.study_type, self.id
            )));
        };
        let Some(title) = title else {
            return Ok(None);
        };
        let row = self.rows.get(row_id).or_else(|| {
            self.folded_ids
                .get(&row_id.to_lowercase())
                .and_then(|id| self.rows.get(id))
        });
        Ok(row.and_then(|row| row.get(title)).map(|value| value.as_str()))
    }

    pub fn validate_value(column: SpecialColumn, value: &str) -> bool {
        column.value_pattern().is_match(value)
    }

    pub fn id(&self) -> &PlatformAccession {
        &self.id
    }

    pub fn study_type(&self) -> StudyType {
        self.study_type
    }

    pub fn attributes(&self) -> &AttrMap {
        &self.attributes
    }

    pub fn column_titles(&self) -> &[String] {
        &self.column_titles
    }

    pub fn column_descriptions(&self) -> &[(String, String)] {
        &self.column_descriptions
    }

    pub fn special_column(&self, column: SpecialColumn) -> Option<&str> {
        self.special_columns
            .get(&column)
            .and_then(|title| title.as_deref())
    }

    pub fn special_columns(&self) -> &BTreeMap<SpecialColumn, Option<String>> {
        &self.special_columns
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}
