use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::GeoError;

pub type AttrMap = std::collections::BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesAccession(String);

impl SeriesAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bucket(&self) -> String {
        let digits = self.0.trim_start_matches("GSE");
        if digits.len() <= 3 {
            return "GSEnnn".to_string();
        }
        let head = &digits[..digits.len() - 3];
        format!("GSE{}nnn", head)
    }
}

impl fmt::Display for SeriesAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SeriesAccession {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_prefixed(value, "GSE").map(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlatformAccession(String);

impl PlatformAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlatformAccession {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        parse_prefixed(value, "GPL").map(Self)
    }
}

fn parse_prefixed(value: &str, prefix: &str) -> Result<String, GeoError> {
    let normalized = value.trim().to_uppercase();
    let is_valid = normalized
        .strip_prefix(prefix)
        .map(|digits| !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit()))
        .unwrap_or(false);
    if !is_valid {
        return Err(GeoError::InvalidAccession(value.to_string()));
    }
    Ok(normalized)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StudyType {
    #[serde(rename = "eQTL")]
    Eqtl,
    #[serde(rename = "SNP")]
    Snp,
    #[serde(rename = "SUPER")]
    Super,
    #[serde(rename = "OTHER")]
    Other,
}

impl fmt::Display for StudyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StudyType::Eqtl => write!(f, "eQTL"),
            StudyType::Snp => write!(f, "SNP"),
            StudyType::Super => write!(f, "SUPER"),
            StudyType::Other => write!(f, "OTHER"),
        }
    }
}

impl StudyType {
    pub fn keywords(self) -> Option<&'static KeywordTable> {
        match self {
            StudyType::Eqtl => Some(&EQTL_KEYWORDS),
            StudyType::Snp => Some(&SNP_KEYWORDS),
            StudyType::Super | StudyType::Other => None,
        }
    }
}

pub const GUESSABLE_TYPES: [StudyType; 2] = [StudyType::Eqtl, StudyType::Snp];

pub const EQTL_TYPE_LINES: &[&str] = &["Expression profiling by array"];

pub const SNP_TYPE_LINES: &[&str] = &[
    "SNP genotyping by SNP array",
    "Genome variation profiling by SNP array",
];

pub fn declared_study_type(declared: &[String]) -> Option<StudyType> {
    let declares = |lines: &[&str]| declared.iter().any(|value| lines.contains(&value.as_str()));
    if declares(EQTL_TYPE_LINES) {
        Some(StudyType::Eqtl)
    } else if declares(SNP_TYPE_LINES) {
        Some(StudyType::Snp)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SpecialColumn {
    #[serde(rename = "GENE_SYMBOL")]
    GeneSymbol,
    #[serde(rename = "ENTREZ_GENE_ID")]
    EntrezGeneId,
    #[serde(rename = "ENSEMBL_ID")]
    EnsemblId,
    #[serde(rename = "REFSEQ_ACC")]
    RefseqAcc,
    #[serde(rename = "GENBANK_ACC")]
    GenbankAcc,
    #[serde(rename = "SNP_ID")]
    SnpId,
    #[serde(rename = "CHROMOSOME")]
    Chromosome,
    #[serde(rename = "LOCATION")]
    Location,
}

impl SpecialColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            SpecialColumn::GeneSymbol => "GENE_SYMBOL",
            SpecialColumn::EntrezGeneId => "ENTREZ_GENE_ID",
            SpecialColumn::EnsemblId => "ENSEMBL_ID",
            SpecialColumn::RefseqAcc => "REFSEQ_ACC",
            SpecialColumn::GenbankAcc => "GENBANK_ACC",
            SpecialColumn::SnpId => "SNP_ID",
            SpecialColumn::Chromosome => "CHROMOSOME",
            SpecialColumn::Location => "LOCATION",
        }
    }

    pub fn value_pattern(self) -> &'static Regex {
        &VALUE_PATTERNS[self as usize]
    }
}

impl fmt::Display for SpecialColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpecialColumn {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_SPECIAL_COLUMNS
            .iter()
            .copied()
            .find(|column| column.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| GeoError::ConfigParse(format!("unknown special column {value}")))
    }
}

const ALL_SPECIAL_COLUMNS: [SpecialColumn; 8] = [
    SpecialColumn::GeneSymbol,
    SpecialColumn::EntrezGeneId,
    SpecialColumn::EnsemblId,
    SpecialColumn::RefseqAcc,
    SpecialColumn::GenbankAcc,
    SpecialColumn::SnpId,
    SpecialColumn::Chromosome,
    SpecialColumn::Location,
];

// Indexed by `SpecialColumn as usize`.
static VALUE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"^[A-Z][a-zA-Z0-9-]+",
        r"^\d+",
        r"^ENS[A-Z]{1,3}\d{11}",
        r"^[A-Z]{2}_\d+",
        r"^[A-Z]{1,5}[_-]?\d{2,8}",
        r"^(rs|cnvi)?\d+",
        r"^\d{1,2}",
        r"^\d+",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static value pattern"))
    .collect()
});

// Preferred order for expression studies.
pub const GENE_IDENTITY_PREFERENCE: [SpecialColumn; 5] = [
    SpecialColumn::GeneSymbol,
    SpecialColumn::EntrezGeneId,
    SpecialColumn::EnsemblId,
    SpecialColumn::RefseqAcc,
    SpecialColumn::GenbankAcc,
];

#[derive(Debug)]
pub struct KeywordTable {
    pub meta: &'static [&'static str],
    pub columns: &'static [(SpecialColumn, &'static [&'static str])],
}

pub static EQTL_KEYWORDS: KeywordTable = KeywordTable {
    meta: &["expression", "eqtl"],
    columns: &[
        (
            SpecialColumn::GeneSymbol,
            &["gene", "symbol", "sym", "genesym", "genesymbol"],
        ),
        (SpecialColumn::EntrezGeneId, &["entrez", "entrezid"]),
        (SpecialColumn::EnsemblId, &["ensembl", "ensemblid"]),
        (
            SpecialColumn::RefseqAcc,
            &["refseq", "refseqacc", "refseqaccession"],
        ),
        (
            SpecialColumn::GenbankAcc,
            &["gb", "acc", "genbank", "accession", "genbankaccession"],
        ),
    ],
};

pub static SNP_KEYWORDS: KeywordTable = KeywordTable {
    meta: &["snp", "nucleotide"],
    columns: &[
        (SpecialColumn::SnpId, &["snp", "id", "rs", "snpid", "ncbi"]),
        (SpecialColumn::Chromosome, &["chromosome", "chrom", "chr", "ch"]),
        (
            SpecialColumn::Location,
            &[
                "mapinfo", "map", "info", "loci", "locus", "loc", "location", "pos", "position",
            ],
        ),
    ],
};

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn series_bucket() {
        let short: SeriesAccession = "GSE12".parse().unwrap();
        assert_eq!(short.bucket(), "GSEnnn");
        let long: SeriesAccession = "gse25935".parse().unwrap();
        assert_eq!(long.as_str(), "GSE25935");
        assert_eq!(long.bucket(), "GSE25nnn");
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert_matches!(
            "GPL12".parse::<SeriesAccession>(),
            Err(GeoError::InvalidAccession(_))
        );
        assert_matches!(
            "GPL".parse::<PlatformAccession>(),
            Err(GeoError::InvalidAccession(_))
        );
    }

    #[test]
    fn value_patterns_follow_column_order() {
        assert!(SpecialColumn::EnsemblId
            .value_pattern()
            .is_match("ENSG00000139618"));
        assert!(SpecialColumn::RefseqAcc.value_pattern().is_match("NM_000546"));
        assert!(!SpecialColumn::EntrezGeneId.value_pattern().is_match("TP53"));
    }
}
