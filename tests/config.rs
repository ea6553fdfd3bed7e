use std::io::Write;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_geo_matrix::config::{Config, ConfigLoader, DEFAULT_PERCENTILE, Endpoints, StudyEntry};
use kira_geo_matrix::domain::{PlatformAccession, SeriesAccession, SpecialColumn};
use kira_geo_matrix::error::GeoError;

fn gse(id: &str) -> SeriesAccession {
    id.parse().unwrap()
}

fn rooted() -> Config {
    Config {
        cache_root: Some(Utf8PathBuf::from("/tmp/kira-gm-cache")),
        scratch_dir: Some(Utf8PathBuf::from("/tmp/kira-gm-scratch")),
        ..Config::default()
    }
}

#[test]
fn defaults_resolve() {
    let settings = ConfigLoader::resolve_config(rooted()).unwrap();
    assert!(settings.use_cache);
    assert!(settings.write_cache);
    assert!(settings.merge_columns);
    assert!(settings.local_root.is_none());
    assert_eq!(settings.percentile, DEFAULT_PERCENTILE);
    assert_eq!(settings.endpoints, Endpoints::default());
}

#[test]
fn builtin_subject_pattern_splits_replicates() {
    let settings = ConfigLoader::resolve_config(rooted()).unwrap();
    let caps = settings
        .subject_pattern(&gse("GSE25935"))
        .captures("liver42_rep2")
        .unwrap();
    assert_eq!(&caps[1], "liver42");
    assert_eq!(caps.get(2).map(|m| m.as_str()), Some("2"));

    let whole = settings
        .subject_pattern(&gse("GSE1"))
        .captures("liver42_rep2")
        .unwrap();
    assert_eq!(&whole[1], "liver42_rep2");
}

#[test]
fn study_and_platform_entries_apply() {
    let mut config = rooted();
    config.studies.insert(
        "gse10".to_string(),
        StudyEntry {
            subject_pattern: Some(r"(\w+)-(\d)".to_string()),
        },
    );
    config.platforms.insert(
        "GPL5".to_string(),
        [("gene_symbol".to_string(), "Symbol".to_string())].into(),
    );

    let settings = ConfigLoader::resolve_config(config).unwrap();
    let caps = settings.subject_pattern(&gse("GSE10")).captures("donor-3").unwrap();
    assert_eq!(&caps[1], "donor");

    let platform: PlatformAccession = "GPL5".parse().unwrap();
    let overrides = settings.column_overrides(&platform).unwrap();
    assert_eq!(overrides[&SpecialColumn::GeneSymbol], "Symbol");
}

#[test]
fn invalid_entries_are_rejected() {
    let mut bad_pattern = rooted();
    bad_pattern.studies.insert(
        "GSE10".to_string(),
        StudyEntry {
            subject_pattern: Some("(unclosed".to_string()),
        },
    );
    assert_matches!(
        ConfigLoader::resolve_config(bad_pattern),
        Err(GeoError::InvalidPattern { .. })
    );

    let bad_percentile = Config {
        percentile: Some(1.5),
        ..rooted()
    };
    assert_matches!(
        ConfigLoader::resolve_config(bad_percentile),
        Err(GeoError::InvalidPercentile(_))
    );

    let mut bad_column = rooted();
    bad_column.platforms.insert(
        "GPL5".to_string(),
        [("SPOT".to_string(), "ID".to_string())].into(),
    );
    assert_matches!(
        ConfigLoader::resolve_config(bad_column),
        Err(GeoError::ConfigParse(_))
    );
}

#[test]
fn reads_json_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "cache_root": "/tmp/kira-gm-cache",
            "scratch_dir": "/tmp/kira-gm-scratch",
            "percentile": 0.5,
            "merge_columns": false,
            "endpoints": {{ "series_base": "https://mirror.example.org/geo/series" }}
        }}"#
    )
    .unwrap();

    let settings = ConfigLoader::resolve(file.path().to_str()).unwrap();
    assert_eq!(settings.percentile, 0.5);
    assert!(!settings.merge_columns);
    assert_eq!(
        settings.endpoints.series_matrix_dir_url(&gse("GSE25935")),
        "https://mirror.example.org/geo/series/GSE25nnn/GSE25935/matrix/"
    );
    assert_eq!(settings.endpoints.query_base, Endpoints::default().query_base);
}

#[test]
fn missing_or_broken_file_is_reported() {
    assert_matches!(
        ConfigLoader::resolve(Some("/nonexistent/kira-gm.json")),
        Err(GeoError::ConfigRead(_))
    );

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    assert_matches!(
        ConfigLoader::resolve(file.path().to_str()),
        Err(GeoError::ConfigParse(_))
    );
}
