use assert_matches::assert_matches;

use kira_geo_matrix::domain::{
    PlatformAccession, SeriesAccession, SpecialColumn, StudyType, declared_study_type,
};
use kira_geo_matrix::error::GeoError;

#[test]
fn accessions_normalize_case_and_whitespace() {
    let series: SeriesAccession = " gse25935 ".parse().unwrap();
    assert_eq!(series.to_string(), "GSE25935");
    let platform: PlatformAccession = "gpl6480".parse().unwrap();
    assert_eq!(platform.as_str(), "GPL6480");
}

#[test]
fn accessions_need_digits() {
    assert_matches!(
        "GSE".parse::<SeriesAccession>(),
        Err(GeoError::InvalidAccession(_))
    );
    assert_matches!(
        "GSE12a".parse::<SeriesAccession>(),
        Err(GeoError::InvalidAccession(_))
    );
    assert_matches!(
        "GSE12".parse::<PlatformAccession>(),
        Err(GeoError::InvalidAccession(_))
    );
}

#[test]
fn buckets_drop_last_three_digits() {
    let bucket = |id: &str| id.parse::<SeriesAccession>().unwrap().bucket();
    assert_eq!(bucket("GSE1"), "GSEnnn");
    assert_eq!(bucket("GSE999"), "GSEnnn");
    assert_eq!(bucket("GSE1000"), "GSE1nnn");
    assert_eq!(bucket("GSE123456"), "GSE123nnn");
}

#[test]
fn declared_expression_wins_over_genotyping() {
    let declared = vec![
        "SNP genotyping by SNP array".to_string(),
        "Expression profiling by array".to_string(),
    ];
    assert_eq!(declared_study_type(&declared), Some(StudyType::Eqtl));
    assert_eq!(
        declared_study_type(&["Genome variation profiling by SNP array".to_string()]),
        Some(StudyType::Snp)
    );
    assert_eq!(
        declared_study_type(&["Methylation profiling by array".to_string()]),
        None
    );
}

#[test]
fn only_measurable_types_have_keywords() {
    assert!(StudyType::Eqtl.keywords().is_some());
    assert!(StudyType::Snp.keywords().is_some());
    assert!(StudyType::Super.keywords().is_none());
    assert!(StudyType::Other.keywords().is_none());
}

#[test]
fn special_columns_parse_by_name() {
    assert_eq!(
        "entrez_gene_id".parse::<SpecialColumn>().unwrap(),
        SpecialColumn::EntrezGeneId
    );
    assert_eq!(SpecialColumn::Location.to_string(), "LOCATION");
    assert_matches!("SPOT".parse::<SpecialColumn>(), Err(GeoError::ConfigParse(_)));
}

#[test]
fn study_types_serialize_with_display_names() {
    assert_eq!(serde_json::to_string(&StudyType::Eqtl).unwrap(), "\"eQTL\"");
    assert_eq!(StudyType::Super.to_string(), "SUPER");
}
