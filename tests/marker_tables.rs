// tests/marker_tables.rs

use std::error::Error;
use std::path::Path;

use aslrun::errors::AslrunError;
use aslrun::fs::mock::MockFileSystem;
use aslrun::plan::MarkerTables;
use aslrun::types::PipelineModule;
use semver::Version;

type TestResult = Result<(), Box<dyn Error>>;

fn markers(tables: &MarkerTables, module: PipelineModule, version: Option<&Version>, flair: bool) -> Vec<String> {
    tables
        .select(module, version, flair)
        .entries()
        .iter()
        .map(|e| e.marker.clone())
        .collect()
}

#[test]
fn structural_without_flair_has_six_steps() -> TestResult {
    let tables = MarkerTables::builtin()?;
    let table = tables.select(PipelineModule::Structural, None, false);

    assert_eq!(table.variant(), "current");
    assert_eq!(
        markers(&tables, PipelineModule::Structural, None, false),
        vec![
            "010_LinearReg_T1w2MNI.status",
            "060_Segment_T1w.status",
            "080_Resample2StandardSpace.status",
            "090_GetVolumetrics.status",
            "100_VisualQC_Structural.status",
            "999_ready.status",
        ]
    );
    let weights: Vec<u32> = table.entries().iter().map(|e| e.weight).collect();
    assert_eq!(weights, vec![1, 10, 2, 1, 1, 1]);
    assert_eq!(table.position("080_Resample2StandardSpace.status"), Some(2));
    Ok(())
}

#[test]
fn version_selects_variant() -> TestResult {
    let tables = MarkerTables::builtin()?;

    let legacy = Version::new(0, 9, 8);
    let table = tables.select(PipelineModule::Asl, Some(&legacy), false);
    assert_eq!(table.variant(), "legacy");
    assert!(table.get("010_TopUp.status").is_none());

    let current = Version::new(1, 2, 0);
    assert_eq!(tables.select(PipelineModule::Asl, Some(&current), false).variant(), "current");

    // Legacy pipelines write FLAIR markers even without a FLAIR scan.
    assert!(markers(&tables, PipelineModule::Structural, Some(&legacy), false)
        .contains(&"020_LinearReg_FLAIR2T1w.status".to_string()));
    Ok(())
}

#[test]
fn versions_outside_every_range_use_the_newest_variant() -> TestResult {
    let json = r#"{
        "variants": [
            { "name": "old", "max_version": "1.0.0", "modules": {
                "Population": [{ "marker": "010_A.status", "description": "a", "weight": 1 }] } },
            { "name": "mid", "min_version": "1.0.0", "max_version": "2.0.0", "modules": {
                "Population": [{ "marker": "010_B.status", "description": "b", "weight": 1 }] } }
        ]
    }"#;
    let tables = MarkerTables::from_json(json)?;
    let future = Version::new(3, 0, 0);
    assert_eq!(tables.select(PipelineModule::Population, Some(&future), true).variant(), "mid");
    assert!(tables.select(PipelineModule::Structural, None, true).is_empty());
    Ok(())
}

#[test]
fn describe_and_flair_entries() -> TestResult {
    let tables = MarkerTables::builtin()?;
    let with_flair = tables.select(PipelineModule::Structural, None, true);
    assert_eq!(with_flair.len(), 11);
    assert_eq!(
        with_flair.describe("040_LST_Segment_FLAIR_WMH.status"),
        Some("FLAIR white matter hyperintensity segmentation")
    );
    assert_eq!(with_flair.describe("nope.status"), None);
    Ok(())
}

#[test]
fn invalid_tables_are_rejected() {
    let zero_weight = r#"{ "variants": [ { "name": "z", "modules": {
        "ASL": [{ "marker": "010_X.status", "description": "x", "weight": 0 }] } } ] }"#;
    assert!(matches!(
        MarkerTables::from_json(zero_weight),
        Err(AslrunError::ConfigError(_))
    ));

    assert!(matches!(
        MarkerTables::from_json(r#"{ "variants": [] }"#),
        Err(AslrunError::ConfigError(_))
    ));

    let bad_bound = r#"{ "variants": [ { "name": "b", "min_version": "one", "modules": {} } ] }"#;
    assert!(MarkerTables::from_json(bad_bound).is_err());
}

#[test]
fn custom_tables_load_from_file() -> TestResult {
    let fs = MockFileSystem::new();
    fs.add_file(
        "/etc/aslrun/tables.json",
        r#"{ "variants": [ { "name": "site", "modules": {
            "Population": [{ "marker": "999_ready.status", "description": "done", "weight": 7 }] } } ] }"#,
    );

    let tables = MarkerTables::load(&fs, Some(Path::new("/etc/aslrun/tables.json")))?;
    let table = tables.select(PipelineModule::Population, None, true);
    assert_eq!(table.variant(), "site");
    assert_eq!(table.get("999_ready.status").map(|e| e.weight), Some(7));

    assert!(MarkerTables::load(&fs, Some(Path::new("/missing.json"))).is_err());
    Ok(())
}
