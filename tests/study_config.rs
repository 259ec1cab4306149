// tests/study_config.rs

use std::error::Error;
use std::path::{Path, PathBuf};

use aslrun::config::study::compile_subject_pattern;
use aslrun::config::{load_study_config, ConfigSection};
use aslrun::errors::AslrunError;
use aslrun::fs::mock::MockFileSystem;
use aslrun::types::Scenario;
use aslrun_test_utils::fixtures::mock_study;
use aslrun_test_utils::{init_tracing, DataParBuilder, StudyRowBuilder};

type TestResult = Result<(), Box<dyn Error>>;

fn root() -> PathBuf {
    PathBuf::from("/data/study")
}

#[test]
fn loads_discovered_parameter_file() -> TestResult {
    init_tracing();
    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(&root())
        .exclusion(&["sub-002"])
        .build();
    let source = mock_study(&fs, &root(), &["sub-001", "sub-002"], &data_par);

    let row = StudyRowBuilder::new(root()).build();
    let study = load_study_config(&fs, &row, &ConfigSection::default())?;

    assert_eq!(study.source, source);
    assert_eq!(study.root, root());
    assert_eq!(study.scenario, Scenario::LocalUncompiled);
    assert_eq!(study.pipeline_dir, Path::new("/opt/ExploreASL"));
    assert!(study.is_excluded("sub-002"));
    assert_eq!(study.sessions, vec!["ASL_1".to_string()]);
    Ok(())
}

#[test]
fn root_mismatch_is_a_config_error() {
    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(Path::new("/data/other")).build();
    mock_study(&fs, &root(), &["sub-001"], &data_par);

    let row = StudyRowBuilder::new(root()).build();
    let result = load_study_config(&fs, &row, &ConfigSection::default());

    match result {
        Err(AslrunError::RootMismatch {
            configured,
            supplied,
        }) => {
            assert_eq!(configured, Path::new("/data/other"));
            assert_eq!(supplied, root());
        }
        other => panic!("expected RootMismatch, got {other:?}"),
    }
}

#[test]
fn missing_required_keys_are_reported() {
    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(&root()).remove("subject_regexp").build();
    mock_study(&fs, &root(), &["sub-001"], &data_par);
    let row = StudyRowBuilder::new(root()).build();

    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(matches!(err, AslrunError::StudyConfig { .. }), "{err:?}");
    assert!(err.to_string().contains("subject_regexp"), "{err}");

    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(&root()).remove("MyPath").build();
    mock_study(&fs, &root(), &["sub-001"], &data_par);
    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(err.to_string().contains("MyPath"), "{err}");
}

#[test]
fn compiled_scenario_requires_runtime_path() {
    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(&root())
        .set("EXPLOREASL_TYPE", serde_json::json!("LOCAL_COMPILED"))
        .build();
    mock_study(&fs, &root(), &["sub-001"], &data_par);
    let row = StudyRowBuilder::new(root()).build();

    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(err.to_string().contains("MCRPath"), "{err}");
}

#[test]
fn malformed_json_is_a_study_error() {
    let fs = MockFileSystem::new();
    mock_study(&fs, &root(), &["sub-001"], "{ not json");
    let row = StudyRowBuilder::new(root()).build();

    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(matches!(err, AslrunError::StudyConfig { .. }), "{err:?}");
}

#[test]
fn unknown_keys_are_ignored() -> TestResult {
    let fs = MockFileSystem::new();
    let data_par = DataParBuilder::new(&root())
        .set("Quality", serde_json::json!(1))
        .set("M0", serde_json::json!("separate_scan"))
        .build();
    mock_study(&fs, &root(), &["sub-001"], &data_par);
    let row = StudyRowBuilder::new(root()).build();

    load_study_config(&fs, &row, &ConfigSection::default())?;
    Ok(())
}

#[test]
fn explicit_data_par_must_exist() {
    let fs = MockFileSystem::new();
    fs.add_dir(root());
    let row = StudyRowBuilder::new(root()).data_par("Missing.json").build();

    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(err.to_string().contains("does not exist"), "{err}");
}

#[test]
fn no_parameter_file_found() {
    let fs = MockFileSystem::new();
    fs.add_dir(root());
    fs.add_file(root().join("notes.txt"), "hello");
    let row = StudyRowBuilder::new(root()).build();

    let err = load_study_config(&fs, &row, &ConfigSection::default()).unwrap_err();
    assert!(err.to_string().contains("no parameter file"), "{err}");
}

#[test]
fn subject_pattern_anchors_are_stripped_and_reapplied() -> TestResult {
    let anchored = compile_subject_pattern("^sub-\\d+$")?;
    let bare = compile_subject_pattern("sub-\\d+")?;

    for re in [&anchored, &bare] {
        assert!(re.is_match("sub-001"));
        assert!(!re.is_match("xsub-001"));
        assert!(!re.is_match("sub-001_old"));
    }

    // Alternation must stay grouped under the anchors.
    let alt = compile_subject_pattern("^a|b$")?;
    assert!(alt.is_match("a"));
    assert!(alt.is_match("b"));
    assert!(!alt.is_match("ab"));
    Ok(())
}
