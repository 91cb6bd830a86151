mod common;

use common::{SALES_CSV, TestWorkspace};
use csv_insight::{
    config::ProfilerConfig,
    error::InsightError,
    profile::{self, DType, Grouping, SemanticType},
};
use encoding_rs::{EUC_KR, UTF_8};

#[test]
fn profile_path_reports_every_column() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("sales.csv", SALES_CSV);

    let profile =
        profile::profile_path(&path, None, UTF_8, None, &ProfilerConfig::default()).unwrap();

    assert_eq!(profile.row_count, 10);
    assert_eq!(profile.column_count, 4);
    assert_eq!(
        profile.column_names(),
        vec!["date", "region", "amount", "channel"]
    );
    assert_eq!(profile.source, path.display().to_string());

    let date = profile.column("date").unwrap();
    assert_eq!(date.dtype, DType::String);
    assert_eq!(date.semantic_type, SemanticType::Date);

    let region = profile.column("region").unwrap();
    assert_eq!(region.semantic_type, SemanticType::Category);
    assert_eq!(region.top_values[0].value, "seoul");
    assert_eq!(region.dominant_value_ratio, 0.9);

    let amount = profile.column("amount").unwrap();
    assert_eq!(amount.dtype, DType::Float);
    assert_eq!(amount.semantic_type, SemanticType::Numeric);
    let stats = amount.numeric_stats.as_ref().unwrap();
    assert_eq!(stats.count, 10);
    assert_eq!(stats.min, 95.0);
    assert_eq!(stats.max, 420.0);

    let channel = profile.column("channel").unwrap();
    assert_eq!(channel.missing_count, 4);
    assert_eq!(channel.missing_ratio, 0.4);
}

#[test]
fn missing_and_present_counts_add_up_to_rows() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("sales.csv", SALES_CSV);
    let profile =
        profile::profile_path(&path, None, UTF_8, None, &ProfilerConfig::default()).unwrap();
    for column in &profile.columns {
        assert_eq!(column.row_count(), profile.row_count, "{}", column.name);
        assert!(column.unique_count_estimate <= column.non_missing_count);
        assert!(column.top_values.len() <= 5);
    }
}

#[test]
fn tsv_extension_selects_tab_delimiter() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("points.tsv", "name\tscore\nA\t1\nB\t2\n");
    let profile =
        profile::profile_path(&path, None, UTF_8, None, &ProfilerConfig::default()).unwrap();
    assert_eq!(profile.column_names(), vec!["name", "score"]);
    assert_eq!(profile.column("score").unwrap().dtype, DType::Float);
}

#[test]
fn explicit_delimiter_overrides_extension() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("semi.csv", "a;b\n1;2\n");
    let profile =
        profile::profile_path(&path, Some(b';'), UTF_8, None, &ProfilerConfig::default())
            .unwrap();
    assert_eq!(profile.column_count, 2);
}

#[test]
fn legacy_encoding_is_decoded() {
    let workspace = TestWorkspace::new();
    let (bytes, _, _) = EUC_KR.encode("지역,매출\n서울,10\n부산,20\n");
    let path = workspace.write_bytes("korean.csv", &bytes);

    let profile =
        profile::profile_path(&path, None, EUC_KR, None, &ProfilerConfig::default()).unwrap();
    assert_eq!(profile.column_names(), vec!["지역", "매출"]);
    let values = profile.column("지역").unwrap();
    assert!(values.top_values.iter().any(|t| t.value == "서울"));
}

#[test]
fn grouping_builds_ratio_table() {
    let workspace = TestWorkspace::new();
    let path = workspace.write("sales.csv", SALES_CSV);
    let grouping = Grouping::new("region", "channel");
    let profile = profile::profile_path(
        &path,
        None,
        UTF_8,
        Some(&grouping),
        &ProfilerConfig::default(),
    )
    .unwrap();

    let table = profile.group_target_ratio.unwrap();
    assert_eq!(table.target_column, "channel");
    // busan's only row has a blank channel
    assert!(!table.groups.contains_key("busan"));
    let seoul = &table.groups["seoul"];
    assert_eq!(seoul["web"].count, 4);
    assert_eq!(seoul["store"].count, 2);
    assert!((seoul["web"].ratio - 0.666667).abs() < 1e-9);
}

#[test]
fn fixed_seed_makes_profiles_reproducible() {
    let mut text = String::from("value\n");
    for i in 0..5_000 {
        text.push_str(&format!("{}\n", (i * 7919) % 1013));
    }
    let config = ProfilerConfig {
        outlier_sample_cap: 64,
        seed: Some(7),
        ..ProfilerConfig::default()
    };
    let first = profile::profile_csv_text(&text, "a.csv", None, &config).unwrap();
    let second = profile::profile_csv_text(&text, "a.csv", None, &config).unwrap();
    assert_eq!(first, second);
}

#[test]
fn blank_header_is_empty_input() {
    let err =
        profile::profile_csv_text(" , \n1,2\n", "blank.csv", None, &ProfilerConfig::default())
            .unwrap_err();
    assert!(matches!(err, InsightError::EmptyInput(_)));
}

#[test]
fn missing_file_is_io_error() {
    let workspace = TestWorkspace::new();
    let err = profile::profile_path(
        &workspace.path().join("absent.csv"),
        None,
        UTF_8,
        None,
        &ProfilerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, InsightError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
}

#[test]
fn zero_top_n_is_rejected() {
    let config = ProfilerConfig {
        top_n: 0,
        ..ProfilerConfig::default()
    };
    let err = profile::profile_csv_text("a\n1\n", "a.csv", None, &config).unwrap_err();
    assert!(matches!(err, InsightError::InvalidConfiguration(_)));
}
