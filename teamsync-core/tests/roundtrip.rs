//! Roundtrip serialisation tests for `teamsync-core` types.
//!
//! Each `#[case]` is isolated; no shared state.

use chrono::{TimeZone, Utc};
use rstest::rstest;
use teamsync_core::{
    BaselinePolicy, CheckoutConfig, ConnectionParams, FilePoint, FilePoints, RemoteNode,
    RetryPolicy, ViewSelector,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn params() -> ConnectionParams {
    ConnectionParams {
        host: "scm.example.com".to_string(),
        port: 49201,
        agent_host: Some("cache.example.com".to_string()),
        agent_port: Some(5201),
        user: "builder".to_string(),
        password: Some("s3cr3t".to_string()),
        scheme: "https".to_string(),
        timeout_secs: 10,
        retry: RetryPolicy {
            attempts: 5,
            backoff_ms: 250,
        },
    }
}

fn config_with(selector: ViewSelector) -> CheckoutConfig {
    CheckoutConfig {
        server: params(),
        project: "Payments".to_string(),
        view: "Mainline".to_string(),
        folder: "Payments/src".to_string(),
        subfolder: Some("checkout".to_string()),
        cleanup: true,
        view_selector: selector,
        baseline: BaselinePolicy::FullCheckout,
        state_dir: None,
        changelog_templates: None,
    }
}

// ---------------------------------------------------------------------------
// Parameterised roundtrip test
// ---------------------------------------------------------------------------

#[rstest]
#[case("current", ViewSelector::Current)]
#[case("label", ViewSelector::Label { name: "release-{build}".to_string() })]
#[case("promotion", ViewSelector::PromotionState { name: "QA".to_string() })]
#[case("as_of", ViewSelector::AsOf { time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap() })]
fn config_roundtrip(#[case] label: &str, #[case] selector: ViewSelector) {
    let config = config_with(selector);
    let yaml = serde_yaml::to_string(&config)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: CheckoutConfig = serde_yaml::from_str(&yaml)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(config, back, "[{label}] config");
}

#[rstest]
#[case("empty", vec![])]
#[case("single", vec![FilePoint::new("a.txt", 1, Utc.timestamp_millis_opt(1_000).unwrap(), 5)])]
#[case("unicode", vec![
    FilePoint::new("docs/日本語.md", 3, Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(), 99),
    FilePoint::new("src/проект/main.rs", 12, Utc.timestamp_millis_opt(1_700_000_000_456).unwrap(), 0),
])]
fn file_points_json_roundtrip(#[case] label: &str, #[case] points: Vec<FilePoint>) {
    let collection = FilePoints::from_points(points);
    let json = serde_json::to_string(&collection)
        .unwrap_or_else(|e| panic!("[{label}] serialize failed: {e}"));
    let back: FilePoints = serde_json::from_str(&json)
        .unwrap_or_else(|e| panic!("[{label}] deserialize failed: {e}"));
    assert_eq!(collection, back, "[{label}] points");
}

#[test]
fn remote_tree_json_roundtrip() {
    let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
    let tree = RemoteNode::folder(
        "root",
        vec![
            RemoteNode::file("a.txt", 1, now, 3).with_author("alice", "first"),
            RemoteNode::folder("lib", vec![RemoteNode::file("b.rs", 7, now, 12)]),
        ],
    );
    let json = serde_json::to_string(&tree).expect("serialize");
    let back: RemoteNode = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(tree, back);
    assert_eq!(back.files().len(), 2);
}
