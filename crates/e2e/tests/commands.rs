//! Leaf and macro commands against a scripted browser

mod common;

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use mapcheck_common::ErrorKind;
use mapcheck_e2e::commands::{
    LayerOrderCommand, LayerOrderOptions, PageLoadCommand, PageLoadOptions, RouteSafetyCommand,
    RouteSafetyOptions, VisualSnapshotCommand, VisualSnapshotOptions,
};
use mapcheck_e2e::context::ENV_UPDATE_BASELINES;
use mapcheck_e2e::{Command, CommandConfig, MacroCommand, PresetParams, PresetRegistry, TestContext};

use common::{console_error, FakeBrowser};

fn context(browser: Arc<FakeBrowser>, dir: &TempDir) -> TestContext {
    TestContext::new("http://map.test", dir.path()).with_browser(browser)
}

fn quiet_page_load(options: PageLoadOptions) -> PageLoadOptions {
    PageLoadOptions {
        console_grace_ms: 0,
        ..options
    }
}

#[tokio::test]
async fn page_load_passes_and_reports_console_errors_as_warnings() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        console: vec![console_error("tile 404")],
        ..Default::default()
    });
    let cmd = PageLoadCommand::new(
        "page-load",
        quiet_page_load(PageLoadOptions {
            expected_title: Some("Map".into()),
            selectors: vec!["#map".into()],
            ..Default::default()
        }),
        CommandConfig::default(),
    );

    let result = cmd.run(&context(browser.clone(), &tmp)).await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.warnings, vec!["Console error: tile 404".to_string()]);
    assert_eq!(result.metadata["url"], "http://map.test/");
    assert_eq!(result.metadata["title"], "City Map");
    assert_eq!(result.metadata["selectorsFound"], json!(["#map"]));
    assert_eq!(browser.listener_count(), 0);
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn page_load_reports_each_missing_selector_and_captures_screenshot() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    let cmd = PageLoadCommand::new(
        "page-load",
        quiet_page_load(PageLoadOptions {
            selectors: vec!["#map".into(), "#legend".into(), "#search".into()],
            ..Default::default()
        }),
        CommandConfig::default(),
    );

    let result = cmd.run(&context(browser, &tmp)).await;

    assert!(!result.success);
    assert_eq!(
        result.errors,
        vec![
            "Selector not found: #legend".to_string(),
            "Selector not found: #search".to_string()
        ]
    );
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(result.artifacts.len(), 1);
    assert!(result.artifacts[0].exists());
}

#[tokio::test]
async fn page_load_fatal_console_errors_fail() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        console: vec![console_error("Uncaught TypeError")],
        ..Default::default()
    });
    let cmd = PageLoadCommand::new(
        "page-load",
        quiet_page_load(PageLoadOptions {
            console_errors_fatal: true,
            ..Default::default()
        }),
        CommandConfig::default(),
    );

    let result = cmd.run(&context(browser.clone(), &tmp)).await;
    assert!(!result.success);
    assert!(result.errors[0].contains("Uncaught TypeError"));
    assert_eq!(browser.listener_count(), 0);
}

#[tokio::test]
async fn page_load_retries_transient_navigation_failures() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    browser
        .flaky_navigations
        .store(2, std::sync::atomic::Ordering::SeqCst);
    let config = CommandConfig {
        retries: 2,
        retry_delay_ms: 1,
        ..Default::default()
    };
    let cmd = PageLoadCommand::new("page-load", quiet_page_load(PageLoadOptions::default()), config);

    let result = cmd.run(&context(browser.clone(), &tmp)).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(browser.navigations.lock().len(), 3);
}

#[tokio::test]
async fn page_load_without_browser_fails_cleanly() {
    let tmp = TempDir::new().unwrap();
    let cmd = PageLoadCommand::new("page-load", PageLoadOptions::default(), CommandConfig::default());
    let result = cmd.run(&TestContext::new("http://map.test", tmp.path())).await;
    assert!(!result.success);
    assert!(result.errors[0].contains("no browser"));
}

#[tokio::test]
async fn layer_order_accepts_variant_names() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    let cmd = LayerOrderCommand::new(
        "hazards-over-routes",
        LayerOrderOptions::new("hazards", "routes"),
        CommandConfig::default(),
    );

    let result = cmd.run(&context(browser, &tmp)).await;
    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.metadata["above"]["layer"], "hazards-optimized");
    assert_eq!(result.metadata["above"]["index"], 2);
    assert_eq!(result.metadata["below"]["index"], 1);
}

#[tokio::test]
async fn layer_order_violation_and_missing_layer() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    let ctx = context(browser, &tmp);

    let inverted = LayerOrderCommand::new(
        "base-over-labels",
        LayerOrderOptions::new("base-tiles", "labels"),
        CommandConfig::default(),
    )
    .run(&ctx)
    .await;
    assert!(!inverted.success);
    assert_eq!(inverted.error_kind, Some(ErrorKind::Other));
    assert!(inverted.errors[0].contains("'base-tiles' (index 0)"));
    assert!(inverted.errors[0].contains("'labels' (index 3)"));

    let missing = LayerOrderCommand::new(
        "traffic",
        LayerOrderOptions::new("traffic", "base-tiles"),
        CommandConfig::default(),
    )
    .run(&ctx)
    .await;
    assert!(!missing.success);
    assert_eq!(missing.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(missing.errors, vec!["Layer not found: traffic".to_string()]);
}

#[tokio::test]
async fn missing_instrumentation_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        instrumented: false,
        ..Default::default()
    });
    let result = LayerOrderCommand::new(
        "layers",
        LayerOrderOptions::new("routes", "base-tiles"),
        CommandConfig::default(),
    )
    .run(&context(browser, &tmp))
    .await;
    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    assert!(result.errors[0].contains("__MAP_TEST__"));
}

#[tokio::test]
async fn route_safety_reads_features_from_instrumentation() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        routes: json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "id": "evac-1", "properties": {},
                  "geometry": { "type": "LineString", "coordinates": [[0.0, 0.5], [3.0, 0.5]] } },
                { "type": "Feature", "properties": { "name": "evac-2" },
                  "geometry": { "type": "LineString", "coordinates": [[0.0, 5.0], [3.0, 5.0]] } }
            ]
        }),
        hazards: json!([
            { "type": "Feature", "id": "flood", "properties": {},
              "geometry": { "type": "Polygon",
                            "coordinates": [[[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0], [1.0, 0.0]]] } }
        ]),
        ..Default::default()
    });

    let result = RouteSafetyCommand::new(
        "route-safety",
        RouteSafetyOptions::default(),
        CommandConfig::default(),
    )
    .run(&context(browser, &tmp))
    .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Security));
    assert_eq!(result.metadata["routeCount"], 2);
    assert_eq!(result.metadata["hazardCount"], 1);
    assert_eq!(
        result.metadata["intersections"],
        json!([{ "route": "evac-1", "hazard": "flood" }])
    );
}

#[tokio::test]
async fn visual_snapshot_seeds_compares_and_detects_changes() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    let cmd = VisualSnapshotCommand::new(
        "snapshot:overview",
        VisualSnapshotOptions::for_preset("overview"),
        CommandConfig::default(),
    );

    // No baseline: passes with a warning
    let ctx = context(browser.clone(), &tmp);
    let first = cmd.run(&ctx).await;
    assert!(first.success, "errors: {:?}", first.errors);
    assert!(first.warnings[0].contains("comparison skipped"));
    assert_eq!(*browser.camera_presets.lock(), vec!["overview".to_string()]);

    // Seed it
    let seeding = context(browser.clone(), &tmp).with_env(ENV_UPDATE_BASELINES, "true");
    let seeded = cmd.run(&seeding).await;
    assert!(seeded.success);
    assert!(tmp.path().join("baselines/overview.png").exists());

    // Same pixels match
    let again = cmd.run(&ctx).await;
    assert!(again.success, "errors: {:?}", again.errors);
    assert!(again.warnings.is_empty());
    assert_eq!(again.metadata["diffPixels"], 0);

    // Different pixels fail with a diff image
    browser.set_color([250, 10, 10, 255]);
    let changed = cmd.run(&ctx).await;
    assert!(!changed.success);
    assert_eq!(changed.error_kind, Some(ErrorKind::Other));
    assert!(changed.errors[0].contains("differs from baseline"));
    assert_eq!(changed.artifacts.len(), 2);
    assert!(changed.artifacts.iter().all(|p| p.exists()));
}

#[tokio::test]
async fn map_core_preset_passes_against_a_well_formed_map() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser::default());
    let mut params = PresetParams::default();
    params.values.insert("selector".into(), "#map".into());

    let tree: MacroCommand = PresetRegistry::with_builtin()
        .build("map-core", &params)
        .unwrap();
    let outcome = tree.run_detailed(&context(browser, &tmp).with_env("failFast", "false")).await;

    assert_eq!(outcome.results.len(), 4);
    assert!(outcome.summary.success, "errors: {:?}", outcome.summary.errors);
    assert_eq!(outcome.summary.metadata["state"], "completed");
}

async fn within_watchdog(
    run: impl std::future::Future<Output = mapcheck_common::TestResult>,
) -> mapcheck_common::TestResult {
    tokio::time::timeout(std::time::Duration::from_secs(3), run)
        .await
        .expect("command outlived its own timeout")
}

#[tokio::test]
async fn page_load_stalled_title_read_times_out() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        stalled_scripts: vec!["document.title".into()],
        ..Default::default()
    });
    let cmd = PageLoadCommand::new(
        "page-load",
        quiet_page_load(PageLoadOptions::default()),
        CommandConfig::default().with_timeout_ms(100),
    );

    let result = within_watchdog(cmd.run(&context(browser.clone(), &tmp))).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.errors[0].contains("Reading page title"));
    assert_eq!(browser.listener_count(), 0);
}

#[tokio::test]
async fn page_load_stalled_screenshot_times_out() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        stall_screenshots: true,
        ..Default::default()
    });
    let cmd = PageLoadCommand::new(
        "page-load",
        quiet_page_load(PageLoadOptions {
            screenshot: true,
            ..Default::default()
        }),
        CommandConfig::default().with_timeout_ms(100),
    );

    let result = within_watchdog(cmd.run(&context(browser, &tmp))).await;

    // The capture is best effort: the load itself passed
    assert!(result.success, "errors: {:?}", result.errors);
    assert!(result.artifacts.is_empty());
}

#[tokio::test]
async fn visual_snapshot_stalled_capture_times_out() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        stall_screenshots: true,
        ..Default::default()
    });
    let cmd = VisualSnapshotCommand::new(
        "snapshot:overview",
        VisualSnapshotOptions::for_preset("overview"),
        CommandConfig::default().with_timeout_ms(100),
    );

    let result = within_watchdog(cmd.run(&context(browser, &tmp))).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.errors[0].contains("Capturing snapshot"));
}

#[tokio::test]
async fn visual_snapshot_stalled_mask_times_out() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        stalled_scripts: vec!["mapcheck-mask".into()],
        ..Default::default()
    });
    let cmd = VisualSnapshotCommand::new(
        "snapshot:overview",
        VisualSnapshotOptions::for_preset("overview"),
        CommandConfig::default().with_timeout_ms(100),
    );

    let result = within_watchdog(cmd.run(&context(browser, &tmp))).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
    assert!(result.errors[0].contains("Updating snapshot mask"));
}

#[tokio::test]
async fn route_safety_accepts_null_properties() {
    let tmp = TempDir::new().unwrap();
    let browser = Arc::new(FakeBrowser {
        routes: json!({
            "type": "FeatureCollection",
            "features": [
                { "type": "Feature", "properties": null,
                  "geometry": { "type": "LineString", "coordinates": [[0.0, 5.0], [3.0, 5.0]] } }
            ]
        }),
        hazards: json!([
            { "type": "Feature", "id": "flood", "properties": null,
              "geometry": { "type": "Polygon",
                            "coordinates": [[[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0], [1.0, 0.0]]] } }
        ]),
        ..Default::default()
    });

    let result = RouteSafetyCommand::new(
        "route-safety",
        RouteSafetyOptions::default(),
        CommandConfig::default(),
    )
    .run(&context(browser, &tmp))
    .await;

    assert!(result.success, "errors: {:?}", result.errors);
    assert_eq!(result.metadata["routeCount"], 1);
    assert_eq!(result.metadata["hazardCount"], 1);
}
