use std::collections::HashSet;
use std::sync::Arc;

use metrics_util::debugging::DebuggingRecorder;

use foglio::application::host::{FetchProxy, HostPage, ProxyError, SettingsStore};
use foglio::application::live::LiveUpdateController;
use foglio::application::theme::ThemeCatalog;
use foglio::config::EngineConfig;
use foglio::domain::locator::DocumentLocator;
use foglio::infra::assets::BundledThemes;
use foglio::infra::memory::{MemoryPage, MemoryProxy, MemorySettingsStore};

#[tokio::test]
async fn engine_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let locator = DocumentLocator::parse("https://example.com/doc.md").expect("document url");
    let page = Arc::new(MemoryPage::new(
        locator,
        Some("text/markdown"),
        "# Doc\n\nBody.\n",
    ));
    let store = Arc::new(MemorySettingsStore::new());
    let proxy = Arc::new(MemoryProxy::serving("# Doc\n\nBody.\n"));

    let mut controller = LiveUpdateController::new(
        Arc::clone(&page) as Arc<dyn HostPage>,
        Arc::clone(&store) as Arc<dyn SettingsStore>,
        Arc::clone(&proxy) as Arc<dyn FetchProxy>,
        Arc::new(BundledThemes::new("assets/themes")) as Arc<dyn ThemeCatalog>,
        None,
        EngineConfig::default(),
    );

    // Initial render: fetch, render, theme application, cycle accounting.
    controller.initialize().await;

    // Unchanged poll, then a changed-source poll.
    controller.poll_once().await;
    proxy.set_document("# Doc v2\n\nBody.\n");
    controller.poll_once().await;

    // Outage poll exercises the fallback fetch path.
    proxy.push_response(Err(ProxyError::Unavailable("bridge gone".to_string())));
    controller.poll_once().await;

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "foglio_fetch_total",
        "foglio_render_ms",
        "foglio_cycle_ms",
        "foglio_cycles_total",
        "foglio_theme_apply_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
