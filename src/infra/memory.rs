//! In-memory host adapters.
//!
//! Faithful stand-ins for the three host ports, used by the test suite and by
//! embedders that drive the engine without a real page. Page and proxy state
//! lives behind poison-recovering locks so a panicking test thread cannot
//! wedge the rest of the suite.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_stream::stream;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use futures::stream::BoxStream;
use lol_html::{RewriteStrSettings, doc_text, rewrite_str};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use url::Url;

use crate::application::host::{
    FetchProxy, HostPage, PageError, ProxyError, ScrollTarget, SettingsStore, StoreError,
    ThemeArtifact,
};
use crate::domain::locator::DocumentLocator;
use crate::domain::settings::{SettingChange, SettingValue, SettingsMap};

const SOURCE: &str = "infra::memory";

/// Watch subscribers that fall this many changes behind start dropping.
const WATCH_BUFFER: usize = 64;

fn rw_read<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                lock_kind = "rwlock.read",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned adapter lock"
            );
            poisoned.into_inner()
        }
    }
}

fn rw_write<'a, T>(lock: &'a RwLock<T>, op: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                lock_kind = "rwlock.write",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned adapter lock"
            );
            poisoned.into_inner()
        }
    }
}

fn mutex_lock<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "state may be stale after panic in another thread",
                "Recovered from poisoned adapter lock"
            );
            poisoned.into_inner()
        }
    }
}

/// Key/value settings store held entirely in process memory.
///
/// Writes assign a monotonic epoch and fan the change out to every watch
/// stream. [`close`](Self::close) shuts the store down: watchers drain what
/// was already buffered and then end, which in turn ends a controller run
/// loop subscribed to them.
pub struct MemorySettingsStore {
    values: DashMap<String, SettingValue>,
    watchers: Mutex<Option<broadcast::Sender<SettingChange>>>,
    epoch: AtomicU64,
    offline: AtomicBool,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            values: DashMap::new(),
            watchers: Mutex::new(Some(sender)),
            epoch: AtomicU64::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Write a value, emitting a change event carrying the previous value.
    pub fn set(&self, key: impl Into<String>, value: impl Into<SettingValue>) {
        let key = key.into();
        let value = value.into();
        let old_value = self.values.insert(key.clone(), value.clone());
        self.emit(key, old_value, Some(value));
    }

    /// Delete a key. Emits a change only when the key was present.
    pub fn remove(&self, key: &str) {
        if let Some((key, old_value)) = self.values.remove(key) {
            self.emit(key, Some(old_value), None);
        }
    }

    /// Shut the store down. Watch streams end after draining buffered
    /// changes; subsequent `watch` calls return an already-ended stream.
    pub fn close(&self) {
        mutex_lock(&self.watchers, "close").take();
    }

    /// Make subsequent batched reads fail, simulating a torn-down host store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn emit(
        &self,
        key: String,
        old_value: Option<SettingValue>,
        new_value: Option<SettingValue>,
    ) {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst);
        let change = SettingChange::new(key, old_value, new_value, epoch);
        info!(
            target: "foglio::store",
            change_id = %change.id,
            epoch = change.epoch,
            key = %change.key,
            "setting updated"
        );
        if let Some(sender) = mutex_lock(&self.watchers, "emit").as_ref() {
            // No receivers is fine; the change is simply unobserved.
            let _ = sender.send(change);
        }
    }
}

impl Default for MemorySettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, keys: &[&str]) -> Result<SettingsMap, StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated store outage".to_string()));
        }
        Ok(keys
            .iter()
            .filter_map(|key| {
                self.values
                    .get(*key)
                    .map(|entry| ((*key).to_string(), entry.value().clone()))
            })
            .collect())
    }

    fn watch(&self) -> BoxStream<'static, SettingChange> {
        let mut receiver = match mutex_lock(&self.watchers, "watch").as_ref() {
            Some(sender) => sender.subscribe(),
            None => return futures::stream::empty().boxed(),
        };
        stream! {
            loop {
                match receiver.recv().await {
                    Ok(change) => yield change,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            target: "foglio::store",
                            skipped,
                            "watch subscriber lagged; changes dropped"
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        .boxed()
    }
}

#[derive(Default)]
struct PageState {
    source: String,
    /// Rendered HTML currently on display; `None` while the raw source shows.
    rendered: Option<String>,
    replaced_bodies: Vec<String>,
    restore_count: u64,
    /// Every artifact ever applied, latest last. Display semantics are
    /// last-wins; the history stays around for assertions.
    themes: Vec<ThemeArtifact>,
    math_stylesheets: Vec<String>,
    notices: Vec<String>,
    scrolls: Vec<ScrollTarget>,
}

/// A host page held in process memory.
///
/// Models exactly what the engine can observe of a real page: a source text,
/// a replaceable rendered body, theme and math stylesheet slots, notices,
/// and scroll requests. Inspector methods expose the recorded history.
pub struct MemoryPage {
    locator: DocumentLocator,
    content_type: Option<String>,
    fail_updates: AtomicBool,
    state: RwLock<PageState>,
}

impl MemoryPage {
    pub fn new(locator: DocumentLocator, content_type: Option<&str>, source: &str) -> Self {
        Self {
            locator,
            content_type: content_type.map(str::to_string),
            fail_updates: AtomicBool::new(false),
            state: RwLock::new(PageState {
                source: source.to_string(),
                ..PageState::default()
            }),
        }
    }

    /// Replace the underlying source text (the document changed on disk).
    pub fn set_source(&self, text: &str) {
        rw_write(&self.state, "set_source").source = text.to_string();
    }

    /// Make subsequent page mutations fail, simulating a torn-down page.
    pub fn set_update_failure(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn displayed_body(&self) -> Option<String> {
        rw_read(&self.state, "displayed_body").rendered.clone()
    }

    pub fn replaced_bodies(&self) -> Vec<String> {
        rw_read(&self.state, "replaced_bodies").replaced_bodies.clone()
    }

    pub fn restore_count(&self) -> u64 {
        rw_read(&self.state, "restore_count").restore_count
    }

    pub fn applied_themes(&self) -> Vec<ThemeArtifact> {
        rw_read(&self.state, "applied_themes").themes.clone()
    }

    pub fn current_theme(&self) -> Option<ThemeArtifact> {
        rw_read(&self.state, "current_theme").themes.last().cloned()
    }

    pub fn math_stylesheets(&self) -> Vec<String> {
        rw_read(&self.state, "math_stylesheets").math_stylesheets.clone()
    }

    pub fn notices(&self) -> Vec<String> {
        rw_read(&self.state, "notices").notices.clone()
    }

    pub fn scroll_history(&self) -> Vec<ScrollTarget> {
        rw_read(&self.state, "scroll_history").scrolls.clone()
    }

    fn check_updates(&self) -> Result<(), PageError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(PageError::Update("simulated page failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HostPage for MemoryPage {
    fn location(&self) -> DocumentLocator {
        self.locator.clone()
    }

    fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }

    async fn visible_text(&self) -> Option<String> {
        let state = rw_read(&self.state, "visible_text");
        let text = match &state.rendered {
            Some(html) => extract_text(html),
            None => state.source.clone(),
        };
        if text.trim().is_empty() { None } else { Some(text) }
    }

    async fn replace_body(&self, html: &str) -> Result<(), PageError> {
        self.check_updates()?;
        let mut state = rw_write(&self.state, "replace_body");
        state.rendered = Some(html.to_string());
        state.replaced_bodies.push(html.to_string());
        Ok(())
    }

    async fn restore_source(&self) -> Result<(), PageError> {
        self.check_updates()?;
        let mut state = rw_write(&self.state, "restore_source");
        state.rendered = None;
        state.restore_count += 1;
        Ok(())
    }

    async fn apply_theme(&self, artifact: ThemeArtifact) -> Result<(), PageError> {
        self.check_updates()?;
        rw_write(&self.state, "apply_theme").themes.push(artifact);
        Ok(())
    }

    async fn install_math_stylesheet(&self, href: &str) -> Result<(), PageError> {
        self.check_updates()?;
        rw_write(&self.state, "install_math_stylesheet")
            .math_stylesheets
            .push(href.to_string());
        Ok(())
    }

    async fn fragment_target(&self, fragment: &str) -> ScrollTarget {
        // Attribute scan rather than a DOM query; sufficient for rendered
        // output the engine produced itself.
        let state = rw_read(&self.state, "fragment_target");
        let Some(html) = &state.rendered else {
            return ScrollTarget::Top;
        };
        if html.contains(&format!("id=\"{fragment}\"")) {
            ScrollTarget::Element {
                id: fragment.to_string(),
            }
        } else if html.contains(&format!("name=\"{fragment}\"")) {
            ScrollTarget::Anchor {
                name: fragment.to_string(),
            }
        } else {
            ScrollTarget::Top
        }
    }

    async fn scroll_to(&self, target: ScrollTarget) -> Result<(), PageError> {
        self.check_updates()?;
        rw_write(&self.state, "scroll_to").scrolls.push(target);
        Ok(())
    }

    async fn show_notice(&self, message: &str) -> Result<(), PageError> {
        self.check_updates()?;
        rw_write(&self.state, "show_notice")
            .notices
            .push(message.to_string());
        Ok(())
    }
}

/// Text content of rendered HTML, one line per text node, markup stripped.
fn extract_text(html: &str) -> String {
    let mut out = String::new();
    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            document_content_handlers: vec![doc_text!(|chunk| {
                out.push_str(chunk.as_str());
                if chunk.last_in_text_node() {
                    out.push('\n');
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    );
    if let Err(error) = rewritten {
        warn!(target: "foglio::page", %error, "text extraction failed; using raw markup");
        return html.to_string();
    }
    out.trim_end().to_string()
}

/// Fetch channel backed by scripted responses and a default document.
///
/// Scripted responses are consumed front to back; once the script runs dry,
/// every request serves the default document. With neither configured,
/// requests fail.
pub struct MemoryProxy {
    document: Mutex<Option<String>>,
    script: Mutex<VecDeque<Result<String, ProxyError>>>,
    requests: AtomicU64,
}

impl MemoryProxy {
    pub fn new() -> Self {
        Self {
            document: Mutex::new(None),
            script: Mutex::new(VecDeque::new()),
            requests: AtomicU64::new(0),
        }
    }

    /// A proxy that serves `text` for every request.
    pub fn serving(text: &str) -> Self {
        let proxy = Self::new();
        proxy.set_document(text);
        proxy
    }

    /// Replace the default document (the file changed upstream).
    pub fn set_document(&self, text: &str) {
        *mutex_lock(&self.document, "set_document") = Some(text.to_string());
    }

    /// Queue a one-shot response served before the default document.
    pub fn push_response(&self, response: Result<String, ProxyError>) {
        mutex_lock(&self.script, "push_response").push_back(response);
    }

    /// Number of fetches issued so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Default for MemoryProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchProxy for MemoryProxy {
    async fn fetch_document(&self, _url: &Url) -> Result<String, ProxyError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if let Some(response) = mutex_lock(&self.script, "fetch_document").pop_front() {
            return response;
        }
        mutex_lock(&self.document, "fetch_document")
            .clone()
            .ok_or_else(|| ProxyError::Request("no document configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn locator(url: &str) -> DocumentLocator {
        DocumentLocator::parse(url).expect("valid url")
    }

    #[tokio::test]
    async fn store_roundtrips_batched_reads() {
        let store = MemorySettingsStore::new();
        store.set("theme", "Github");
        store.set("toc", true);

        let map = store.get(&["theme", "toc", "missing"]).await.expect("read");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("theme").and_then(SettingValue::as_bool), None);
        assert_eq!(
            map.get("theme").and_then(SettingValue::as_str),
            Some("Github")
        );
        assert_eq!(map.get("toc").and_then(SettingValue::as_bool), Some(true));
    }

    #[tokio::test]
    async fn watch_delivers_changes_in_epoch_order() {
        let store = MemorySettingsStore::new();
        let mut changes = store.watch();

        store.set("theme", "Github");
        store.set("theme", "Clearness");

        let first = changes.next().await.expect("first change");
        let second = changes.next().await.expect("second change");
        assert_eq!(first.key, "theme");
        assert_eq!(first.old_value, None);
        assert_eq!(first.new_value, Some("Github".into()));
        assert_eq!(second.old_value, Some("Github".into()));
        assert!(first.epoch < second.epoch);
        assert!(!first.id.is_nil());
    }

    #[tokio::test]
    async fn removing_an_absent_key_emits_nothing() {
        let store = MemorySettingsStore::new();
        let mut changes = store.watch();

        store.remove("never-set");
        store.set("toc", true);

        let change = changes.next().await.expect("only the real change");
        assert_eq!(change.key, "toc");
    }

    #[tokio::test]
    async fn closed_store_ends_the_stream() {
        let store = MemorySettingsStore::new();
        let mut changes = store.watch();

        store.set("toc", true);
        store.close();

        assert!(changes.next().await.is_some());
        assert!(changes.next().await.is_none());
        assert!(store.watch().next().await.is_none());
    }

    #[tokio::test]
    async fn offline_store_fails_reads() {
        let store = MemorySettingsStore::new();
        store.set("toc", true);
        store.set_offline(true);

        let err = store.get(&["toc"]).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_offline(false);
        assert_eq!(store.get(&["toc"]).await.expect("back online").len(), 1);
    }

    #[tokio::test]
    async fn page_records_replacements_and_restores() {
        let page = MemoryPage::new(locator("https://example.com/doc.md"), None, "# Hi");

        page.replace_body("<h1>Hi</h1>").await.expect("replace");
        assert_eq!(page.displayed_body().as_deref(), Some("<h1>Hi</h1>"));

        page.restore_source().await.expect("restore");
        assert_eq!(page.displayed_body(), None);
        assert_eq!(page.restore_count(), 1);
        assert_eq!(page.replaced_bodies(), vec!["<h1>Hi</h1>".to_string()]);
    }

    #[tokio::test]
    async fn visible_text_is_source_before_render_and_stripped_markup_after() {
        let page = MemoryPage::new(locator("https://example.com/doc.md"), None, "# Title");
        assert_eq!(page.visible_text().await.as_deref(), Some("# Title"));

        page.replace_body("<h1>Title</h1><p>Body text</p>")
            .await
            .expect("replace");
        let text = page.visible_text().await.expect("text");
        assert!(text.contains("Title"));
        assert!(text.contains("Body text"));
        assert!(!text.contains('<'));
    }

    #[tokio::test]
    async fn blank_page_has_no_visible_text() {
        let page = MemoryPage::new(locator("https://example.com/doc.md"), None, "  \n ");
        assert_eq!(page.visible_text().await, None);
    }

    #[tokio::test]
    async fn fragment_targets_resolve_element_then_anchor_then_top() {
        let page = MemoryPage::new(locator("https://example.com/doc.md#setup"), None, "");
        assert_eq!(page.fragment_target("setup").await, ScrollTarget::Top);

        page.replace_body("<h2 id=\"setup\">Setup</h2><a name=\"legacy\"></a>")
            .await
            .expect("replace");
        assert_eq!(
            page.fragment_target("setup").await,
            ScrollTarget::Element {
                id: "setup".to_string()
            }
        );
        assert_eq!(
            page.fragment_target("legacy").await,
            ScrollTarget::Anchor {
                name: "legacy".to_string()
            }
        );
        assert_eq!(page.fragment_target("absent").await, ScrollTarget::Top);
    }

    #[tokio::test]
    async fn update_failure_switch_fails_mutations_only() {
        let page = MemoryPage::new(locator("https://example.com/doc.md"), None, "# Hi");
        page.set_update_failure(true);

        assert!(page.replace_body("<h1>Hi</h1>").await.is_err());
        assert!(page.show_notice("down").await.is_err());
        assert_eq!(page.visible_text().await.as_deref(), Some("# Hi"));

        page.set_update_failure(false);
        assert!(page.replace_body("<h1>Hi</h1>").await.is_ok());
    }

    #[tokio::test]
    async fn page_recovers_from_poisoned_lock() {
        let page = MemoryPage::new(locator("https://example.com/doc.md"), None, "# Hi");

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = page.state.write().expect("state lock should be acquired");
            panic!("poison state lock");
        }));

        page.replace_body("<h1>Hi</h1>").await.expect("replace");
        assert!(page.displayed_body().is_some());
    }

    #[tokio::test]
    async fn proxy_serves_script_before_default_document() {
        let proxy = MemoryProxy::serving("fresh text");
        proxy.push_response(Err(ProxyError::Request("blip".to_string())));

        let url = Url::parse("https://example.com/doc.md").expect("url");
        assert!(proxy.fetch_document(&url).await.is_err());
        assert_eq!(
            proxy.fetch_document(&url).await.expect("default"),
            "fresh text"
        );
        assert_eq!(proxy.request_count(), 2);
    }

    #[tokio::test]
    async fn bare_proxy_fails_requests() {
        let proxy = MemoryProxy::new();
        let url = Url::parse("https://example.com/doc.md").expect("url");

        let err = proxy.fetch_document(&url).await.unwrap_err();
        assert!(matches!(err, ProxyError::Request(_)));
        assert!(!err.is_unavailable());
    }
}
