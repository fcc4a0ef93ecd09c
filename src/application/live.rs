//! The live-update controller: one task owning the whole document lifecycle.
//!
//! The controller decides whether the document is renderable at all, runs the
//! initial render, and then keeps the display current from two inputs: the
//! polling timer (re-fetch and re-render when the source bytes change) and
//! the settings watch stream (re-theme, restart, or retime without a full
//! render, depending on the key). All cycles run on the controller's own
//! task; serialization is structural, so a slow cycle can never be overtaken
//! and overwritten by a later one.

use std::sync::Arc;

use futures::{StreamExt, future};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::domain::locator::{DocumentLocator, is_text_document};
use crate::domain::settings::{
    EligibilitySettings, ReloadSettings, RenderToggles, SettingChange, SettingValue, keys,
    reload_interval,
};

use super::fetch::ContentFetcher;
use super::host::{FetchProxy, HostPage, SettingsStore};
use super::render::{DiagramRenderer, PipelineSettings, RenderPipeline, SyntectHighlighter};
use super::theme::{ThemeCatalog, ThemeResolver};

const METRIC_CYCLE_MS: &str = "foglio_cycle_ms";
const METRIC_CYCLES_TOTAL: &str = "foglio_cycles_total";
const METRIC_THEME_APPLY_TOTAL: &str = "foglio_theme_apply_total";

const UNAVAILABLE_NOTICE: &str =
    "Live updates are unavailable; reload the page to restore them.";

/// Keys read together at startup and on every restart.
const STARTUP_KEYS: [&str; 6] = [
    keys::DISABLE_MARKDOWN,
    keys::EXCLUDE_EXTENSIONS,
    keys::MATH_SUPPORT,
    keys::TOC,
    keys::AUTO_RELOAD,
    keys::RELOAD_FREQ,
];

/// What one render cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New HTML is on the page.
    Rendered,
    /// Source bytes identical to the previous cycle; display untouched.
    Unchanged,
    /// No usable text came back from fetch or fallback.
    NoText,
    /// Render or page update failed; previous display intact.
    Failed,
    /// The document is not eligible; nothing was attempted.
    Inactive,
}

impl CycleOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Rendered => "rendered",
            Self::Unchanged => "unchanged",
            Self::NoText => "no_text",
            Self::Failed => "failed",
            Self::Inactive => "inactive",
        }
    }
}

/// How the caller's polling timer should change after a settings event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerDirective {
    Keep,
    Stop,
    /// (Re)start with the controller's current reload interval.
    Start,
}

/// Snapshot of one successful render, kept for change detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderResult {
    pub html: String,
    pub source_text: String,
    pub cycle: u64,
    pub rendered_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Document ineligible or markdown disabled; raw source on display.
    Inactive,
    /// Document eligible; rendering and polling permitted.
    Active,
}

enum KeyClass {
    Theme,
    Semantics,
    ReloadFreq,
    AutoReload,
    Other,
}

pub struct LiveUpdateController {
    page: Arc<dyn HostPage>,
    store: Arc<dyn SettingsStore>,
    fetcher: ContentFetcher,
    theme: ThemeResolver,
    pipeline: RenderPipeline,
    pipeline_settings: PipelineSettings,
    diagrams: Option<Arc<dyn DiagramRenderer>>,
    locator: DocumentLocator,
    config: EngineConfig,

    phase: Phase,
    cycle: u64,
    last_result: Option<RenderResult>,
    reload: ReloadSettings,
    notice_shown: bool,
}

impl LiveUpdateController {
    pub fn new(
        page: Arc<dyn HostPage>,
        store: Arc<dyn SettingsStore>,
        proxy: Arc<dyn FetchProxy>,
        catalog: Arc<dyn ThemeCatalog>,
        diagrams: Option<Arc<dyn DiagramRenderer>>,
        config: EngineConfig,
    ) -> Self {
        let locator = page.location();
        let fetcher = ContentFetcher::new(proxy, Arc::clone(&page));
        let theme = ThemeResolver::new(
            Arc::clone(&store),
            catalog,
            config.theme.default_theme.clone(),
        );
        let pipeline_settings = PipelineSettings {
            header_prefix: config.render.header_prefix.clone(),
            math_cache_capacity: config.render.math_cache_capacity,
            highlighter: SyntectHighlighter::shared(),
        };
        let pipeline = RenderPipeline::new(pipeline_settings.clone(), diagrams.clone());
        let reload = ReloadSettings {
            auto_reload: true,
            interval: config.reload.default_interval,
        };

        Self {
            page,
            store,
            fetcher,
            theme,
            pipeline,
            pipeline_settings,
            diagrams,
            locator,
            config,
            phase: Phase::Inactive,
            cycle: 0,
            last_result: None,
            reload,
            notice_shown: false,
        }
    }

    /// Drive the controller until the settings stream closes.
    pub async fn run(mut self) {
        let mut changes = self.store.watch();
        self.initialize().await;
        let mut ticker = self.polling_enabled().then(|| self.make_ticker());

        loop {
            tokio::select! {
                maybe_change = changes.next() => match maybe_change {
                    Some(change) => match self.handle_change(&change).await {
                        TimerDirective::Keep => {}
                        TimerDirective::Stop => ticker = None,
                        TimerDirective::Start => ticker = Some(self.make_ticker()),
                    },
                    None => {
                        info!(
                            target: "foglio::live",
                            url = %self.locator.url(),
                            "settings stream closed; controller stopping"
                        );
                        break;
                    }
                },
                _ = tick_next(&mut ticker), if ticker.is_some() => {
                    self.poll_once().await;
                }
            }
        }
    }

    /// Run eligibility and the initial render. Ineligible documents are left
    /// untouched, but the controller stays up so later settings changes can
    /// activate the page.
    pub async fn initialize(&mut self) -> CycleOutcome {
        let map = self.read_settings(&STARTUP_KEYS).await;
        let eligibility = EligibilitySettings::from_map(&map);
        let toggles = RenderToggles::from_map(&map);
        self.reload = ReloadSettings::from_map(&map, self.config.reload.default_interval);

        if eligibility.markdown_disabled {
            info!(
                target: "foglio::live",
                url = %self.locator.url(),
                "markdown rendering disabled; leaving source untouched"
            );
            self.phase = Phase::Inactive;
            return CycleOutcome::Inactive;
        }

        // Math styling is tied to the toggle alone, not to whether this
        // particular document passes the extension gate.
        if toggles.math {
            let href = self.config.render.math_stylesheet_href.clone();
            if let Err(err) = self.page.install_math_stylesheet(&href).await {
                warn!(
                    target: "foglio::live",
                    error = %err,
                    "failed to install math stylesheet"
                );
            }
        }

        if !self.document_eligible(&eligibility) {
            info!(
                target: "foglio::live",
                url = %self.locator.url(),
                extension = self.locator.extension().as_deref().unwrap_or(""),
                "document not eligible for rendering"
            );
            self.phase = Phase::Inactive;
            return CycleOutcome::Inactive;
        }

        self.phase = Phase::Active;
        let outcome = self.render_cycle(&toggles, true).await;
        if outcome == CycleOutcome::Rendered {
            self.spawn_deferred_scroll();
        }
        outcome
    }

    /// One polling tick: re-fetch and re-render if the source changed.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        if self.phase != Phase::Active {
            return CycleOutcome::Inactive;
        }

        let map = self.read_settings(&RenderToggles::KEYS).await;
        let toggles = RenderToggles::from_map(&map);
        self.render_cycle(&toggles, false).await
    }

    /// React to one settings mutation; the return value tells the caller what
    /// to do with its polling timer.
    pub async fn handle_change(&mut self, change: &SettingChange) -> TimerDirective {
        debug!(
            target: "foglio::live",
            key = %change.key,
            epoch = change.epoch,
            change_id = %change.id,
            "settings change observed"
        );

        match self.classify_key(&change.key) {
            KeyClass::Theme => {
                if self.phase == Phase::Active {
                    self.apply_current_theme().await;
                }
                TimerDirective::Keep
            }
            KeyClass::Semantics => {
                self.restart().await;
                if self.polling_enabled() {
                    TimerDirective::Start
                } else {
                    TimerDirective::Stop
                }
            }
            KeyClass::ReloadFreq => {
                self.reload.interval = reload_interval(
                    change.new_value.as_ref(),
                    self.config.reload.default_interval,
                );
                if self.polling_enabled() {
                    info!(
                        target: "foglio::live",
                        interval_secs = self.reload.interval.as_secs_f64(),
                        "polling cadence changed"
                    );
                    TimerDirective::Start
                } else {
                    TimerDirective::Keep
                }
            }
            KeyClass::AutoReload => {
                self.reload.auto_reload = change
                    .new_value
                    .as_ref()
                    .and_then(SettingValue::as_bool)
                    .unwrap_or(true);
                if self.polling_enabled() {
                    info!(target: "foglio::live", "auto reload enabled");
                    TimerDirective::Start
                } else {
                    info!(target: "foglio::live", "auto reload disabled");
                    TimerDirective::Stop
                }
            }
            KeyClass::Other => TimerDirective::Keep,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn current_cycle(&self) -> u64 {
        self.cycle
    }

    pub fn last_result(&self) -> Option<&RenderResult> {
        self.last_result.as_ref()
    }

    pub fn reload_settings(&self) -> ReloadSettings {
        self.reload
    }

    fn polling_enabled(&self) -> bool {
        self.reload.auto_reload && self.phase == Phase::Active
    }

    fn make_ticker(&self) -> Interval {
        // First tick lands one full period out; the initial render already
        // put fresh content on the page.
        let start = tokio::time::Instant::now() + self.reload.interval;
        let mut ticker = tokio::time::interval_at(start, self.reload.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    fn classify_key(&self, key: &str) -> KeyClass {
        if key == keys::THEME
            || key == keys::CUSTOM_CSS_PATHS
            || key == keys::page_theme(self.locator.page_key())
        {
            KeyClass::Theme
        } else if key == keys::TOC || key == keys::DISABLE_MARKDOWN || key == keys::MATH_SUPPORT {
            KeyClass::Semantics
        } else if key == keys::RELOAD_FREQ {
            KeyClass::ReloadFreq
        } else if key == keys::AUTO_RELOAD {
            KeyClass::AutoReload
        } else {
            KeyClass::Other
        }
    }

    fn document_eligible(&self, eligibility: &EligibilitySettings) -> bool {
        if let Some(content_type) = self.page.content_type() {
            if !is_text_document(&content_type) {
                return false;
            }
        }

        match self.locator.extension() {
            // Extensionless documents (raw endpoints, gists) stay eligible.
            None => true,
            Some(extension) => {
                let recognized = self
                    .config
                    .render
                    .recognized_extensions
                    .iter()
                    .any(|candidate| candidate == &extension);
                let excluded = eligibility
                    .excluded_extensions
                    .as_ref()
                    .is_some_and(|set| set.contains(&extension));
                recognized && !excluded
            }
        }
    }

    /// Steps 1–8 of the render cycle. `initial` additionally applies the
    /// theme directive; the deferred fragment scroll is the caller's.
    async fn render_cycle(&mut self, toggles: &RenderToggles, initial: bool) -> CycleOutcome {
        let started_at = std::time::Instant::now();
        self.cycle += 1;
        let cycle = self.cycle;

        let response = self.fetcher.fetch(&self.locator).await;
        if response.proxy_unavailable && !self.notice_shown {
            self.notice_shown = true;
            if let Err(err) = self.page.show_notice(UNAVAILABLE_NOTICE).await {
                warn!(target: "foglio::live", error = %err, "failed to show notice");
            }
        }

        let outcome = self.render_response(response, toggles, initial, cycle).await;

        counter!(METRIC_CYCLES_TOTAL, "outcome" => outcome.label()).increment(1);
        histogram!(METRIC_CYCLE_MS, "outcome" => outcome.label())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        outcome
    }

    async fn render_response(
        &mut self,
        response: super::fetch::FetchResponse,
        toggles: &RenderToggles,
        initial: bool,
        cycle: u64,
    ) -> CycleOutcome {
        let Some(text) = response.usable_text() else {
            warn!(
                target: "foglio::live",
                cycle,
                error = response.error.as_deref().unwrap_or("none"),
                "no usable document text; keeping previous display"
            );
            return CycleOutcome::NoText;
        };

        if self
            .last_result
            .as_ref()
            .is_some_and(|previous| previous.source_text == text)
        {
            debug!(target: "foglio::live", cycle, "source unchanged; skipping render");
            return CycleOutcome::Unchanged;
        }
        let text = text.to_string();

        let document = match self.pipeline.render(&text, toggles) {
            Ok(document) => document,
            Err(err) => {
                error!(
                    target: "foglio::live",
                    cycle,
                    error = %err,
                    "render failed; keeping previous display"
                );
                return CycleOutcome::Failed;
            }
        };

        if initial {
            self.apply_current_theme().await;
        }

        if let Err(err) = self.page.replace_body(&document.html).await {
            error!(
                target: "foglio::live",
                cycle,
                error = %err,
                "body replacement failed"
            );
            return CycleOutcome::Failed;
        }

        info!(
            target: "foglio::live",
            cycle,
            from_fallback = response.from_fallback,
            headings = document.headings.len(),
            bytes = document.html.len(),
            "document updated"
        );

        self.last_result = Some(RenderResult {
            html: document.html,
            source_text: text,
            cycle,
            rendered_at: OffsetDateTime::now_utc(),
        });
        CycleOutcome::Rendered
    }

    async fn apply_current_theme(&self) {
        match self.theme.resolve(&self.locator).await {
            Ok(Some(directive)) => {
                let name = directive.name().unwrap_or("external").to_string();
                if let Err(err) = self.page.apply_theme(directive.artifact()).await {
                    warn!(
                        target: "foglio::live",
                        error = %err,
                        theme = %name,
                        "failed to apply theme"
                    );
                    return;
                }
                counter!(METRIC_THEME_APPLY_TOTAL).increment(1);
                debug!(target: "foglio::live", theme = %name, "theme applied");
            }
            Ok(None) => {
                debug!(target: "foglio::live", "no theme directive; keeping current artifact");
            }
            Err(err) => {
                warn!(target: "foglio::live", error = %err, "theme resolution failed");
            }
        }
    }

    /// Full restart under changed semantics: put the source back, rebuild the
    /// pipeline (converter options are fixed at first use), and run startup
    /// again.
    async fn restart(&mut self) {
        info!(
            target: "foglio::live",
            url = %self.locator.url(),
            "restarting under changed settings"
        );

        if self.phase == Phase::Active {
            if let Err(err) = self.page.restore_source().await {
                warn!(target: "foglio::live", error = %err, "failed to restore source");
            }
        }
        self.phase = Phase::Inactive;
        self.last_result = None;
        self.pipeline = RenderPipeline::new(self.pipeline_settings.clone(), self.diagrams.clone());

        self.initialize().await;
    }

    fn spawn_deferred_scroll(&self) {
        let Some(fragment) = self.locator.fragment().map(str::to_string) else {
            return;
        };
        if fragment.is_empty() {
            return;
        }

        let page = Arc::clone(&self.page);
        let delay = self.config.render.scroll_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let target = page.fragment_target(&fragment).await;
            if let Err(err) = page.scroll_to(target).await {
                warn!(target: "foglio::live", error = %err, "deferred scroll failed");
            }
        });
    }

    async fn read_settings(&self, wanted: &[&str]) -> crate::domain::settings::SettingsMap {
        match self.store.get(wanted).await {
            Ok(map) => map,
            Err(err) => {
                warn!(
                    target: "foglio::live",
                    error = %err,
                    "settings read failed; using defaults"
                );
                crate::domain::settings::SettingsMap::new()
            }
        }
    }
}

async fn tick_next(ticker: &mut Option<Interval>) {
    match ticker.as_mut() {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
