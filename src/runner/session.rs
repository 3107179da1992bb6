//! Test-session facade
//!
//! A [`Session`] owns every collaborator a test step needs: the device, the UI-tree
//! provider, the OCR engine, the reporter, the device profile and the settings. Each
//! public method is one reported step. Create it at suite start and call
//! [`Session::finish`] at the end to restore the input method and write the report.

use crate::driver::android::AdbDevice;
use crate::driver::image_matcher::{MatchConfig, TemplateMatcher};
use crate::driver::ocr::TesseractOcr;
use crate::driver::selector::{Attribute, Selector};
use crate::driver::template::TemplateLibrary;
use crate::driver::traits::{DeviceDriver, Key, TextRecognizer, UiTreeProvider};
use crate::driver::ui_tree::{self, AttrValue, UiTreeSnapshot};
use crate::error::{LocateError, Result};
use crate::geometry::{to_absolute, DeviceProfile, NormPoint, Point, Rect};
use crate::report::{JsonReporter, Reporter, SessionResults};
use crate::runner::capture::{self, OcrOptions};
use crate::runner::dispatcher::{Action, ActionDispatcher, ActionOutcome, ScrollDirection, Target};
use crate::runner::state::SessionState;
use crate::utils::config::Settings;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Session {
    device: Arc<dyn DeviceDriver>,
    tree: Arc<dyn UiTreeProvider>,
    ocr: Arc<dyn TextRecognizer>,
    reporter: Option<Box<dyn Reporter>>,
    profile: DeviceProfile,
    settings: Settings,
    matcher: TemplateMatcher,
    templates: TemplateLibrary,
    /// Snapshot pinned by `freeze`, dropped by the next action
    frozen: Option<UiTreeSnapshot>,
    state: SessionState,
}

impl Session {
    /// Read the device profile and set up the engine
    pub async fn start(
        device: Arc<dyn DeviceDriver>,
        tree: Arc<dyn UiTreeProvider>,
        ocr: Arc<dyn TextRecognizer>,
        settings: Settings,
    ) -> Result<Self> {
        let resolution = device.screen_resolution().await?;
        if resolution.is_empty() {
            return Err(LocateError::device(format!(
                "device reported an empty screen ({})",
                resolution
            )));
        }
        let mut profile = DeviceProfile::new(resolution, device.device_id());
        profile.default_ime = device.default_ime().await?;
        log::info!(
            "Session started on {} ({}), IME {:?}",
            profile.device_id,
            profile.resolution,
            profile.default_ime
        );

        let matcher = TemplateMatcher::new(MatchConfig {
            coarse_width: settings.coarse_width as f32,
            ..MatchConfig::default()
        });
        let templates = TemplateLibrary::new(&settings.image_dir);

        Ok(Self {
            device,
            tree,
            ocr,
            reporter: None,
            profile,
            matcher,
            templates,
            frozen: None,
            state: SessionState::new(&Uuid::new_v4().to_string()),
            settings,
        })
    }

    /// Session on an ADB device with tesseract OCR and a JSON report in `log_dir`
    pub async fn connect_android(serial: Option<&str>, settings: Settings) -> Result<Self> {
        let device = Arc::new(AdbDevice::connect(serial).await?);
        let ocr = TesseractOcr::new().unwrap_or_else(|e| {
            log::warn!("{}; OCR will fall back to 'tesseract' on PATH", e);
            TesseractOcr::with_binary("tesseract")
        });
        let reporter = JsonReporter::in_dir(&settings.log_dir);
        Ok(Self::start(device.clone(), device, Arc::new(ocr), settings)
            .await?
            .with_reporter(Box::new(reporter)))
    }

    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn templates(&self) -> &TemplateLibrary {
        &self.templates
    }

    fn dispatcher(&self) -> ActionDispatcher<'_> {
        ActionDispatcher::new(
            self.device.as_ref(),
            self.tree.as_ref(),
            &self.matcher,
            &self.profile,
            &self.settings,
        )
        .with_frozen(self.frozen.as_ref())
    }

    fn poll_for(&self, timeout: Option<Duration>) -> crate::driver::common::PollOptions {
        let poll = self.settings.find_poll();
        match timeout {
            Some(t) => poll.with_timeout(t),
            None => poll,
        }
    }

    // ------------------------------------------------------------------
    // Step bookkeeping
    // ------------------------------------------------------------------

    fn begin(&mut self, title: String) -> usize {
        log::info!("▶ {}", title);
        self.state.begin(&title)
    }

    fn end<T>(&mut self, index: usize, result: Result<T>) -> Result<T> {
        if let Some(step) = self.state.step_mut(index) {
            match &result {
                Ok(_) => step.pass(),
                Err(e) => {
                    log::info!("✗ {}: {}", step.title, e);
                    step.fail(e.to_string());
                }
            }
            let report = step.to_report();
            if let Some(reporter) = self.reporter.as_mut() {
                reporter.step(&report);
            }
        }
        result
    }

    fn attach(&mut self, path: &std::path::Path) {
        self.state.attach(&path.display().to_string());
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.artifact(path);
        }
    }

    async fn act(&mut self, target: Target, action: Action) -> Result<ActionOutcome> {
        let step = self.begin(format!("{} {}", action.name(), target));
        let poll = self.settings.find_poll();
        let result = self.dispatcher().dispatch(&target, &action, poll).await;
        self.frozen = None;
        self.end(step, result)
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    /// Tap the template `<image_dir>/<page>/<name>.png`
    pub async fn tap_image(&mut self, page: &str, name: &str) -> Result<Point> {
        let template = self.templates.template(page, name)?;
        self.tap(template).await
    }

    pub async fn tap(&mut self, target: impl Into<Target>) -> Result<Point> {
        self.tap_times(target, 1).await
    }

    pub async fn tap_times(&mut self, target: impl Into<Target>, times: u32) -> Result<Point> {
        let outcome = self.act(target.into(), Action::Tap { times }).await?;
        Ok(outcome.at)
    }

    pub async fn double_click(&mut self, target: impl Into<Target>) -> Result<Point> {
        let outcome = self.act(target.into(), Action::DoubleTap).await?;
        Ok(outcome.at)
    }

    pub async fn long_press(
        &mut self,
        target: impl Into<Target>,
        duration: Option<Duration>,
    ) -> Result<Point> {
        let duration = duration.unwrap_or(Duration::from_millis(self.settings.long_press_ms));
        let outcome = self.act(target.into(), Action::LongPress { duration }).await?;
        Ok(outcome.at)
    }

    /// Tap a normalized screen position
    pub async fn click_pos(&mut self, x: f64, y: f64) -> Result<Point> {
        let pos = NormPoint::new(x, y)?;
        self.tap(pos).await
    }

    /// Type into whatever has focus
    pub async fn text(&mut self, text: &str, enter: bool) -> Result<()> {
        let step = self.begin(format!("text {:?}", text));
        let result = async {
            self.device.inject_text(text).await?;
            if enter {
                self.device.inject_key(Key::Enter).await?;
            }
            tokio::time::sleep(self.settings.settle_delay()).await;
            Ok(())
        }
        .await;
        self.frozen = None;
        self.end(step, result)
    }

    /// Tap `target` to focus it, clear it and type; an empty `text` just clears
    pub async fn set_text(
        &mut self,
        target: impl Into<Target>,
        text: &str,
        enter: bool,
    ) -> Result<Point> {
        let action = Action::ReplaceText {
            text: text.to_string(),
            enter,
        };
        let outcome = self.act(target.into(), action).await?;
        Ok(outcome.at)
    }

    /// Swipe from `from` to another target or along a vector of screen percentages
    pub async fn swipe(
        &mut self,
        from: impl Into<Target>,
        to: Option<Target>,
        vector: Option<(f64, f64)>,
        duration: Option<Duration>,
    ) -> Result<ActionOutcome> {
        let duration = duration.unwrap_or(Duration::from_millis(self.settings.swipe_duration_ms));
        self.act(
            from.into(),
            Action::Swipe {
                to,
                vector,
                duration,
            },
        )
        .await
    }

    /// Scroll the whole screen around its centre
    pub async fn scroll(
        &mut self,
        direction: ScrollDirection,
        percent: Option<f64>,
        duration: Option<Duration>,
    ) -> Result<ActionOutcome> {
        let action = Action::Scroll {
            direction,
            percent: percent.unwrap_or(self.settings.scroll_percent),
            duration: duration.unwrap_or(Duration::from_millis(self.settings.scroll_duration_ms)),
        };
        self.act(Target::Position(NormPoint::CENTER), action).await
    }

    // ------------------------------------------------------------------
    // Waits and assertions
    // ------------------------------------------------------------------

    /// Wait for `target`; `ElementNotFound` after the timeout
    pub async fn wait_for(
        &mut self,
        target: impl Into<Target>,
        timeout: Option<Duration>,
    ) -> Result<Point> {
        let target = target.into();
        let step = self.begin(format!("wait_for {}", target));
        let poll = self.poll_for(timeout);
        let result = self
            .dispatcher()
            .locate(&target, poll)
            .await
            .and_then(|found| {
                found.ok_or_else(|| LocateError::ElementNotFound {
                    target: target.to_string(),
                })
            });
        self.end(step, result)
    }

    /// Where `target` is, if it shows up within the short existence timeout
    pub async fn exists(&mut self, target: impl Into<Target>) -> Result<Option<Point>> {
        let target = target.into();
        let step = self.begin(format!("exists {}", target));
        let poll = self.settings.exists_poll();
        let result = self.dispatcher().locate(&target, poll).await;
        self.end(step, result)
    }

    pub async fn assert_exists(&mut self, target: impl Into<Target>, message: &str) -> Result<Point> {
        let target = target.into();
        let step = self.begin(format!("assert_exists {} ({})", target, message));
        let poll = self.settings.find_poll();
        let result = self
            .dispatcher()
            .locate(&target, poll)
            .await
            .and_then(|found| {
                found.ok_or_else(|| LocateError::AssertionFailed {
                    message: format!("{} not on screen: {}", target, message),
                })
            });
        self.end(step, result)
    }

    pub async fn assert_not_exists(&mut self, target: impl Into<Target>, message: &str) -> Result<()> {
        let target = target.into();
        let step = self.begin(format!("assert_not_exists {} ({})", target, message));
        let poll = self.settings.exists_poll();
        let result = match self.dispatcher().locate(&target, poll).await {
            Ok(Some(at)) => Err(LocateError::AssertionFailed {
                message: format!("{} is on screen at {}: {}", target, at, message),
            }),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        self.end(step, result)
    }

    /// First of `targets` to appear
    pub async fn wait_for_any(
        &mut self,
        targets: &[Target],
        timeout: Option<Duration>,
    ) -> Result<(usize, Point)> {
        let names = describe(targets);
        let step = self.begin(format!("wait_for_any [{}]", names));
        let poll = self.poll_for(timeout);
        let result = self
            .dispatcher()
            .wait_for_any(targets, poll)
            .await
            .and_then(|found| found.ok_or(LocateError::ElementNotFound { target: names }));
        self.end(step, result)
    }

    /// Wait until every target is on screen at once
    pub async fn wait_for_all(
        &mut self,
        targets: &[Target],
        timeout: Option<Duration>,
    ) -> Result<Vec<Point>> {
        let names = describe(targets);
        let step = self.begin(format!("wait_for_all [{}]", names));
        let poll = self.poll_for(timeout);
        let result = self
            .dispatcher()
            .wait_for_all(targets, poll)
            .await
            .and_then(|found| found.ok_or(LocateError::ElementNotFound { target: names }));
        self.end(step, result)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Every current occurrence of `target`, without waiting
    pub async fn find_all(&mut self, target: impl Into<Target>) -> Result<Vec<Point>> {
        let target = target.into();
        let step = self.begin(format!("find_all {}", target));
        let result = self.find_all_once(&target).await;
        self.end(step, result)
    }

    async fn find_all_once(&self, target: &Target) -> Result<Vec<Point>> {
        match target {
            Target::Template(template) => {
                let frame = self.device.capture_screen().await?;
                let threshold = template.threshold.unwrap_or(self.settings.threshold);
                Ok(self
                    .matcher
                    .find_all(template, &frame, threshold)?
                    .into_iter()
                    .map(|m| m.point)
                    .collect())
            }
            Target::Selector(selector) => {
                let snapshot = self.current_tree().await?;
                ui_tree::resolve_all(selector, &snapshot)
                    .into_iter()
                    .map(|node| to_absolute(node.pos, &self.profile))
                    .collect()
            }
            other => Ok(self.dispatcher().locate_once(other).await?.into_iter().collect()),
        }
    }

    /// Text of the node a selector designates
    pub async fn get_text(&mut self, selector: &Selector) -> Result<String> {
        let step = self.begin(format!("get_text {}", selector));
        let result = self.require_node(selector).await.map(|node| node.text);
        self.end(step, result)
    }

    /// Any attribute of the node a selector designates, by name
    pub async fn attr(&mut self, selector: &Selector, name: &str) -> Result<AttrValue> {
        let step = self.begin(format!("attr {} {}", selector, name));
        let result = match Attribute::from_name(name) {
            Ok(attribute) => self.require_node(selector).await.map(|node| node.attr(attribute)),
            Err(e) => Err(e),
        };
        self.end(step, result)
    }

    async fn require_node(&self, selector: &Selector) -> Result<ui_tree::UiNode> {
        self.dispatcher()
            .find_node(selector, self.settings.find_poll())
            .await?
            .ok_or_else(|| LocateError::ElementNotFound {
                target: selector.to_string(),
            })
    }

    async fn current_tree(&self) -> Result<std::borrow::Cow<'_, UiTreeSnapshot>> {
        match &self.frozen {
            Some(snapshot) => Ok(std::borrow::Cow::Borrowed(snapshot)),
            None => Ok(std::borrow::Cow::Owned(self.tree.freeze().await?)),
        }
    }

    /// Pin a snapshot for the following lookups; the next action releases it
    pub async fn freeze(&mut self) -> Result<&UiTreeSnapshot> {
        let step = self.begin("freeze".to_string());
        let result = self.tree.freeze().await.map(|snapshot| {
            log::debug!("Frozen {} nodes", snapshot.len());
            self.frozen = Some(snapshot);
        });
        self.end(step, result)?;
        self.frozen
            .as_ref()
            .ok_or_else(|| LocateError::device("frozen snapshot missing"))
    }

    pub fn unfreeze(&mut self) {
        self.frozen = None;
    }

    /// Current hierarchy as a JSON dump
    pub async fn hierarchy(&mut self) -> Result<String> {
        let step = self.begin("hierarchy".to_string());
        let result = match self.current_tree().await {
            Ok(snapshot) => snapshot.to_json(),
            Err(e) => Err(e),
        };
        self.end(step, result)
    }

    // ------------------------------------------------------------------
    // Artifacts
    // ------------------------------------------------------------------

    /// Save the current screen under `log_dir` (`<name>` or `<millis>.jpg`)
    pub async fn capture_screenshot(&mut self, name: Option<&str>) -> Result<PathBuf> {
        let step = self.begin("capture_screenshot".to_string());
        let result = async {
            let frame = capture::snapshot(self.device.as_ref()).await?;
            let path = match name {
                Some(name) => self.settings.log_dir.join(name),
                None => capture::artifact_path(&self.settings.log_dir),
            };
            capture::save_artifact(&frame, &path)
        }
        .await;
        if let Ok(path) = &result {
            self.attach(path);
        }
        self.end(step, result)
    }

    /// Current screen as base64 PNG
    pub async fn screenshot_base64(&mut self) -> Result<String> {
        let frame = capture::snapshot(self.device.as_ref()).await?;
        capture::to_base64_png(&frame)
    }

    /// Crop the current screen to `rect` and save it under `log_dir`
    pub async fn crop_image(&mut self, rect: Rect) -> Result<PathBuf> {
        let step = self.begin(format!(
            "crop_image [{}, {}, {}, {}]",
            rect.x_min, rect.y_min, rect.x_max, rect.y_max
        ));
        let result = self.crop_current(rect).await.and_then(|frame| {
            capture::save_artifact(&frame, &capture::artifact_path(&self.settings.log_dir))
        });
        if let Ok(path) = &result {
            self.attach(path);
        }
        self.end(step, result)
    }

    /// Crop the current screen to `rect` and read its text
    pub async fn crop_and_ocr(&mut self, rect: Rect) -> Result<String> {
        let step = self.begin(format!(
            "crop_and_ocr [{}, {}, {}, {}]",
            rect.x_min, rect.y_min, rect.x_max, rect.y_max
        ));
        let result = match self.crop_current(rect).await {
            Ok(frame) => {
                let path = capture::artifact_path(&self.settings.log_dir);
                match capture::save_artifact(&frame, &path) {
                    Ok(path) => self.attach(&path),
                    Err(e) => log::warn!("Could not keep crop {}: {}", path.display(), e),
                }
                let options = OcrOptions {
                    languages: &self.settings.ocr_languages,
                    engine_config: &self.settings.ocr_config,
                    cutoff: self.settings.ocr_cutoff,
                };
                capture::recognize_text(self.ocr.as_ref(), &frame, &options)
            }
            Err(e) => Err(e),
        };
        self.end(step, result)
    }

    async fn crop_current(&self, rect: Rect) -> Result<crate::driver::image_matcher::Frame> {
        let frame = capture::snapshot(self.device.as_ref()).await?;
        capture::crop(&frame, rect)
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Restore the input method and write the report
    ///
    /// The report is written even when the IME restore fails; that error is returned
    /// afterwards.
    pub async fn finish(mut self) -> Result<SessionResults> {
        let mut restore_error = None;
        if let Some(original) = self.profile.default_ime.clone() {
            match self.device.default_ime().await {
                Ok(Some(current)) if current == original => {}
                _ => {
                    log::info!("Restoring IME {}", original);
                    if let Err(e) = self.device.set_ime(&original).await {
                        log::warn!("Failed to restore IME {}: {}", original, e);
                        restore_error = Some(e);
                    }
                }
            }
        }

        let results = SessionResults {
            session_id: self.state.session_id.clone(),
            device_id: self.profile.device_id.clone(),
            steps: self.state.steps.iter().map(|s| s.to_report()).collect(),
            summary: self.state.summary(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Some(reporter) = self.reporter.as_mut() {
            if let Err(e) = reporter.finish(&results) {
                log::warn!("Failed to write report: {:#}", e);
            }
        }
        log::info!(
            "Session finished: {} passed, {} failed",
            results.summary.passed,
            results.summary.failed
        );
        match restore_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

fn describe(targets: &[Target]) -> String {
    targets
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDevice, FakeOcr, Injected};
    use crate::driver::image_matcher::tests::{paste, pattern, write_template};
    use crate::driver::traits::Touch;
    use crate::driver::ui_tree::tests::sample_tree;
    use crate::geometry::Resolution;
    use crate::runner::state::StepStatus;
    use image::Rgb;
    use std::path::Path;
    use tokio::time::Instant;

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("lumi_{}_{}", tag, Uuid::new_v4()))
    }

    async fn session(device: &FakeDevice, ocr: FakeOcr, dir: &Path) -> Session {
        let mut settings = Settings::default();
        settings.log_dir = dir.join("log");
        settings.image_dir = dir.join("images");
        settings.find_timeout_ms = 2_000;
        Session::start(
            Arc::new(device.clone()),
            Arc::new(device.clone()),
            Arc::new(ocr),
            settings,
        )
        .await
        .unwrap()
        .with_reporter(Box::new(JsonReporter::in_dir(&dir.join("log"))))
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_scenario() {
        let dir = temp_dir("missing");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.push_snapshot(sample_tree());
        let mut s = session(&device, FakeOcr::default(), &dir).await;
        let btn_exit = Selector::new().name("btn_exit");

        let err = s.tap(btn_exit.clone()).await.unwrap_err();
        assert!(matches!(err, LocateError::ElementNotFound { .. }));
        assert_eq!(s.exists(btn_exit.clone()).await.unwrap(), None);
        assert!(s.assert_not_exists(btn_exit, "exit button gone").await.is_ok());

        let results = s.finish().await.unwrap();
        assert_eq!(results.summary.total, 3);
        assert_eq!(results.summary.failed, 1);
        assert!(matches!(results.steps[0].status, StepStatus::Failed { .. }));
        assert!(dir.join("log").join("report.json").is_file());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tap_image_from_library() {
        let dir = temp_dir("library");
        let page = dir.join("images").join("login");
        std::fs::create_dir_all(&page).unwrap();
        pattern(Rgb([255, 255, 255])).save(page.join("ok_button.png")).unwrap();

        let device = FakeDevice::new(Resolution::new(200, 100));
        let mut screen = device.blank();
        paste(&mut screen, &pattern(Rgb([255, 255, 255])), 50, 40);
        device.push_frame(screen);

        let mut s = session(&device, FakeOcr::default(), &dir).await;
        assert_eq!(s.tap_image("login", "ok_button").await.unwrap(), Point::new(60, 45));
        assert!(matches!(
            s.tap_image("login", "missing").await,
            Err(LocateError::Asset { .. })
        ));
        assert_eq!(device.touches(), vec![Touch::Tap(Point::new(60, 45))]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_assert_not_exists_uses_short_timeout() {
        let dir = temp_dir("assert");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.push_snapshot(sample_tree());
        let mut s = session(&device, FakeOcr::default(), &dir).await;

        let start = Instant::now();
        s.assert_not_exists(Selector::new().text("Logout"), "no logout")
            .await
            .unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "{:?}", waited);

        let err = s
            .assert_not_exists(Selector::new().text("我的"), "tab hidden")
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::AssertionFailed { .. }));

        let err = s
            .assert_exists(Selector::new().text("Logout"), "logged in")
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::AssertionFailed { .. }));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_crop_and_ocr() {
        let dir = temp_dir("ocr");
        let device = FakeDevice::new(Resolution::new(200, 100));
        let ocr = FakeOcr::returning("智 学 网\n");
        let mut s = session(&device, ocr.clone(), &dir).await;

        let text = s.crop_and_ocr(Rect::new(10, 10, 110, 60)).await.unwrap();
        assert_eq!(text, "智学网");
        let (img, langs, config) = &ocr.calls()[0];
        assert_eq!(img.dimensions(), (100, 50));
        assert_eq!((langs.as_str(), config.as_str()), ("eng+chi_sim", "--psm 6"));

        let err = s.crop_and_ocr(Rect::new(100, 100, 50, 50)).await.unwrap_err();
        assert!(matches!(err, LocateError::InvalidRect { .. }));

        let path = s.crop_image(Rect::new(0, 0, 20, 20)).await.unwrap();
        assert!(path.is_file());
        assert_eq!(path.parent().unwrap(), dir.join("log"));

        let results = s.finish().await.unwrap();
        assert_eq!(results.steps[0].artifacts.len(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_restores_ime() {
        let dir = temp_dir("ime");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.switch_ime("com.sohu.inputmethod.sogou/.SogouIME");
        let s = session(&device, FakeOcr::default(), &dir).await;
        assert_eq!(
            s.profile().default_ime.as_deref(),
            Some("com.sohu.inputmethod.sogou/.SogouIME")
        );

        device.switch_ime("com.netease.nie.yosemite/.ime.ImeService");
        s.finish().await.unwrap();
        assert_eq!(
            device.injected().last(),
            Some(&Injected::Ime("com.sohu.inputmethod.sogou/.SogouIME".into()))
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_written_when_ime_restore_fails() {
        let dir = temp_dir("ime_fail");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.switch_ime("com.sohu.inputmethod.sogou/.SogouIME");
        let mut s = session(&device, FakeOcr::default(), &dir).await;
        s.click_pos(0.5, 0.5).await.unwrap();

        device.switch_ime("com.netease.nie.yosemite/.ime.ImeService");
        device.fail_set_ime();
        let err = s.finish().await.unwrap_err();
        assert!(matches!(err, LocateError::Device(_)));

        let report = std::fs::read_to_string(dir.join("log").join("report.json")).unwrap();
        let results: SessionResults = serde_json::from_str(&report).unwrap();
        assert_eq!(results.summary.passed, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_text_clears_field_first() {
        let dir = temp_dir("set_text");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.push_snapshot(sample_tree());
        let mut s = session(&device, FakeOcr::default(), &dir).await;
        let login_name = Selector::new().text("我的");

        s.set_text(login_name.clone(), "", false).await.unwrap();
        s.set_text(login_name, "18291900215", false).await.unwrap();

        let tap = Injected::Touch(Touch::Tap(Point::new(150, 95)));
        let clear = vec![
            Injected::Key(Key::MoveEnd),
            Injected::Key(Key::Delete),
            Injected::Key(Key::Delete),
        ];
        let mut expected = vec![tap.clone()];
        expected.extend(clear.clone());
        expected.push(tap);
        expected.extend(clear);
        expected.push(Injected::Text("18291900215".into()));
        assert_eq!(device.injected(), expected);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_text_on_point_uses_clear_budget() {
        let dir = temp_dir("set_text_pt");
        let device = FakeDevice::new(Resolution::new(200, 100));
        let mut s = session(&device, FakeOcr::default(), &dir).await;

        s.set_text(Point::new(20, 30), "abc", true).await.unwrap();
        let keys: Vec<Key> = device
            .injected()
            .into_iter()
            .filter_map(|i| match i {
                Injected::Key(k) => Some(k),
                _ => None,
            })
            .collect();
        assert_eq!(keys.len(), 1 + 32 + 1);
        assert_eq!(keys[0], Key::MoveEnd);
        assert_eq!(keys[33], Key::Enter);
        assert_eq!(device.injected().last(), Some(&Injected::Key(Key::Enter)));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_freeze_released_by_next_action() {
        let dir = temp_dir("freeze");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.push_snapshot(sample_tree());
        let mut s = session(&device, FakeOcr::default(), &dir).await;

        assert_eq!(s.freeze().await.unwrap().len(), 8);
        assert_eq!(s.get_text(&Selector::new().name("item").index(2)).await.unwrap(), "Item 3");
        assert_eq!(
            s.attr(&Selector::new().text("我的"), "clickable").await.unwrap(),
            AttrValue::Flag(false)
        );
        assert!(matches!(
            s.attr(&Selector::new().text("我的"), "colour").await,
            Err(LocateError::InvalidArgument(_))
        ));
        assert_eq!(device.freezes(), 1);

        s.click_pos(0.5, 0.5).await.unwrap();
        let dump = s.hierarchy().await.unwrap();
        assert!(dump.contains("tab_mine"));
        assert_eq!(device.freezes(), 2);

        assert_eq!(
            s.find_all(Selector::new().name("item")).await.unwrap(),
            vec![Point::new(100, 30), Point::new(100, 40), Point::new(100, 50)]
        );
        assert!(matches!(
            s.click_pos(1.5, 0.5).await,
            Err(LocateError::OutOfRange { .. })
        ));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_and_scroll() {
        let dir = temp_dir("text");
        let device = FakeDevice::new(Resolution::new(1000, 2000));
        let mut s = session(&device, FakeOcr::default(), &dir).await;

        s.text("13800000000", true).await.unwrap();
        s.scroll(ScrollDirection::Horizontal, Some(0.5), None).await.unwrap();
        assert_eq!(
            device.injected(),
            vec![
                Injected::Text("13800000000".into()),
                Injected::Key(Key::Enter),
                Injected::Touch(Touch::Swipe {
                    from: Point::new(750, 1000),
                    to: Point::new(250, 1000),
                    duration: Duration::from_secs(2),
                }),
            ]
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_errors_propagate() {
        let dir = temp_dir("deverr");
        let device = FakeDevice::new(Resolution::new(200, 100));
        device.fail_capture();
        let mut s = session(&device, FakeOcr::default(), &dir).await;
        let tpl = write_template(&pattern(Rgb([255, 0, 0])), "x.png");
        let err = s.exists(tpl).await.unwrap_err();
        assert!(err.is_collaborator());
        assert_eq!(device.captures(), 1);
    }
}
