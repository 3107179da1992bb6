//! Target resolution and action dispatch
//!
//! A [`Target`] says how to find something (template, selector, absolute point or
//! screen percentage); an [`Action`] says what to do once it is found. Resolution is
//! wrapped in the bounded poller, so actions wait for their target to show up and fail
//! with `ElementNotFound` only after the timeout.

use crate::driver::common::{wait_until, PollOptions};
use crate::driver::image_matcher::{MatchResult, TemplateMatcher};
use crate::driver::selector::Selector;
use crate::driver::template::Template;
use crate::driver::traits::{DeviceDriver, Key, Touch, UiTreeProvider};
use crate::driver::ui_tree::{self, UiNode, UiTreeSnapshot};
use crate::error::{LocateError, Result};
use crate::geometry::{to_absolute, DeviceProfile, NormPoint, Point};
use crate::utils::config::Settings;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

/// What to act on
#[derive(Debug, Clone)]
pub enum Target {
    Template(Template),
    Selector(Selector),
    /// Absolute screen pixels
    Point(Point),
    /// Screen percentages
    Position(NormPoint),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Template(t) => write!(f, "{}", t),
            Target::Selector(s) => write!(f, "{}", s),
            Target::Point(p) => write!(f, "Point{}", p),
            Target::Position(n) => write!(f, "Position{}", n),
        }
    }
}

impl From<Template> for Target {
    fn from(t: Template) -> Self {
        Target::Template(t)
    }
}

impl From<Selector> for Target {
    fn from(s: Selector) -> Self {
        Target::Selector(s)
    }
}

impl From<Point> for Target {
    fn from(p: Point) -> Self {
        Target::Point(p)
    }
}

impl From<NormPoint> for Target {
    fn from(n: NormPoint) -> Self {
        Target::Position(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Vertical,
    Horizontal,
}

impl ScrollDirection {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vertical" | "v" => Ok(ScrollDirection::Vertical),
            "horizontal" | "h" => Ok(ScrollDirection::Horizontal),
            other => Err(LocateError::invalid(format!(
                "scroll direction must be vertical or horizontal, got '{}'",
                other
            ))),
        }
    }
}

/// What to do at the resolved target
#[derive(Debug, Clone)]
pub enum Action {
    Tap {
        times: u32,
    },
    DoubleTap,
    LongPress {
        duration: Duration,
    },
    /// Swipe from the target to `to`, or along `vector` (screen percentages)
    Swipe {
        to: Option<Target>,
        vector: Option<(f64, f64)>,
        duration: Duration,
    },
    /// Tap to focus, type, optionally press Enter
    InputText {
        text: String,
        enter: bool,
    },
    /// Like `InputText`, but delete the field's current content before typing
    ReplaceText {
        text: String,
        enter: bool,
    },
    /// Drag across `percent` of the screen centred on the target; vertical scrolls
    /// move the finger upwards
    Scroll {
        direction: ScrollDirection,
        percent: f64,
        duration: Duration,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Tap { .. } => "tap",
            Action::DoubleTap => "double_tap",
            Action::LongPress { .. } => "long_press",
            Action::Swipe { .. } => "swipe",
            Action::InputText { .. } => "input_text",
            Action::ReplaceText { .. } => "replace_text",
            Action::Scroll { .. } => "scroll",
        }
    }
}

/// Where an action happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionOutcome {
    pub at: Point,
    /// End point of swipes and scrolls
    pub end: Option<Point>,
}

/// Resolves targets and drives the device, borrowing the session's collaborators
pub struct ActionDispatcher<'a> {
    device: &'a dyn DeviceDriver,
    tree: &'a dyn UiTreeProvider,
    matcher: &'a TemplateMatcher,
    profile: &'a DeviceProfile,
    settings: &'a Settings,
    frozen: Option<&'a UiTreeSnapshot>,
}

impl<'a> ActionDispatcher<'a> {
    pub fn new(
        device: &'a dyn DeviceDriver,
        tree: &'a dyn UiTreeProvider,
        matcher: &'a TemplateMatcher,
        profile: &'a DeviceProfile,
        settings: &'a Settings,
    ) -> Self {
        Self {
            device,
            tree,
            matcher,
            profile,
            settings,
            frozen: None,
        }
    }

    /// Resolve selectors against this snapshot instead of dumping a fresh one
    pub fn with_frozen(mut self, snapshot: Option<&'a UiTreeSnapshot>) -> Self {
        self.frozen = snapshot;
        self
    }

    async fn snapshot(&self) -> Result<Cow<'a, UiTreeSnapshot>> {
        match self.frozen {
            Some(snapshot) => Ok(Cow::Borrowed(snapshot)),
            None => Ok(Cow::Owned(self.tree.freeze().await?)),
        }
    }

    /// Best template match on a fresh frame
    pub async fn match_once(&self, template: &Template) -> Result<Option<MatchResult>> {
        let frame = self.device.capture_screen().await?;
        let threshold = template.threshold.unwrap_or(self.settings.threshold);
        self.matcher.find(template, &frame, threshold)
    }

    /// Node a selector designates in a fresh (or the frozen) snapshot
    ///
    /// An indexed selector with no matches at all counts as "not there yet" so that waits
    /// cover lists that are still loading.
    pub async fn node_once(&self, selector: &Selector) -> Result<Option<UiNode>> {
        let snapshot = self.snapshot().await?;
        match ui_tree::resolve(selector, &snapshot) {
            Ok(node) => Ok(node.cloned()),
            Err(LocateError::IndexOutOfRange { count: 0, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Single resolution attempt
    pub async fn locate_once(&self, target: &Target) -> Result<Option<Point>> {
        match target {
            Target::Template(template) => Ok(self.match_once(template).await?.map(|m| m.point)),
            Target::Selector(selector) => match self.node_once(selector).await? {
                Some(node) => Ok(Some(to_absolute(node.pos, self.profile)?)),
                None => Ok(None),
            },
            Target::Point(p) => {
                self.check_on_screen(*p)?;
                Ok(Some(*p))
            }
            Target::Position(n) => Ok(Some(to_absolute(*n, self.profile)?)),
        }
    }

    /// Resolve, waiting up to `poll.timeout` for the target to appear
    pub async fn locate(&self, target: &Target, poll: PollOptions) -> Result<Option<Point>> {
        Ok(wait_until(poll, move || self.locate_once(target)).await?.found())
    }

    /// Wait for a selector and return the matched node
    pub async fn find_node(&self, selector: &Selector, poll: PollOptions) -> Result<Option<UiNode>> {
        Ok(wait_until(poll, move || self.node_once(selector)).await?.found())
    }

    /// First of `targets` to appear, with its position in the list
    pub async fn wait_for_any(
        &self,
        targets: &[Target],
        poll: PollOptions,
    ) -> Result<Option<(usize, Point)>> {
        let outcome = wait_until(poll, move || async move {
            for (i, target) in targets.iter().enumerate() {
                if let Some(p) = self.locate_once(target).await? {
                    return Ok(Some((i, p)));
                }
            }
            Ok(None)
        })
        .await?;
        Ok(outcome.found())
    }

    /// Positions of all `targets` once they are on screen together
    pub async fn wait_for_all(
        &self,
        targets: &[Target],
        poll: PollOptions,
    ) -> Result<Option<Vec<Point>>> {
        let outcome = wait_until(poll, move || async move {
            let mut points = Vec::with_capacity(targets.len());
            for target in targets {
                match self.locate_once(target).await? {
                    Some(p) => points.push(p),
                    None => return Ok(None),
                }
            }
            Ok(Some(points))
        })
        .await?;
        Ok(outcome.found())
    }

    async fn require(&self, target: &Target, poll: PollOptions) -> Result<Point> {
        self.locate(target, poll)
            .await?
            .ok_or_else(|| LocateError::ElementNotFound {
                target: target.to_string(),
            })
    }

    /// Resolve `target` and perform `action` on it, then settle
    pub async fn dispatch(
        &self,
        target: &Target,
        action: &Action,
        poll: PollOptions,
    ) -> Result<ActionOutcome> {
        self.validate(action)?;
        let at = self.require(target, poll).await?;
        log::info!("{} {} at {}", action.name(), target, at);

        let end = self.perform(target, at, action, poll).await?;
        tokio::time::sleep(self.settings.settle_delay()).await;
        Ok(ActionOutcome { at, end })
    }

    fn validate(&self, action: &Action) -> Result<()> {
        match action {
            Action::Swipe {
                to: None,
                vector: None,
                ..
            } => Err(LocateError::invalid(
                "swipe needs a destination target or a direction vector",
            )),
            Action::Swipe {
                vector: Some((dx, dy)),
                ..
            } if ![dx, dy].iter().all(|v| v.is_finite() && (-1.0..=1.0).contains(*v)) => {
                Err(LocateError::invalid(format!(
                    "swipe vector components must be within [-1, 1], got ({}, {})",
                    dx, dy
                )))
            }
            Action::Scroll { percent, .. } if !(0.0..=1.0).contains(percent) => Err(
                LocateError::invalid(format!("scroll percent must be within [0, 1], got {}", percent)),
            ),
            _ => Ok(()),
        }
    }

    async fn perform(
        &self,
        target: &Target,
        at: Point,
        action: &Action,
        poll: PollOptions,
    ) -> Result<Option<Point>> {
        match action {
            Action::Tap { times } => {
                self.taps(at, (*times).max(1)).await?;
                Ok(None)
            }
            Action::DoubleTap => {
                self.taps(at, 2).await?;
                Ok(None)
            }
            Action::LongPress { duration } => {
                self.device
                    .inject_touch(&Touch::Press {
                        at,
                        duration: *duration,
                    })
                    .await?;
                Ok(None)
            }
            Action::Swipe {
                to,
                vector,
                duration,
            } => {
                let end = match (to, vector) {
                    (Some(dest), _) => self.require(dest, poll).await?,
                    (None, Some((dx, dy))) => {
                        let res = self.profile.resolution;
                        self.clamp_to_screen(at.offset(
                            (dx * res.width as f64).round() as i32,
                            (dy * res.height as f64).round() as i32,
                        ))
                    }
                    (None, None) => {
                        return Err(LocateError::invalid(
                            "swipe needs a destination target or a direction vector",
                        ))
                    }
                };
                self.device
                    .inject_touch(&Touch::Swipe {
                        from: at,
                        to: end,
                        duration: *duration,
                    })
                    .await?;
                Ok(Some(end))
            }
            Action::InputText { text, enter } => {
                self.device.inject_touch(&Touch::Tap(at)).await?;
                tokio::time::sleep(self.settings.settle_delay()).await;
                self.type_text(text, *enter).await?;
                Ok(None)
            }
            Action::ReplaceText { text, enter } => {
                self.device.inject_touch(&Touch::Tap(at)).await?;
                tokio::time::sleep(self.settings.settle_delay()).await;
                let existing = self.current_text_len(target).await?;
                let mut keys = vec![Key::MoveEnd];
                keys.extend(std::iter::repeat(Key::Delete).take(existing));
                self.device.inject_keys(&keys).await?;
                self.type_text(text, *enter).await?;
                Ok(None)
            }
            Action::Scroll {
                direction,
                percent,
                duration,
            } => {
                let res = self.profile.resolution;
                let (from, to) = match direction {
                    ScrollDirection::Vertical => {
                        let d = (percent / 2.0 * res.height as f64).round() as i32;
                        (at.offset(0, d), at.offset(0, -d))
                    }
                    ScrollDirection::Horizontal => {
                        let d = (percent / 2.0 * res.width as f64).round() as i32;
                        (at.offset(d, 0), at.offset(-d, 0))
                    }
                };
                let (from, to) = (self.clamp_to_screen(from), self.clamp_to_screen(to));
                self.device
                    .inject_touch(&Touch::Swipe {
                        from,
                        to,
                        duration: *duration,
                    })
                    .await?;
                Ok(Some(to))
            }
        }
    }

    async fn type_text(&self, text: &str, enter: bool) -> Result<()> {
        if !text.is_empty() {
            self.device.inject_text(text).await?;
        }
        if enter {
            self.device.inject_key(Key::Enter).await?;
        }
        Ok(())
    }

    /// Characters to delete when clearing the field at `target`: the node's text for a
    /// selector, `clear_text_max` otherwise
    async fn current_text_len(&self, target: &Target) -> Result<usize> {
        let fallback = self.settings.clear_text_max;
        match target {
            Target::Selector(selector) => Ok(self
                .node_once(selector)
                .await?
                .map(|node| node.text.chars().count())
                .unwrap_or(fallback)),
            _ => Ok(fallback),
        }
    }

    async fn taps(&self, at: Point, times: u32) -> Result<()> {
        let gap = Duration::from_millis(self.settings.double_tap_gap_ms);
        for i in 0..times {
            if i > 0 {
                tokio::time::sleep(gap).await;
            }
            self.device.inject_touch(&Touch::Tap(at)).await?;
        }
        Ok(())
    }

    fn check_on_screen(&self, p: Point) -> Result<()> {
        let res = self.profile.resolution;
        if p.x < 0 || p.y < 0 || p.x as u32 >= res.width || p.y as u32 >= res.height {
            return Err(LocateError::OutOfRange {
                x: p.x as f64,
                y: p.y as f64,
            });
        }
        Ok(())
    }

    fn clamp_to_screen(&self, p: Point) -> Point {
        let res = self.profile.resolution;
        Point::new(
            p.x.clamp(0, res.width.saturating_sub(1) as i32),
            p.y.clamp(0, res.height.saturating_sub(1) as i32),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{FakeDevice, Injected};
    use crate::driver::image_matcher::tests::{paste, pattern, write_template};
    use crate::driver::ui_tree::tests::sample_tree;
    use crate::geometry::Resolution;
    use image::Rgb;
    use tokio::time::Instant;

    struct Rig {
        device: FakeDevice,
        matcher: TemplateMatcher,
        profile: DeviceProfile,
        settings: Settings,
    }

    impl Rig {
        fn new(w: u32, h: u32) -> Self {
            let device = FakeDevice::new(Resolution::new(w, h));
            Self {
                profile: DeviceProfile::new(Resolution::new(w, h), device.device_id()),
                device,
                matcher: TemplateMatcher::default(),
                settings: Settings::default(),
            }
        }

        fn dispatcher(&self) -> ActionDispatcher<'_> {
            ActionDispatcher::new(
                &self.device,
                &self.device,
                &self.matcher,
                &self.profile,
                &self.settings,
            )
        }

        fn screen_with_pattern(&self, x: u32, y: u32) -> crate::driver::image_matcher::Frame {
            let mut screen = self.device.blank();
            paste(&mut screen, &pattern(Rgb([255, 255, 255])), x, y);
            screen
        }
    }

    fn short() -> PollOptions {
        PollOptions::new(Duration::from_secs(1), Duration::from_millis(100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_selector() {
        let rig = Rig::new(200, 100);
        rig.device.push_snapshot(sample_tree());
        let target = Target::Selector(Selector::new().name("btn_exit"));
        let d = rig.dispatcher();

        assert_eq!(d.locate(&target, PollOptions::once()).await.unwrap(), None);

        let err = d
            .dispatch(&target, &Action::Tap { times: 1 }, short())
            .await
            .unwrap_err();
        match err {
            LocateError::ElementNotFound { target } => assert!(target.contains("btn_exit")),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rig.device.touches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tap_selector_at_node_centre() {
        let rig = Rig::new(200, 100);
        rig.device.push_snapshot(sample_tree());
        let target = Target::Selector(Selector::new().text("我的"));
        let outcome = rig
            .dispatcher()
            .dispatch(&target, &Action::Tap { times: 1 }, short())
            .await
            .unwrap();
        assert_eq!(outcome.at, Point::new(150, 95));
        assert_eq!(rig.device.touches(), vec![Touch::Tap(Point::new(150, 95))]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_template_appears_after_polling() {
        let rig = Rig::new(200, 100);
        rig.device
            .push_frame(rig.device.blank())
            .push_frame(rig.device.blank())
            .push_frame(rig.screen_with_pattern(50, 40));
        let tpl = write_template(&pattern(Rgb([255, 255, 255])), "ok_button.png");
        let start = Instant::now();

        let outcome = rig
            .dispatcher()
            .dispatch(&Target::Template(tpl), &Action::DoubleTap, short())
            .await
            .unwrap();

        assert_eq!(outcome.at, Point::new(60, 45));
        assert_eq!(rig.device.captures(), 3);
        assert_eq!(
            rig.device.touches(),
            vec![Touch::Tap(Point::new(60, 45)), Touch::Tap(Point::new(60, 45))]
        );
        // two polling intervals, the tap gap and the settle delay
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200 + 80 + 150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(300 + 80 + 150), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swipe_without_destination_is_rejected() {
        let rig = Rig::new(200, 100);
        let action = Action::Swipe {
            to: None,
            vector: None,
            duration: Duration::from_millis(500),
        };
        let err = rig
            .dispatcher()
            .dispatch(&Target::Position(NormPoint::CENTER), &action, short())
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::InvalidArgument(_)));
        assert!(rig.device.injected().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_swipe_along_vector_and_to_target() {
        let rig = Rig::new(200, 100);
        let d = rig.dispatcher();
        let duration = Duration::from_millis(500);

        let outcome = d
            .dispatch(
                &Target::Position(NormPoint::CENTER),
                &Action::Swipe {
                    to: None,
                    vector: Some((0.0, -0.25)),
                    duration,
                },
                short(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.end, Some(Point::new(100, 25)));

        let outcome = d
            .dispatch(
                &Target::Point(Point::new(10, 10)),
                &Action::Swipe {
                    to: Some(Target::Point(Point::new(190, 90))),
                    vector: Some((0.5, 0.5)),
                    duration,
                },
                short(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.end, Some(Point::new(190, 90)));
        assert_eq!(rig.device.touches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_swipe_vector_outside_screen_is_rejected() {
        let rig = Rig::new(200, 100);
        for vector in [(1e12, 0.0), (0.0, -1.5), (f64::NAN, 0.2)] {
            let action = Action::Swipe {
                to: None,
                vector: Some(vector),
                duration: Duration::from_millis(500),
            };
            let err = rig
                .dispatcher()
                .dispatch(&Target::Position(NormPoint::CENTER), &action, short())
                .await
                .unwrap_err();
            assert!(matches!(err, LocateError::InvalidArgument(_)), "{:?}", vector);
        }
        assert!(rig.device.injected().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_indexed_selector_waits_for_list() {
        let rig = Rig::new(200, 100);
        rig.device
            .push_snapshot(UiTreeSnapshot::new(Vec::new()))
            .push_snapshot(sample_tree());
        let d = rig.dispatcher();

        let item = Target::Selector(Selector::new().name("item").index(1));
        assert_eq!(d.locate(&item, short()).await.unwrap(), Some(Point::new(100, 40)));

        let ghost = Target::Selector(Selector::new().name("ghost").index(0));
        let err = d
            .dispatch(&ghost, &Action::Tap { times: 1 }, short())
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::ElementNotFound { .. }));

        let past_end = Target::Selector(Selector::new().name("item").index(5));
        let err = d.locate(&past_end, short()).await.unwrap_err();
        assert!(matches!(err, LocateError::IndexOutOfRange { index: 5, count: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scroll_vertical_moves_finger_up() {
        let rig = Rig::new(1000, 2000);
        let action = Action::Scroll {
            direction: ScrollDirection::Vertical,
            percent: 0.6,
            duration: Duration::from_secs(2),
        };
        rig.dispatcher()
            .dispatch(&Target::Position(NormPoint::CENTER), &action, short())
            .await
            .unwrap();
        assert_eq!(
            rig.device.touches(),
            vec![Touch::Swipe {
                from: Point::new(500, 1600),
                to: Point::new(500, 400),
                duration: Duration::from_secs(2),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_text_with_enter() {
        let rig = Rig::new(200, 100);
        let action = Action::InputText {
            text: "hello".into(),
            enter: true,
        };
        rig.dispatcher()
            .dispatch(&Target::Point(Point::new(20, 30)), &action, short())
            .await
            .unwrap();
        assert_eq!(
            rig.device.injected(),
            vec![
                Injected::Touch(Touch::Tap(Point::new(20, 30))),
                Injected::Text("hello".into()),
                Injected::Key(Key::Enter),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_point_outside_screen() {
        let rig = Rig::new(200, 100);
        let err = rig
            .dispatcher()
            .dispatch(&Target::Point(Point::new(200, 5)), &Action::Tap { times: 1 }, short())
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::OutOfRange { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frozen_snapshot_is_reused() {
        let rig = Rig::new(200, 100);
        let frozen = sample_tree();
        let d = rig.dispatcher().with_frozen(Some(&frozen));
        let node = d
            .find_node(&Selector::new().name("item").index(1), short())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.text, "Item 2");
        assert_eq!(rig.device.freezes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_any_and_all() {
        let rig = Rig::new(200, 100);
        rig.device.push_snapshot(sample_tree());
        let targets = vec![
            Target::Selector(Selector::new().name("btn_exit")),
            Target::Selector(Selector::new().text("首页")),
        ];
        let d = rig.dispatcher();
        let (index, at) = d.wait_for_any(&targets, short()).await.unwrap().unwrap();
        assert_eq!((index, at), (1, Point::new(50, 95)));
        assert_eq!(d.wait_for_all(&targets, short()).await.unwrap(), None);
        assert_eq!(
            d.wait_for_all(&targets[1..], short()).await.unwrap(),
            Some(vec![Point::new(50, 95)])
        );
    }
}
