//! Scripted in-memory collaborators for tests

use crate::driver::image_matcher::Frame;
use crate::driver::traits::{DeviceDriver, Key, TextRecognizer, Touch, UiTreeProvider};
use crate::driver::ui_tree::UiTreeSnapshot;
use crate::error::{LocateError, Result};
use crate::geometry::Resolution;
use async_trait::async_trait;
use image::GrayImage;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Everything the engine did to the device, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Injected {
    Touch(Touch),
    Text(String),
    Key(Key),
    Ime(String),
}

#[derive(Default)]
struct Script {
    /// Frames served in order; the last one repeats
    frames: VecDeque<Frame>,
    snapshots: VecDeque<UiTreeSnapshot>,
    injected: Vec<Injected>,
    captures: usize,
    freezes: usize,
    ime: Option<String>,
    fail_capture: bool,
    fail_set_ime: bool,
}

/// Fake device; clones share state so a test can keep a handle for inspection
#[derive(Clone)]
pub struct FakeDevice {
    resolution: Resolution,
    script: Arc<Mutex<Script>>,
}

fn next_or_last<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

impl FakeDevice {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    /// Blank black screen of the device's size
    pub fn blank(&self) -> Frame {
        Frame::new(self.resolution.width, self.resolution.height)
    }

    pub fn push_frame(&self, frame: Frame) -> &Self {
        self.script.lock().unwrap().frames.push_back(frame);
        self
    }

    pub fn push_snapshot(&self, snapshot: UiTreeSnapshot) -> &Self {
        self.script.lock().unwrap().snapshots.push_back(snapshot);
        self
    }

    /// Change the active IME behind the engine's back
    pub fn switch_ime(&self, ime: &str) {
        self.script.lock().unwrap().ime = Some(ime.to_string());
    }

    pub fn fail_capture(&self) {
        self.script.lock().unwrap().fail_capture = true;
    }

    pub fn fail_set_ime(&self) {
        self.script.lock().unwrap().fail_set_ime = true;
    }

    pub fn injected(&self) -> Vec<Injected> {
        self.script.lock().unwrap().injected.clone()
    }

    pub fn touches(&self) -> Vec<Touch> {
        self.injected()
            .into_iter()
            .filter_map(|i| match i {
                Injected::Touch(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn captures(&self) -> usize {
        self.script.lock().unwrap().captures
    }

    pub fn freezes(&self) -> usize {
        self.script.lock().unwrap().freezes
    }

    pub fn current_ime(&self) -> Option<String> {
        self.script.lock().unwrap().ime.clone()
    }

    fn record(&self, event: Injected) {
        self.script.lock().unwrap().injected.push(event);
    }
}

#[async_trait]
impl DeviceDriver for FakeDevice {
    fn device_id(&self) -> String {
        "fake-0001".to_string()
    }

    async fn capture_screen(&self) -> Result<Frame> {
        let mut script = self.script.lock().unwrap();
        script.captures += 1;
        if script.fail_capture {
            return Err(LocateError::device("screencap failed"));
        }
        Ok(next_or_last(&mut script.frames).unwrap_or_else(|| self.blank()))
    }

    async fn inject_touch(&self, touch: &Touch) -> Result<()> {
        self.record(Injected::Touch(touch.clone()));
        Ok(())
    }

    async fn inject_text(&self, text: &str) -> Result<()> {
        self.record(Injected::Text(text.to_string()));
        Ok(())
    }

    async fn inject_key(&self, key: Key) -> Result<()> {
        self.record(Injected::Key(key));
        Ok(())
    }

    async fn screen_resolution(&self) -> Result<Resolution> {
        Ok(self.resolution)
    }

    async fn default_ime(&self) -> Result<Option<String>> {
        Ok(self.current_ime())
    }

    async fn set_ime(&self, ime: &str) -> Result<()> {
        let mut script = self.script.lock().unwrap();
        if script.fail_set_ime {
            return Err(LocateError::device("ime set failed"));
        }
        script.injected.push(Injected::Ime(ime.to_string()));
        script.ime = Some(ime.to_string());
        Ok(())
    }
}

#[async_trait]
impl UiTreeProvider for FakeDevice {
    async fn freeze(&self) -> Result<UiTreeSnapshot> {
        let mut script = self.script.lock().unwrap();
        script.freezes += 1;
        Ok(next_or_last(&mut script.snapshots).unwrap_or_else(|| UiTreeSnapshot::new(Vec::new())))
    }
}

/// OCR returning canned text and remembering what it was shown
#[derive(Clone, Default)]
pub struct FakeOcr {
    text: String,
    seen: Arc<Mutex<Vec<(GrayImage, String, String)>>>,
}

impl FakeOcr {
    pub fn returning(text: &str) -> Self {
        Self {
            text: text.to_string(),
            seen: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<(GrayImage, String, String)> {
        self.seen.lock().unwrap().clone()
    }
}

impl TextRecognizer for FakeOcr {
    fn recognize(&self, image: &GrayImage, languages: &str, engine_config: &str) -> Result<String> {
        self.seen.lock().unwrap().push((
            image.clone(),
            languages.to_string(),
            engine_config.to_string(),
        ));
        Ok(self.text.clone())
    }
}
