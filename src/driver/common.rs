//! Common utilities shared by the resolvers and the device collaborators
//!
//! This module contains the bounded polling loop used for every appearance and
//! disappearance check, plus small image and text helpers.

use crate::error::Result;
use image::{GrayImage, Luma, RgbImage};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Polling Utilities
// ============================================================================

/// Timing for a polling operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Maximum wall-clock wait. Zero means a single immediate attempt.
    pub timeout: Duration,
    /// Pause between failed attempts
    pub interval: Duration,
}

impl PollOptions {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// One attempt, no sleeping
    pub fn once() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            interval: Duration::from_millis(500),
        }
    }
}

/// Outcome of a bounded wait; timing out is an ordinary result, not an error
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    Found(T),
    TimedOut,
}

impl<T> WaitOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            WaitOutcome::Found(v) => Some(v),
            WaitOutcome::TimedOut => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, WaitOutcome::Found(_))
    }
}

/// Poll `lookup` until it yields a value or the timeout elapses
///
/// Errors from `lookup` (device or OCR failures) are returned immediately; `Ok(None)`
/// means "not there yet".
pub async fn wait_until<T, F, Fut>(options: PollOptions, lookup: F) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    wait_until_with(options, lookup, |_| {}).await
}

/// Like [`wait_until`], calling `on_miss(attempt)` after every unsuccessful attempt
pub async fn wait_until_with<T, F, Fut, M>(
    options: PollOptions,
    mut lookup: F,
    mut on_miss: M,
) -> Result<WaitOutcome<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
    M: FnMut(u32),
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        if let Some(value) = lookup().await? {
            log::debug!("Poll succeeded on attempt {}", attempt);
            return Ok(WaitOutcome::Found(value));
        }

        on_miss(attempt);

        if start.elapsed() >= options.timeout {
            log::debug!(
                "Poll timed out after {} attempt(s) ({}ms)",
                attempt,
                start.elapsed().as_millis()
            );
            return Ok(WaitOutcome::TimedOut);
        }

        tokio::time::sleep(options.interval).await;
    }
}

// ============================================================================
// Image Utilities
// ============================================================================

/// Grayscale then hard threshold: values below `cutoff` become black, the rest white
pub fn binarize(img: &RgbImage, cutoff: u8) -> GrayImage {
    let gray = image::imageops::grayscale(img);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] < cutoff {
            Luma([0])
        } else {
            Luma([255])
        }
    })
}

// ============================================================================
// Text Utilities
// ============================================================================

/// Escape text for Android shell input command
pub fn escape_for_android_shell(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(' ', "%s")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('&', "\\&")
        .replace('<', "\\<")
        .replace('>', "\\>")
        .replace('|', "\\|")
        .replace(';', "\\;")
}

/// Drop spaces and tabs, trim line ends; OCR engines pad CJK text with spaces
pub fn strip_ocr_whitespace(text: &str) -> String {
    text.replace([' ', '\t', '\u{00A0}'], "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_single_attempt() {
        let calls = Cell::new(0);
        let start = Instant::now();
        let outcome: WaitOutcome<()> = wait_until(PollOptions::once(), || {
            calls.set(calls.get() + 1);
            async { Ok(None) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert_eq!(calls.get(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt() {
        let calls = Cell::new(0u32);
        let interval = Duration::from_secs(1);
        let start = Instant::now();
        let outcome = wait_until(PollOptions::new(Duration::from_secs(10), interval), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok(if n == 3 { Some(n) } else { None }) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Found(3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "{:?}", elapsed);
        assert!(elapsed < interval * 3, "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_and_reports_misses() {
        let mut misses = Vec::new();
        let outcome: WaitOutcome<()> = wait_until_with(
            PollOptions::new(Duration::from_millis(1000), Duration::from_millis(300)),
            || async { Ok(None) },
            |attempt| misses.push(attempt),
        )
        .await
        .unwrap();
        assert!(!outcome.is_found());
        // attempts at 0, 300, 600, 900 and 1200ms; the last one sees the deadline
        assert_eq!(misses, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_errors_propagate() {
        let result: Result<WaitOutcome<()>> = wait_until(PollOptions::default(), || async {
            Err(crate::error::LocateError::device("screencap failed"))
        })
        .await;
        assert!(matches!(result, Err(crate::error::LocateError::Device(_))));
    }

    #[test]
    fn test_binarize_cutoff() {
        let img = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => image::Rgb([149, 149, 149]),
            1 => image::Rgb([150, 150, 150]),
            _ => image::Rgb([255, 255, 255]),
        });
        let bw = binarize(&img, 150);
        assert_eq!(bw.get_pixel(0, 0)[0], 0);
        assert_eq!(bw.get_pixel(1, 0)[0], 255);
        assert_eq!(bw.get_pixel(2, 0)[0], 255);
    }

    #[test]
    fn test_escape_android_shell() {
        assert_eq!(escape_for_android_shell("hello world"), "hello%sworld");
        assert_eq!(escape_for_android_shell("a&b"), "a\\&b");
    }

    #[test]
    fn test_strip_ocr_whitespace() {
        assert_eq!(strip_ocr_whitespace(" 智 学 网 \n"), "智学网");
        assert_eq!(strip_ocr_whitespace("a b\nc d"), "ab\ncd");
    }
}
