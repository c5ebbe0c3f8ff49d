//! Readiness detection over an incremental output stream
//!
//! Target output arrives in arbitrary chunks with no line-buffering
//! guarantee, so the marker can be split across a chunk boundary. The scanner
//! keeps a bounded tail of previously seen text and matches against
//! tail + chunk, which finds a marker no matter how the stream slices it.

use crate::config::ReadinessConfig;
use crate::error::{HarnessError, HarnessResult};

/// The rendered marker string the scanner looks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessMarker(String);

impl ReadinessMarker {
    /// Use a literal string as the marker
    pub fn new(marker: impl Into<String>) -> Self {
        Self(marker.into())
    }

    /// Render the configured template, substituting `{addr}` and `{port}`.
    ///
    /// `port` is the target's display port; a template that references
    /// `{port}` without one configured is rejected before anything launches.
    pub fn render(config: &ReadinessConfig, port: Option<&str>) -> HarnessResult<Self> {
        let mut marker = config.marker.replace("{addr}", &config.addr);
        if marker.contains("{port}") {
            let port = port.ok_or_else(|| {
                HarnessError::InvalidConfig(
                    "Readiness marker references {port} but no target port is configured"
                        .to_string(),
                )
            })?;
            marker = marker.replace("{port}", port);
        }
        if marker.is_empty() {
            return Err(HarnessError::InvalidConfig(
                "Readiness marker is empty".to_string(),
            ));
        }
        Ok(Self(marker))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReadinessMarker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scans chunks of target output for the readiness marker.
///
/// Memory stays bounded: after each non-matching chunk the accumulated text
/// is trimmed to one byte less than the marker length, the longest proper
/// prefix of the marker the stream could end with.
pub struct ReadinessScanner {
    marker: ReadinessMarker,
    tail: String,
    matched: bool,
}

impl ReadinessScanner {
    pub fn new(marker: ReadinessMarker) -> Self {
        Self {
            marker,
            tail: String::new(),
            matched: false,
        }
    }

    /// Feed one chunk of output. Returns `true` exactly once, on the chunk
    /// that completes the marker; everything after the first match is
    /// ignored.
    pub fn observe(&mut self, chunk: &str) -> bool {
        if self.matched {
            return false;
        }
        self.tail.push_str(chunk);
        if self.tail.contains(self.marker.as_str()) {
            self.matched = true;
            self.tail = String::new();
            return true;
        }
        self.trim_tail();
        false
    }

    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn marker(&self) -> &ReadinessMarker {
        &self.marker
    }

    fn trim_tail(&mut self) {
        let keep = self.marker.as_str().len().saturating_sub(1);
        if self.tail.len() <= keep {
            return;
        }
        // A marker occurrence starts at a char boundary, so moving the cut
        // forward past a partial character never discards a real prefix.
        let mut cut = self.tail.len() - keep;
        while !self.tail.is_char_boundary(cut) {
            cut += 1;
        }
        self.tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(marker: &str) -> ReadinessScanner {
        ReadinessScanner::new(ReadinessMarker::new(marker))
    }

    fn config(marker: &str, addr: &str) -> ReadinessConfig {
        ReadinessConfig {
            marker: marker.to_string(),
            addr: addr.to_string(),
            ..ReadinessConfig::default()
        }
    }

    #[test]
    fn matches_within_single_chunk() {
        let mut s = scanner("bound on");
        assert!(s.observe("fiber v2.52.0 bound on host 0.0.0.0\n"));
        assert!(s.matched());
    }

    #[test]
    fn matches_marker_split_across_two_chunks() {
        let mut s = scanner("bound on host 0.0.0.0 and port 3000");
        assert!(!s.observe("INFO fiber bound on host 0.0."));
        assert!(s.observe("0.0 and port 3000\n"));
    }

    #[test]
    fn matches_marker_split_across_many_chunks() {
        let mut s = scanner("bound on host 0.0.0.0 and port 3000");
        let line = "noise before bound on host 0.0.0.0 and port 3000 noise after";
        let mut matched = 0;
        for chunk in line.as_bytes().chunks(3) {
            if s.observe(std::str::from_utf8(chunk).unwrap()) {
                matched += 1;
            }
        }
        assert_eq!(matched, 1);
    }

    #[test]
    fn reports_first_match_only() {
        let mut s = scanner("ready");
        assert!(s.observe("ready"));
        assert!(!s.observe("ready again"));
        assert!(s.matched());
    }

    #[test]
    fn tail_stays_bounded_without_a_match() {
        let mut s = scanner("bound on host 0.0.0.0 and port 3000");
        let keep = s.marker().as_str().len() - 1;
        for _ in 0..100 {
            assert!(!s.observe("some unrelated log line with plenty of text\n"));
            assert!(s.tail.len() <= keep);
        }
    }

    #[test]
    fn tail_trim_respects_char_boundaries() {
        let mut s = scanner("bound on");
        for _ in 0..50 {
            assert!(!s.observe("héllo wörld ログ出力 ♥"));
        }
        assert!(!s.matched());
    }

    #[test]
    fn non_ascii_noise_does_not_break_split_match() {
        let mut s = scanner("bound on host 0.0.0.0 and port 3000");
        assert!(!s.observe("ログ: bound on host "));
        assert!(s.observe("0.0.0.0 and port 3000"));
    }

    #[test]
    fn render_substitutes_addr_and_port() {
        let c = config("bound on host {addr} and port {port}", "0.0.0.0");
        let marker = ReadinessMarker::render(&c, Some("3000")).unwrap();
        assert_eq!(marker.as_str(), "bound on host 0.0.0.0 and port 3000");
    }

    #[test]
    fn render_without_placeholders_passes_through() {
        let c = config("bound on", "0.0.0.0");
        let marker = ReadinessMarker::render(&c, None).unwrap();
        assert_eq!(marker.as_str(), "bound on");
    }

    #[test]
    fn render_rejects_port_placeholder_without_port() {
        let c = config("bound on host {addr} and port {port}", "0.0.0.0");
        let err = ReadinessMarker::render(&c, None).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidConfig(_)));
    }

    #[test]
    fn render_rejects_empty_marker() {
        let c = config("", "0.0.0.0");
        assert!(ReadinessMarker::render(&c, None).is_err());
    }
}
