//! Detects "listening on" URLs in process output.

use regex::Regex;
use std::sync::OnceLock;

fn url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"https?://(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{1,5})\S*")
                .map_err(|e| tracing::error!(error = %e, "server-ready pattern invalid"))
                .ok()
        })
        .as_ref()
}

fn ansi_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]")
                .map_err(|e| tracing::error!(error = %e, "ansi pattern invalid"))
                .ok()
        })
        .as_ref()
}

/// Returns `(port, url)` for the first local server URL in `text`. Colour and
/// cursor escape sequences are stripped first.
pub fn detect_server_url(text: &str) -> Option<(u16, String)> {
    let plain = match ansi_pattern() {
        Some(ansi) => ansi.replace_all(text, ""),
        None => text.into(),
    };
    let caps = url_pattern()?.captures(&plain)?;
    let port = caps.get(1)?.as_str().parse::<u16>().ok()?;
    let url = caps
        .get(0)?
        .as_str()
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ')' | '\'' | '"'));
    Some((port, url.to_string()))
}

#[cfg(test)]
#[path = "../../../../tests/unit/kernel/services/adapters/server_ready.rs"]
mod tests;
