//! Version marker stamping.
//!
//! Every published sketch carries one `#define FW_VERSION "YYYYMMDDHHMM"`
//! line. The value is the UTC minute of the run, zero-padded with no
//! separators, so two markers taken at least a minute apart compare the same
//! way lexically and chronologically. A fresh marker guarantees the build
//! pipeline emits a distinct binary for every published change.
//!
//! Only the first marker line is rewritten. Documents with several marker
//! lines keep the extra ones untouched.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

/// Name of the preprocessor symbol that carries the version.
pub const MARKER_KEY: &str = "FW_VERSION";

/// `chrono` format of the marker value.
pub const MARKER_FORMAT: &str = "%Y%m%d%H%M";

static MARKER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([ \t]*#[ \t]*define[ \t]+FW_VERSION[ \t]+)"([^"\r\n]*)""#)
        .expect("marker pattern is valid")
});

/// What `stamp_at` did to the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampAction {
    /// An existing marker line had its value rewritten in place.
    Replaced,
    /// No marker line was found; one was prepended.
    Inserted,
}

/// A stamped document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped {
    pub text: String,
    pub marker: String,
    pub action: StampAction,
}

/// Marker value for the given instant, truncated to the minute.
pub fn marker_for(now: DateTime<Utc>) -> String {
    now.format(MARKER_FORMAT).to_string()
}

/// The full marker line for a marker value.
pub fn marker_line(marker: &str) -> String {
    format!("#define {MARKER_KEY} \"{marker}\"")
}

/// Value of the first marker line in `source`, if any.
pub fn current_marker(source: &str) -> Option<&str> {
    MARKER_LINE
        .captures(source)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
}

/// Stamp `source` with the marker for `now`.
///
/// Pure: the same source and the same minute always give the same output.
pub fn stamp_at(source: &str, now: DateTime<Utc>) -> Stamped {
    let marker = marker_for(now);

    if MARKER_LINE.is_match(source) {
        let text = MARKER_LINE
            .replace(source, |caps: &Captures<'_>| {
                format!("{}\"{}\"", &caps[1], marker)
            })
            .into_owned();
        return Stamped {
            text,
            marker,
            action: StampAction::Replaced,
        };
    }

    let text = format!("{}\n{}", marker_line(&marker), source);
    Stamped {
        text,
        marker,
        action: StampAction::Inserted,
    }
}

/// Stamp `source` with the marker for the current wall-clock minute.
pub fn stamp(source: &str) -> Stamped {
    stamp_at(source, Utc::now())
}
