//! Event-log parsing and tap counting.
//!
//! Daily runs leave a textual control log with one event per line, e.g.
//!
//! ```text
//! Hour=9, Sec=1830, ControlIter=1, Element=RegControl.Reg1, Action= TAP CHANGED TO 3
//! Hour=9, Sec=1860, ControlIter=1, Element=Capacitor.cap1, Action=OPENED
//! ```
//!
//! A line counts as one tap operation when it carries the `TAP` event token
//! and a device token naming one of the filtered regulators. Everything else
//! (headers, capacitor switching, solution messages) is ignored.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use tapopt_core::{TapOptError, TapOptResult};

/// Event-type token marking a tap change.
pub const TAP_MARKER: &str = "TAP";

/// Plural form written by engines that batch several steps into one event.
const TAP_MARKER_PLURAL: &str = "TAPS";

/// Case-insensitive set of regulator identifiers whose taps are counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegulatorFilter {
    names: BTreeSet<String>,
}

impl RegulatorFilter {
    pub fn new<I, S>(names: I) -> TapOptResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names
            .into_iter()
            .map(|name| name.as_ref().trim().to_ascii_uppercase())
            .filter(|name| !name.is_empty())
            .collect();
        if names.is_empty() {
            return Err(TapOptError::Config(
                "regulator filter must name at least one regulator".to_string(),
            ));
        }
        Ok(Self { names })
    }

    pub fn matches(&self, device: &str) -> bool {
        self.names.contains(&device.to_ascii_uppercase())
    }

    /// Canonical (upper-case) names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a device token (`RegControl.Reg1` or `Reg1`) to a filter name.
    fn resolve(&self, token: &str) -> Option<&str> {
        let candidates = [token, token.rsplit('.').next().unwrap_or(token)];
        candidates
            .iter()
            .find_map(|candidate| self.names.get(*candidate).map(String::as_str))
    }
}

/// One counted tap event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapEvent {
    /// 1-based line number in the log.
    pub line: usize,
    /// Canonical regulator name from the filter.
    pub regulator: String,
}

/// Raw text of one run's control log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventLog {
    text: String,
}

impl EventLog {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut text = String::new();
        for line in lines {
            text.push_str(line.as_ref());
            text.push('\n');
        }
        Self { text }
    }

    /// Read an exported log; a missing or non-UTF-8 file is a model error.
    pub fn read(path: &Path) -> TapOptResult<Self> {
        let bytes = fs::read(path).map_err(|err| {
            TapOptError::Model(format!("reading event log '{}': {err}", path.display()))
        })?;
        let text = String::from_utf8(bytes).map_err(|_| {
            TapOptError::Model(format!(
                "event log '{}' is not valid UTF-8",
                path.display()
            ))
        })?;
        Ok(Self { text })
    }

    pub fn write(&self, path: &Path) -> TapOptResult<()> {
        fs::write(path, &self.text)?;
        Ok(())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        self.text.lines().filter(|line| !line.trim().is_empty()).count()
    }

    pub fn tap_events<'a>(
        &'a self,
        filter: &'a RegulatorFilter,
    ) -> impl Iterator<Item = TapEvent> + 'a {
        self.text
            .lines()
            .enumerate()
            .filter_map(move |(idx, line)| {
                classify_tap(line, filter).map(|regulator| TapEvent {
                    line: idx + 1,
                    regulator: regulator.to_string(),
                })
            })
    }

    pub fn count_taps(&self, filter: &RegulatorFilter) -> u32 {
        self.tap_events(filter).count() as u32
    }

    /// Tap count per filtered regulator, including regulators with no events.
    pub fn tally(&self, filter: &RegulatorFilter) -> BTreeMap<String, u32> {
        let mut tally: BTreeMap<String, u32> =
            filter.names().map(|name| (name.to_string(), 0)).collect();
        for event in self.tap_events(filter) {
            *tally.entry(event.regulator).or_insert(0) += 1;
        }
        tally
    }
}

fn tokens(line: &str) -> impl Iterator<Item = String> + '_ {
    line.split(|c: char| {
        c == ',' || c.is_whitespace() || matches!(c, '=' | '*' | '(' | ')' | ';' | '"')
    })
    .filter(|token| !token.is_empty())
    .map(|token| token.to_ascii_uppercase())
}

/// Returns the matched regulator when `line` is a tap event for the filter.
fn classify_tap<'f>(line: &str, filter: &'f RegulatorFilter) -> Option<&'f str> {
    let mut is_tap = false;
    let mut device = None;
    for token in tokens(line) {
        if token == TAP_MARKER || token == TAP_MARKER_PLURAL {
            is_tap = true;
        } else if device.is_none() {
            device = filter.resolve(&token);
        }
    }
    if is_tap {
        device
    } else {
        None
    }
}
