use crate::error::PipelineError;
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

const TIME_FORMAT: &str = "%H:%M";
const DATE_FORMAT: &str = "%d %B %Y";

/// Inclusive `[start, end]` window on the email's send time, as `HH:MM`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: String,
    pub end: String,
}

/// What the prover is asked to attest about the email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchPredicate {
    pattern: String,
    date: Option<String>,
    window: Option<TimeWindow>,
}

impl MatchPredicate {
    /// Predicate from a raw, anchored regular expression.
    pub fn new(pattern: impl Into<String>) -> Result<Self, PipelineError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(PipelineError::InvalidPredicate("empty pattern".to_string()));
        }
        // Prover-side patterns are ECMAScript-flavoured and may use lookaround.
        fancy_regex::Regex::new(&pattern)
            .map_err(|e| PipelineError::InvalidPredicate(format!("{pattern}: {e}")))?;
        Ok(Self {
            pattern,
            date: None,
            window: None,
        })
    }

    /// `^.*?<address>.*?$` with the address escaped.
    pub fn for_address(address: &str) -> Result<Self, PipelineError> {
        let address = address.trim();
        match address.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => {
                return Err(PipelineError::InvalidPredicate(format!(
                    "not an email address: {address:?}"
                )))
            }
        }
        Self::new(format!("^.*?{}.*?$", regex::escape(address)))
    }

    /// Restricts the proof to emails sent on `date` (e.g. `15 November 2024`).
    pub fn with_date(mut self, date: impl Into<String>) -> Result<Self, PipelineError> {
        let date = date.into();
        NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|e| PipelineError::InvalidPredicate(format!("date {date:?}: {e}")))?;
        self.date = Some(date);
        Ok(self)
    }

    /// Restricts the proof to emails sent between `start` and `end` inclusive.
    pub fn with_window(
        mut self,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        let (start, end) = (start.into(), end.into());
        let parse = |value: &str| {
            NaiveTime::parse_from_str(value, TIME_FORMAT)
                .map_err(|e| PipelineError::InvalidPredicate(format!("time {value:?}: {e}")))
        };
        if parse(&start)? > parse(&end)? {
            return Err(PipelineError::InvalidPredicate(format!(
                "window start {start} is after end {end}"
            )));
        }
        self.window = Some(TimeWindow { start, end });
        Ok(self)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }

    pub fn window(&self) -> Option<&TimeWindow> {
        self.window.as_ref()
    }
}
