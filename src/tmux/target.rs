//! Tmux target addresses
//!
//! A target is `session:window` or `session:window.pane`. Session names are
//! restricted to `[A-Za-z0-9_-]+` so an address can never smuggle tmux
//! target syntax (`=`, `$`, `@`, `%`, `{}`) or shell metacharacters.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

static SESSION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Address of a tmux window or pane
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Target {
    session: String,
    window: u32,
    pane: Option<u32>,
}

impl Target {
    /// Build a window target, validating the session name
    pub fn new(session: impl Into<String>, window: u32) -> Result<Self, ValidationError> {
        let session = session.into();
        validate_session_name(&session)?;
        Ok(Self {
            session,
            window,
            pane: None,
        })
    }

    /// Address a specific pane within this window
    pub fn with_pane(mut self, pane: u32) -> Self {
        self.pane = Some(pane);
        self
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn pane(&self) -> Option<u32> {
        self.pane
    }

    /// The window this target lives in, without the pane component
    pub fn window_target(&self) -> Self {
        Self {
            session: self.session.clone(),
            window: self.window,
            pane: None,
        }
    }
}

/// Check a session name against the address grammar
pub fn validate_session_name(name: &str) -> Result<(), ValidationError> {
    if SESSION_NAME.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::InvalidTarget {
            input: name.to_string(),
            reason: "session name must match [A-Za-z0-9_-]+".to_string(),
        })
    }
}

fn parse_index(input: &str, field: &str, digits: &str) -> Result<u32, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidTarget {
        input: input.to_string(),
        reason,
    };

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("{field} index must be a non-negative integer")));
    }
    // Leading zeros would not survive formatting
    if digits.len() > 1 && digits.starts_with('0') {
        return Err(invalid(format!("{field} index has leading zeros")));
    }
    digits
        .parse::<u32>()
        .map_err(|_| invalid(format!("{field} index out of range")))
}

impl FromStr for Target {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (session, rest) = s.split_once(':').ok_or_else(|| ValidationError::InvalidTarget {
            input: s.to_string(),
            reason: "expected <session>:<window>[.<pane>]".to_string(),
        })?;

        if !SESSION_NAME.is_match(session) {
            return Err(ValidationError::InvalidTarget {
                input: s.to_string(),
                reason: "session name must match [A-Za-z0-9_-]+".to_string(),
            });
        }

        let (window, pane) = match rest.split_once('.') {
            Some((window, pane)) => (
                parse_index(s, "window", window)?,
                Some(parse_index(s, "pane", pane)?),
            ),
            None => (parse_index(s, "window", rest)?, None),
        };

        Ok(Self {
            session: session.to_string(),
            window,
            pane,
        })
    }
}

impl TryFrom<String> for Target {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Target> for String {
    fn from(target: Target) -> Self {
        target.to_string()
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pane {
            Some(pane) => write!(f, "{}:{}.{}", self.session, self.window, pane),
            None => write!(f, "{}:{}", self.session, self.window),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_window_and_pane() {
        let target: Target = "proj:0".parse().unwrap();
        assert_eq!(target.session(), "proj");
        assert_eq!(target.window(), 0);
        assert_eq!(target.pane(), None);

        let target: Target = "my_agent-2:3.1".parse().unwrap();
        assert_eq!(target.session(), "my_agent-2");
        assert_eq!(target.window(), 3);
        assert_eq!(target.pane(), Some(1));
        assert_eq!(target.window_target().to_string(), "my_agent-2:3");
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        for bad in [
            "",
            "proj",
            "proj:",
            ":0",
            "proj:-1",
            "proj:a",
            "proj:0.",
            "proj:0.1.2",
            "pr oj:0",
            "proj;rm -rf /:0",
            "$(whoami):0",
            "proj:0;ls",
            "proj:01",
            "proj:99999999999",
            "=proj:0",
        ] {
            assert!(bad.parse::<Target>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_new_validates_session() {
        assert!(Target::new("ok-name", 1).is_ok());
        assert!(Target::new("bad name", 1).is_err());
        assert!(Target::new("", 1).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let target: Target = "proj:2.1".parse().unwrap();
        let json = serde_json::to_string(&target).unwrap();
        assert_eq!(json, "\"proj:2.1\"");
        let back: Target = serde_json::from_str(&json).unwrap();
        assert_eq!(back, target);
        assert!(serde_json::from_str::<Target>("\"bad target\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_grammar_strings_round_trip(
            session in "[A-Za-z0-9_-]{1,16}",
            window in 0u32..100_000,
            pane in proptest::option::of(0u32..1_000),
        ) {
            let s = match pane {
                Some(p) => format!("{session}:{window}.{p}"),
                None => format!("{session}:{window}"),
            };
            let parsed: Target = s.parse().unwrap();
            prop_assert_eq!(parsed.to_string(), s);
        }

        #[test]
        fn prop_non_grammar_strings_rejected(s in ".*") {
            let grammar = Regex::new(r"^[A-Za-z0-9_-]+:[0-9]+(\.[0-9]+)?$").unwrap();
            if !grammar.is_match(&s) {
                prop_assert!(s.parse::<Target>().is_err());
            }
        }
    }
}
