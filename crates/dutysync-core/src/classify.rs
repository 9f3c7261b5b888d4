//! Classification of per-record remote errors.
//!
//! The remote service reports refusals as free text. A small table of known
//! substrings marks the refusals that are anticipated (unknown user, no
//! permission on that profile); everything else is a real failure.

use serde::Serialize;

use crate::model::{BatchOutcome, SyncStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpectedKind {
    UnknownIdentity,
    PermissionDenied,
}

impl ExpectedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpectedKind::UnknownIdentity => "unknown_identity",
            ExpectedKind::PermissionDenied => "permission_denied",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "unknown_identity" => Some(ExpectedKind::UnknownIdentity),
            "permission_denied" => Some(ExpectedKind::PermissionDenied),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "class", content = "kind")]
pub enum ClassifiedOutcome {
    Ok,
    Expected(ExpectedKind),
    Real,
}

impl ClassifiedOutcome {
    /// Whether the outcome lets the contributing files advance.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClassifiedOutcome::Real)
    }
}

const DEFAULT_PATTERNS: &[(ExpectedKind, &str)] = &[
    (ExpectedKind::UnknownIdentity, "does not exist"),
    (ExpectedKind::UnknownIdentity, "not found in the organization"),
    (ExpectedKind::UnknownIdentity, "user not found"),
    (ExpectedKind::PermissionDenied, "permission denied"),
    (ExpectedKind::PermissionDenied, "insufficient permission"),
    (ExpectedKind::PermissionDenied, "does not have permission"),
    (ExpectedKind::PermissionDenied, "not permitted to update"),
];

/// Substrings (matched case-insensitively) that identify expected refusals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorVocabulary {
    patterns: Vec<(ExpectedKind, String)>,
}

impl Default for ErrorVocabulary {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_PATTERNS
                .iter()
                .map(|(kind, text)| (*kind, (*text).to_string()))
                .collect(),
        }
    }
}

impl ErrorVocabulary {
    /// Parses `kind:substring` pairs separated by `;`, e.g.
    /// `unknown_identity:does not exist;permission_denied:access denied`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut patterns = Vec::new();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (kind, text) = entry
                .split_once(':')
                .ok_or_else(|| format!("pattern '{entry}' is not of the form kind:substring"))?;
            let kind = ExpectedKind::parse(kind)
                .ok_or_else(|| format!("unknown expected-error kind '{}'", kind.trim()))?;
            let text = text.trim().to_lowercase();
            if text.is_empty() {
                return Err(format!("pattern '{entry}' has an empty substring"));
            }
            patterns.push((kind, text));
        }
        if patterns.is_empty() {
            return Err("expected-error vocabulary is empty".to_string());
        }
        Ok(Self { patterns })
    }

    pub fn match_detail(&self, detail: &str) -> Option<ExpectedKind> {
        let detail = detail.to_lowercase();
        self.patterns
            .iter()
            .find(|(_, text)| detail.contains(text.as_str()))
            .map(|(kind, _)| *kind)
    }

    pub fn classify(&self, outcome: &BatchOutcome) -> ClassifiedOutcome {
        match outcome.sync_status {
            SyncStatus::Ok => ClassifiedOutcome::Ok,
            SyncStatus::Error => match self.match_detail(&outcome.detail) {
                Some(kind) => ClassifiedOutcome::Expected(kind),
                None => ClassifiedOutcome::Real,
            },
        }
    }
}
