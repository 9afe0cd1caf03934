//! Drift comparator
//!
//! Structural key-wise diff between a baseline snapshot and a current one.
//! Keys present on one side only, or present on both with differing values,
//! are reported. Ordering of keys is irrelevant; value comparison is exact
//! string equality, no tolerance windows.

use crate::capture::Snapshot;
use crate::notify::{Notification, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a parameter drifted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
    /// Present on both sides with differing values
    Changed,
    /// Present in the baseline only
    OnlyInBaseline,
    /// Present in the current capture only
    OnlyInCurrent,
}

/// One drifted parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEntry {
    pub param: String,
    pub baseline: Option<String>,
    pub current: Option<String>,
    pub kind: DriftKind,
}

/// Result of comparing two snapshots of the same target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub host: String,
    pub target: String,
    pub baseline_captured_at: DateTime<Utc>,
    pub current_captured_at: DateTime<Utc>,
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    /// True when no parameter drifted
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }

    /// Human-readable change report
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if self.is_clean() {
            out.push_str(&format!(
                "No drift detected on {} ({})\n",
                self.target, self.host
            ));
            return out;
        }

        out.push_str(&format!(
            "Configuration drift detected on {} ({}): {} parameter(s)\n",
            self.target,
            self.host,
            self.entries.len()
        ));
        out.push_str(&format!(
            "Baseline: {}  Current: {}\n\n",
            self.baseline_captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.current_captured_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        for entry in &self.entries {
            match entry.kind {
                DriftKind::Changed => out.push_str(&format!(
                    "  ~ {}: {} -> {}\n",
                    entry.param,
                    entry.baseline.as_deref().unwrap_or("-"),
                    entry.current.as_deref().unwrap_or("-")
                )),
                DriftKind::OnlyInBaseline => out.push_str(&format!(
                    "  - {}: {} (removed)\n",
                    entry.param,
                    entry.baseline.as_deref().unwrap_or("-")
                )),
                DriftKind::OnlyInCurrent => out.push_str(&format!(
                    "  + {}: {} (new)\n",
                    entry.param,
                    entry.current.as_deref().unwrap_or("-")
                )),
            }
        }
        out
    }

    /// Notification payload for the dispatcher
    pub fn to_notification(&self) -> Notification {
        if self.is_clean() {
            Notification {
                title: format!("No drift: {} ({})", self.target, self.host),
                severity: Severity::Info,
                body: self.render_text(),
            }
        } else {
            Notification {
                title: format!(
                    "Configuration drift: {} ({}) - {} parameter(s)",
                    self.target,
                    self.host,
                    self.entries.len()
                ),
                severity: Severity::Warning,
                body: self.render_text(),
            }
        }
    }
}

/// Compare a baseline snapshot against the current one.
pub fn compare(baseline: &Snapshot, current: &Snapshot) -> DriftReport {
    let mut entries = Vec::new();

    for (param, base_value) in &baseline.params {
        match current.params.get(param) {
            Some(cur_value) if cur_value == base_value => {}
            Some(cur_value) => entries.push(DriftEntry {
                param: param.clone(),
                baseline: Some(base_value.clone()),
                current: Some(cur_value.clone()),
                kind: DriftKind::Changed,
            }),
            None => entries.push(DriftEntry {
                param: param.clone(),
                baseline: Some(base_value.clone()),
                current: None,
                kind: DriftKind::OnlyInBaseline,
            }),
        }
    }

    for (param, cur_value) in &current.params {
        if !baseline.params.contains_key(param) {
            entries.push(DriftEntry {
                param: param.clone(),
                baseline: None,
                current: Some(cur_value.clone()),
                kind: DriftKind::OnlyInCurrent,
            });
        }
    }

    DriftReport {
        host: current.host.clone(),
        target: current.target.clone(),
        baseline_captured_at: baseline.captured_at,
        current_captured_at: current.captured_at,
        entries,
    }
}
