//! Progress reporting for download passes.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Projects,
    PunchlistItems,
    Photos,
    Users,
    Complete,
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStage::Projects => write!(f, "projects"),
            SyncStage::PunchlistItems => write!(f, "punchlist_items"),
            SyncStage::Photos => write!(f, "photos"),
            SyncStage::Users => write!(f, "users"),
            SyncStage::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncProgress {
    pub current: usize,
    pub total: usize,
    pub stage: SyncStage,
    pub message: String,
}

/// Progress callback handed to a sync pass.
pub type ProgressFn<'a> = dyn FnMut(SyncProgress) + Send + 'a;

/// Keeps `current` and `total` cumulative across the stages of one pass.
///
/// `total` grows as work is discovered (items of each project, photos of
/// each item). Neither counter ever decreases.
pub(crate) struct ProgressTracker<'a, 'f> {
    current: usize,
    total: usize,
    callback: Option<&'a mut ProgressFn<'f>>,
}

impl<'a, 'f> ProgressTracker<'a, 'f> {
    pub fn new(callback: Option<&'a mut ProgressFn<'f>>) -> Self {
        Self {
            current: 0,
            total: 0,
            callback,
        }
    }

    /// Adds `units` of upcoming work.
    pub fn plan(&mut self, units: usize) {
        self.total += units;
    }

    /// Marks one unit finished and reports it.
    pub fn advance(&mut self, stage: SyncStage, message: impl Into<String>) {
        self.current += 1;
        self.total = self.total.max(self.current);
        self.emit(stage, message.into());
    }

    /// Reports a stage change without finishing any work.
    pub fn announce(&mut self, stage: SyncStage, message: impl Into<String>) {
        self.emit(stage, message.into());
    }

    /// Final event; skipped units count as done so `current == total`.
    pub fn complete(&mut self, message: impl Into<String>) {
        self.current = self.total;
        self.emit(SyncStage::Complete, message.into());
    }

    fn emit(&mut self, stage: SyncStage, message: String) {
        if let Some(callback) = self.callback.as_deref_mut() {
            callback(SyncProgress {
                current: self.current,
                total: self.total,
                stage,
                message,
            });
        }
    }
}
