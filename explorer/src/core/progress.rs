//! Folding server-reported progress into the session's progress view.
//!
//! Updates replace, never merge with, the counters they carry. The one
//! exception is `validation.current`, which only moves forward: a smaller value
//! than previously observed is discarded and reported as an anomaly.

use serde::{Deserialize, Serialize};

use crate::core::types::ValidationProgress;

/// Analysis of the screen the agent is currently looking at.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScreenAnalysis {
    pub screen_name: String,
    pub elements_found: Vec<String>,
    pub reasoning: String,
    pub screenshot: Option<String>,
}

/// One server-reported update. `None` fields leave the view untouched.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    pub current_step: Option<String>,
    pub screens_analyzed: Option<u32>,
    pub total_screens_found: Option<u32>,
    pub nodes_proposed: Option<u32>,
    pub edges_proposed: Option<u32>,
    pub current_analysis: Option<ScreenAnalysis>,
    pub validation: Option<ValidationProgress>,
}

impl ProgressUpdate {
    pub fn step(text: impl Into<String>) -> Self {
        Self {
            current_step: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn proposed(nodes: usize, edges: Option<usize>) -> Self {
        Self {
            nodes_proposed: Some(saturating_u32(nodes)),
            edges_proposed: edges.map(saturating_u32),
            ..Self::default()
        }
    }

    pub fn validation(current: u32, total: u32) -> Self {
        Self {
            validation: Some(ValidationProgress { current, total }),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Aggregated progress as the presentation layer sees it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: String,
    pub screens_analyzed: u32,
    pub total_screens_found: u32,
    pub nodes_proposed: u32,
    pub edges_proposed: u32,
    pub current_analysis: Option<ScreenAnalysis>,
    /// Unset until validation begins.
    pub validation: Option<ValidationProgress>,
}

/// Irregular update that was (partly) discarded instead of applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAnomaly {
    /// `validation.current` went backwards; the validation counters were kept.
    ValidationRegressed { previous: u32, received: u32 },
    /// The update tried to change a total that is already fixed.
    ValidationTotalChanged { fixed: u32, received: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProgressAggregator {
    view: Progress,
    fixed_total: Option<u32>,
}

impl ProgressAggregator {
    pub fn view(&self) -> &Progress {
        &self.view
    }

    /// Start counting validation over `total` items. Fixes the total.
    pub fn begin_validation(&mut self, total: u32) {
        self.fixed_total = Some(total);
        self.view.validation = Some(ValidationProgress { current: 0, total });
    }

    /// Fold `update` into the view. Returns the anomalies that were discarded.
    pub fn apply(&mut self, update: ProgressUpdate) -> Vec<ProgressAnomaly> {
        let mut anomalies = Vec::new();

        if let Some(step) = update.current_step {
            self.view.current_step = step;
        }
        if let Some(value) = update.screens_analyzed {
            self.view.screens_analyzed = value;
        }
        if let Some(value) = update.total_screens_found {
            self.view.total_screens_found = value;
        }
        if let Some(value) = update.nodes_proposed {
            self.view.nodes_proposed = value;
        }
        if let Some(value) = update.edges_proposed {
            self.view.edges_proposed = value;
        }
        if let Some(analysis) = update.current_analysis {
            self.view.current_analysis = Some(analysis);
        }
        if let Some(received) = update.validation {
            self.apply_validation(received, &mut anomalies);
        }

        anomalies
    }

    fn apply_validation(
        &mut self,
        received: ValidationProgress,
        anomalies: &mut Vec<ProgressAnomaly>,
    ) {
        let previous = self.view.validation.map(|v| v.current).unwrap_or(0);
        if received.current < previous {
            anomalies.push(ProgressAnomaly::ValidationRegressed {
                previous,
                received: received.current,
            });
            return;
        }

        let total = match self.fixed_total {
            Some(fixed) => {
                if received.total != fixed {
                    anomalies.push(ProgressAnomaly::ValidationTotalChanged {
                        fixed,
                        received: received.total,
                    });
                }
                fixed
            }
            None => received.total,
        };
        self.view.validation = Some(ValidationProgress {
            current: received.current,
            total,
        });
    }
}

fn saturating_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
