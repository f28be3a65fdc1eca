use serde::{Deserialize, Serialize};

const SYNTHETIC_START: u8 = 10;
const DISPLAY_CAP: u8 = 95;
const COMPLETE: u8 = 100;

/// Which value the progress bar shows while a job runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// Client-side counter, one step per poll tick.
    #[default]
    Synthetic,
    /// The `progress` value reported by the server.
    Server,
}

/// Both progress readings for one tick, plus the value the bar should draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressReport {
    pub server: Option<f64>,
    pub synthetic: u8,
    pub displayed: u8,
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    mode: ProgressMode,
    next_synthetic: u8,
    displayed: u8,
}

impl ProgressTracker {
    #[must_use]
    pub fn new(mode: ProgressMode) -> Self {
        Self {
            mode,
            next_synthetic: SYNTHETIC_START,
            displayed: 0,
        }
    }

    #[must_use]
    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    #[must_use]
    pub fn displayed(&self) -> u8 {
        self.displayed
    }

    /// Records one running tick. The displayed value never decreases and stays at or below 95.
    pub fn advance(&mut self, server: Option<f64>) -> ProgressReport {
        let synthetic = self.next_synthetic.min(DISPLAY_CAP);
        self.next_synthetic = self.next_synthetic.saturating_add(1);

        let candidate = match self.mode {
            ProgressMode::Synthetic => synthetic,
            ProgressMode::Server => server.map_or(self.displayed, clamp_server_progress),
        };
        self.displayed = self.displayed.max(candidate).min(DISPLAY_CAP);

        ProgressReport {
            server,
            synthetic,
            displayed: self.displayed,
        }
    }

    pub fn complete(&mut self, server: Option<f64>) -> ProgressReport {
        self.displayed = COMPLETE;
        ProgressReport {
            server,
            synthetic: COMPLETE,
            displayed: COMPLETE,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_server_progress(raw: f64) -> u8 {
    if !raw.is_finite() || raw <= 0.0 {
        return 0;
    }
    // Fractions in (0, 1] are treated as ratios.
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    percent.round().min(f64::from(DISPLAY_CAP)) as u8
}

#[must_use]
pub fn format_percent(value: u8) -> String {
    format!("{value}%")
}
