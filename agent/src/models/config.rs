//! Device configuration served by the backend

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// `GET /api/device/config/` response body. The backend is authoritative;
/// this is only a cached copy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub gateway_url: Option<String>,

    #[serde(default)]
    pub device_id: Option<String>,

    /// Local-time windows during which updates may be applied
    #[serde(default)]
    pub update_windows: Vec<UpdateWindow>,
}

/// A daily update window, `HH:MM` to `HH:MM` in device local time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateWindow {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub start_time: String,

    #[serde(default)]
    pub end_time: String,
}

impl UpdateWindow {
    /// Whether `now` falls inside the window. `None` if the window is malformed.
    pub fn contains(&self, now: NaiveTime) -> Option<bool> {
        let start = NaiveTime::parse_from_str(self.start_time.trim(), "%H:%M").ok()?;
        let end = NaiveTime::parse_from_str(self.end_time.trim(), "%H:%M").ok()?;

        if start <= end {
            Some(start <= now && now <= end)
        } else {
            // Crosses midnight, e.g. 23:00 - 06:00
            Some(now >= start || now <= end)
        }
    }

    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }
}

impl DeviceConfig {
    /// Updates are allowed when no windows are configured or `now` is inside one
    pub fn is_update_allowed(&self, now: NaiveTime) -> bool {
        if self.update_windows.is_empty() {
            return true;
        }

        for window in &self.update_windows {
            match window.contains(now) {
                Some(true) => {
                    debug!("Inside update window: {}", window.label());
                    return true;
                }
                Some(false) => {}
                None => {
                    warn!(
                        "Ignoring malformed update window {:?} ({} - {})",
                        window.label(),
                        window.start_time,
                        window.end_time
                    );
                }
            }
        }

        false
    }
}
