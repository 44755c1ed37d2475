use crate::{Result, SessionError};
use serde::{Deserialize, Serialize};
use spatial_model::{DEFAULT_RADIUS, MAX_RADIUS};
use spatial_store::MarkerLoadOptions;
use std::path::Path;
use std::time::Duration;

pub const SAVE_THROTTLE_ENV: &str = "SPATIAL_SAVE_THROTTLE_MS";
pub const MARKER_BATCH_SIZE_ENV: &str = "SPATIAL_MARKER_BATCH_SIZE";
pub const BATCH_PAUSE_ENV: &str = "SPATIAL_BATCH_PAUSE_MS";
pub const FAILURE_RESET_DELAY_ENV: &str = "SPATIAL_FAILURE_RESET_DELAY_MS";

const MAX_SAVE_THROTTLE_MS: u64 = 10 * 60 * 1000;
const MAX_MARKER_BATCH_SIZE: usize = 10_000;
const MAX_BATCH_PAUSE_MS: u64 = 1_000;
const MAX_FAILURE_RESET_DELAY_MS: u64 = 60_000;

/// Tunables for the session controller.
///
/// Durations are written as milliseconds in TOML:
///
/// ```toml
/// [session]
/// save_throttle = 5000
/// marker_batch_size = 50
/// batch_pause = 10
/// failure_reset_delay = 2000
/// default_radius = 0.025
/// max_radius = 1.0
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(with = "millis")]
    pub save_throttle: Duration,
    pub marker_batch_size: usize,
    #[serde(with = "millis")]
    pub batch_pause: Duration,
    #[serde(with = "millis")]
    pub failure_reset_delay: Duration,
    pub default_radius: f32,
    pub max_radius: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_throttle: Duration::from_secs(5),
            marker_batch_size: 50,
            batch_pause: Duration::from_millis(10),
            failure_reset_delay: Duration::from_secs(2),
            default_radius: DEFAULT_RADIUS,
            max_radius: MAX_RADIUS,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    session: SessionConfig,
}

impl SessionConfig {
    /// Parses a TOML document with an optional `[session]` table.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|err| SessionError::Config(err.to_string()))?;
        Ok(file.session.sanitized())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SessionError::Config(format!("read {}: {err}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    /// Applies `SPATIAL_*` environment overrides on top of `self`.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        self.save_throttle = Duration::from_millis(parse_clamped(
            lookup(SAVE_THROTTLE_ENV).as_deref(),
            duration_ms(self.save_throttle),
            0,
            MAX_SAVE_THROTTLE_MS,
        ));
        self.marker_batch_size = parse_clamped(
            lookup(MARKER_BATCH_SIZE_ENV).as_deref(),
            self.marker_batch_size,
            1,
            MAX_MARKER_BATCH_SIZE,
        );
        self.batch_pause = Duration::from_millis(parse_clamped(
            lookup(BATCH_PAUSE_ENV).as_deref(),
            duration_ms(self.batch_pause),
            0,
            MAX_BATCH_PAUSE_MS,
        ));
        self.failure_reset_delay = Duration::from_millis(parse_clamped(
            lookup(FAILURE_RESET_DELAY_ENV).as_deref(),
            duration_ms(self.failure_reset_delay),
            0,
            MAX_FAILURE_RESET_DELAY_MS,
        ));
        self.sanitized()
    }

    /// Brings every field back into its valid range.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.marker_batch_size = self.marker_batch_size.clamp(1, MAX_MARKER_BATCH_SIZE);
        if !(self.max_radius.is_finite() && self.max_radius > 0.0 && self.max_radius <= MAX_RADIUS)
        {
            self.max_radius = MAX_RADIUS;
        }
        if !(self.default_radius.is_finite()
            && self.default_radius > 0.0
            && self.default_radius <= self.max_radius)
        {
            self.default_radius = DEFAULT_RADIUS.min(self.max_radius);
        }
        self
    }

    /// Radius for a user placement: non-positive or non-finite values get the
    /// default, large values are capped.
    #[must_use]
    pub fn clamp_radius(&self, radius: Option<f32>) -> f32 {
        match radius {
            Some(r) if r.is_finite() && r > 0.0 => r.min(self.max_radius),
            _ => self.default_radius,
        }
    }

    #[must_use]
    pub fn marker_load_options(&self) -> MarkerLoadOptions {
        MarkerLoadOptions {
            batch_size: self.marker_batch_size,
            pause: self.batch_pause,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_clamped<T>(raw: Option<&str>, default_value: T, min: T, max: T) -> T
where
    T: std::str::FromStr + Ord + Copy,
{
    raw.map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default_value)
        .clamp(min, max)
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(super::duration_ms(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
