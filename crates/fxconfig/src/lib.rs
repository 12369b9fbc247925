//! TOML description of an effect chain.
//!
//! ```toml
//! version = 1
//! size = [800, 600]
//! frame_interval = "16ms"
//! search_paths = ["shaders"]
//!
//! [[effects]]
//! kind = "pixelate"
//! pixel_size = 10
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

pub const CONFIG_VERSION: u32 = 1;
/// Matches the largest buffer edge the renderer accepts.
pub const MAX_DIMENSION: u32 = 16384;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub version: u32,
    #[serde(default = "default_size")]
    pub size: [u32; 2],
    /// Widget position inside the window, bottom-left origin.
    #[serde(default)]
    pub position: [f32; 2],
    #[serde(
        default = "default_frame_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub frame_interval: Duration,
    #[serde(default)]
    pub search_paths: Vec<String>,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

/// One `[[effects]]` entry, tagged by `kind`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum EffectSpec {
    PassThrough,
    Monochrome,
    Invert,
    Red,
    Green,
    Blue,
    Scanlines,
    Plasma,
    Fxaa,
    ChannelMix {
        #[serde(default = "default_channel_order")]
        order: [u8; 3],
    },
    Pixelate {
        #[serde(default = "default_pixel_size")]
        pixel_size: f32,
    },
    HorizontalBlur {
        #[serde(default = "default_blur_size")]
        size: f32,
    },
    VerticalBlur {
        #[serde(default = "default_blur_size")]
        size: f32,
    },
    File {
        source: String,
    },
    Glsl {
        body: String,
    },
}

impl EffectSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            EffectSpec::PassThrough => "pass_through",
            EffectSpec::Monochrome => "monochrome",
            EffectSpec::Invert => "invert",
            EffectSpec::Red => "red",
            EffectSpec::Green => "green",
            EffectSpec::Blue => "blue",
            EffectSpec::Scanlines => "scanlines",
            EffectSpec::Plasma => "plasma",
            EffectSpec::Fxaa => "fxaa",
            EffectSpec::ChannelMix { .. } => "channel_mix",
            EffectSpec::Pixelate { .. } => "pixelate",
            EffectSpec::HorizontalBlur { .. } => "horizontal_blur",
            EffectSpec::VerticalBlur { .. } => "vertical_blur",
            EffectSpec::File { .. } => "file",
            EffectSpec::Glsl { .. } => "glsl",
        }
    }

    fn problems(&self, index: usize) -> Vec<String> {
        let at = |message: String| format!("effects[{index}] ({}): {message}", self.kind());
        let positive = |name: &str, value: f32| {
            (!(value.is_finite() && value > 0.0))
                .then(|| at(format!("{name} must be a positive number, got {value}")))
        };
        match self {
            EffectSpec::ChannelMix { order } => order
                .iter()
                .filter(|channel| **channel > 2)
                .map(|channel| at(format!("channel index {channel} is outside 0..=2")))
                .collect(),
            EffectSpec::Pixelate { pixel_size } => {
                positive("pixel_size", *pixel_size).into_iter().collect()
            }
            EffectSpec::HorizontalBlur { size } | EffectSpec::VerticalBlur { size } => {
                positive("size", *size).into_iter().collect()
            }
            EffectSpec::File { source } if source.trim().is_empty() => {
                vec![at("source must not be empty".into())]
            }
            EffectSpec::Glsl { body } if body.trim().is_empty() => {
                vec![at("body must not be empty".into())]
            }
            _ => Vec::new(),
        }
    }
}

fn default_size() -> [u32; 2] {
    [800, 600]
}

fn default_frame_interval() -> Duration {
    Duration::from_millis(16)
}

fn default_channel_order() -> [u8; 3] {
    [1, 2, 0]
}

fn default_pixel_size() -> f32 {
    10.0
}

fn default_blur_size() -> f32 {
    4.0
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl de::Visitor<'_> for Visitor {
        type Value = Duration;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must be non-negative"))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Duration::from_secs(v))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if !v.is_finite() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v)
                .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl ChainConfig {
    /// Reads and validates a chain file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        text.parse()
    }

    /// Every problem found, in file order; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.version != CONFIG_VERSION {
            problems.push(format!(
                "unsupported config version {}; expected {CONFIG_VERSION}",
                self.version
            ));
        }

        let [width, height] = self.size;
        if width == 0 || height == 0 {
            problems.push(format!("size must be positive, got {width}x{height}"));
        } else if width > MAX_DIMENSION || height > MAX_DIMENSION {
            problems.push(format!(
                "size {width}x{height} exceeds the maximum of {MAX_DIMENSION}"
            ));
        }

        if self.position.iter().any(|value| !value.is_finite()) {
            problems.push("position must be finite".into());
        }

        if self.frame_interval.is_zero() {
            problems.push("frame_interval must be greater than zero".into());
        }

        for (index, path) in self.search_paths.iter().enumerate() {
            if path.trim().is_empty() {
                problems.push(format!("search_paths[{index}] must not be empty"));
            }
        }

        for (index, effect) in self.effects.iter().enumerate() {
            problems.extend(effect.problems(index));
        }
        problems
    }
}

impl FromStr for ChainConfig {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let config: ChainConfig = toml::from_str(input)?;
        let problems = config.validate();
        if problems.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}
