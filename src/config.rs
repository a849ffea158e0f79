//! Layer Configuration Records
//!
//! Each configurable layer reads a small record: stride and padding for
//! convolution, window size for pooling, mode and running statistics for batch
//! normalization, retention probability and seed for dropout.
//!
//! All records derive `Serialize`/`Deserialize`, so they can be loaded from
//! JSON:
//!
//! ```rust
//! use convnet_layers::config::{DropoutParam, Mode};
//!
//! let param: DropoutParam = serde_json::from_str(r#"{"p": 0.75, "mode": "train", "seed": 123}"#)?;
//! assert_eq!(param.mode, Mode::Train);
//! assert_eq!(param.seed, Some(123));
//! # Ok::<(), serde_json::Error>(())
//! ```
//!
//! ## Cross-call state
//!
//! [`BatchNormParam`] is the only record with state that outlives a single
//! call. Its [`RunningStats`] are updated in place by every train-mode forward
//! pass and read back by test-mode passes. Keep one `BatchNormParam` per
//! normalization layer and pass it by `&mut` on every call.

use crate::error::{LayerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Train or test behaviour for batch normalization and dropout
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Mode {
    Train,
    Test,
}

impl FromStr for Mode {
    type Err = LayerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            other => Err(LayerError::InvalidMode(other.to_string())),
        }
    }
}

impl TryFrom<String> for Mode {
    type Error = LayerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Mode> for String {
    fn from(mode: Mode) -> Self {
        mode.to_string()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Train => f.write_str("train"),
            Mode::Test => f.write_str("test"),
        }
    }
}

/// Convolution hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvParam {
    /// Pixels between adjacent receptive fields, both directions
    pub stride: usize,
    /// Zero padding added on every side of the spatial dimensions
    pub pad: usize,
}

impl ConvParam {
    pub fn new(stride: usize, pad: usize) -> Self {
        Self { stride, pad }
    }

    /// Stride 1 with the padding that preserves spatial size for an odd
    /// `filter_size`
    pub fn same(filter_size: usize) -> Self {
        Self {
            stride: 1,
            pad: filter_size.saturating_sub(1) / 2,
        }
    }
}

/// Max pooling hyperparameters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolParam {
    pub pool_height: usize,
    pub pool_width: usize,
    pub stride: usize,
}

impl PoolParam {
    pub fn new(pool_height: usize, pool_width: usize, stride: usize) -> Self {
        Self {
            pool_height,
            pool_width,
            stride,
        }
    }
}

impl Default for PoolParam {
    /// 2x2 windows with stride 2
    fn default() -> Self {
        Self::new(2, 2, 2)
    }
}

/// Exponentially averaged per-feature statistics kept by batch normalization
///
/// Both vectors start empty and are sized to the feature count on the first
/// forward pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    pub mean: Vec<f64>,
    pub var: Vec<f64>,
}

impl RunningStats {
    /// Explicit statistics, e.g. restored from a checkpoint
    pub fn new(mean: Vec<f64>, var: Vec<f64>) -> Self {
        Self { mean, var }
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty() && self.var.is_empty()
    }
}

fn default_eps() -> f64 {
    1e-5
}

fn default_momentum() -> f64 {
    0.9
}

/// Batch normalization configuration plus its running statistics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchNormParam {
    pub mode: Mode,
    /// Added to the variance before the square root
    #[serde(default = "default_eps")]
    pub eps: f64,
    /// Weight of the old running value in each update
    #[serde(default = "default_momentum")]
    pub momentum: f64,
    #[serde(default)]
    pub running: RunningStats,
}

impl BatchNormParam {
    /// `eps = 1e-5`, `momentum = 0.9`, empty running statistics
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            eps: default_eps(),
            momentum: default_momentum(),
            running: RunningStats::default(),
        }
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    pub fn with_momentum(mut self, momentum: f64) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_running(mut self, running: RunningStats) -> Self {
        self.running = running;
        self
    }
}

/// Dropout configuration
///
/// `p` is the probability of **keeping** a unit, not of dropping it:
/// `p = 1.0` keeps everything and `p = 0.0` zeroes the whole input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DropoutParam {
    /// Retention probability in `[0, 1]`
    pub p: f64,
    pub mode: Mode,
    /// Reseed the mask generator on every call; makes the mask reproducible
    #[serde(default)]
    pub seed: Option<u64>,
}

impl DropoutParam {
    pub fn new(p: f64, mode: Mode) -> Self {
        Self { p, mode, seed: None }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check `p` lies in `[0, 1]`
    pub fn validate(&self) -> Result<()> {
        if (0.0..=1.0).contains(&self.p) {
            Ok(())
        } else {
            Err(LayerError::InvalidProbability(self.p))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse() {
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("test".parse::<Mode>().unwrap(), Mode::Test);
        assert_eq!(
            "eval".parse::<Mode>(),
            Err(LayerError::InvalidMode("eval".to_string()))
        );
    }

    #[test]
    fn test_mode_display_roundtrip() {
        for mode in [Mode::Train, Mode::Test] {
            assert_eq!(mode.to_string().parse::<Mode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_conv_param_same() {
        assert_eq!(ConvParam::same(3), ConvParam::new(1, 1));
        assert_eq!(ConvParam::same(7), ConvParam::new(1, 3));
        assert_eq!(ConvParam::same(1), ConvParam::new(1, 0));
    }

    #[test]
    fn test_batchnorm_defaults() {
        let param = BatchNormParam::new(Mode::Train);
        assert_eq!(param.eps, 1e-5);
        assert_eq!(param.momentum, 0.9);
        assert!(param.running.is_empty());
    }

    #[test]
    fn test_dropout_validate() {
        assert!(DropoutParam::new(0.0, Mode::Train).validate().is_ok());
        assert!(DropoutParam::new(1.0, Mode::Train).validate().is_ok());
        assert_eq!(
            DropoutParam::new(1.5, Mode::Train).validate(),
            Err(LayerError::InvalidProbability(1.5))
        );
        assert!(DropoutParam::new(f64::NAN, Mode::Train).validate().is_err());
    }
}
