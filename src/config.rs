//! Mechanism for loading and sharing the analysis configuration

use crate::{
    ensemble::EnsembleOptions,
    fourvec::KinematicsPolicy,
    numeric::{Float, Tolerance},
    scheduling::DEFAULT_BATCH_SIZE,
};
use eyre::{ensure, eyre, Result, WrapErr};
use log::info;
use std::{fs, path::Path, str::FromStr};

/// Analysis configuration
#[derive(Clone, Debug, PartialEq)]
pub struct Configuration {
    /// Relative width of the band of accepted negative mass²
    pub spacelike_tolerance: Float,

    /// Whether spacelike 4-vectors are accepted at all
    pub allow_spacelike: bool,

    /// Relative tolerance of 4-vector comparisons
    pub comparison_tolerance: Float,

    /// Number of events fetched from the store per round-trip
    pub read_batch_size: usize,
}
//
impl Configuration {
    /// Load the configuration from a file, check it, and log it
    pub fn load(file_name: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.as_ref();
        let config_str = fs::read_to_string(file_name)
            .wrap_err_with(|| format!("Could not read configuration file {}", file_name.display()))?;
        Self::parse(&config_str)
            .wrap_err_with(|| format!("Invalid configuration file {}", file_name.display()))
    }

    /// Parse the configuration from the contents of a configuration file
    pub fn parse(config_str: &str) -> Result<Self> {
        // Values come first on each line, anything after them is a comment.
        // Blank lines are skipped.
        let mut config_iter = config_str
            .lines()
            .filter_map(|line| line.split_whitespace().next());

        // Values are positional, so name each one after the field it fills
        // in order to get readable errors
        let mut next_item = |name: &'static str| -> Result<ConfigItem> {
            config_iter
                .next()
                .map(|data| ConfigItem::new(name, data))
                .ok_or_else(|| eyre!("Missing configuration of {}", name))
        };

        let config = Configuration {
            spacelike_tolerance: next_item("spacelike_tolerance")?.parse::<Float>()?,
            allow_spacelike: next_item("allow_spacelike")?.parse_bool()?,
            comparison_tolerance: next_item("comparison_tolerance")?.parse::<Float>()?,
            read_batch_size: next_item("read_batch_size")?.parse::<usize>()?,
        };

        // Tolerances are relative widths, NaN or negative ones are meaningless
        ensure!(
            config.spacelike_tolerance.is_finite() && config.spacelike_tolerance >= 0.,
            "The spacelike tolerance must be a non-negative number"
        );
        ensure!(
            config.comparison_tolerance.is_finite() && config.comparison_tolerance >= 0.,
            "The comparison tolerance must be a non-negative number"
        );
        ensure!(
            config.read_batch_size > 0,
            "Please read at least one event per batch"
        );

        config.log();
        Ok(config)
    }

    /// Log the configuration
    pub fn log(&self) {
        info!("spacelike_tolerance  : {}", self.spacelike_tolerance);
        info!("allow_spacelike      : {}", self.allow_spacelike);
        info!("comparison_tolerance : {}", self.comparison_tolerance);
        info!("read_batch_size      : {}", self.read_batch_size);
    }

    /// Validation rules for user-provided 4-vectors
    pub fn kinematics(&self) -> KinematicsPolicy {
        if self.allow_spacelike {
            KinematicsPolicy::allow_spacelike()
        } else {
            KinematicsPolicy::reject_spacelike(self.spacelike_tolerance)
        }
    }

    /// Tolerance of 4-vector comparisons
    pub fn comparison_tolerance(&self) -> Tolerance {
        Tolerance::relative(self.comparison_tolerance)
    }

    /// Tuning of ensemble store interactions
    pub fn ensemble_options(&self) -> EnsembleOptions {
        EnsembleOptions::with_read_batch_size(self.read_batch_size)
    }
}
//
impl Default for Configuration {
    fn default() -> Self {
        Self {
            spacelike_tolerance: KinematicsPolicy::DEFAULT_SPACELIKE_TOLERANCE,
            allow_spacelike: false,
            comparison_tolerance: Tolerance::DEFAULT_RELATIVE,
            read_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Raw configuration value, along with the name of the field it fills
struct ConfigItem<'data> {
    name: &'static str,
    data: &'data str,
}
//
impl<'data> ConfigItem<'data> {
    fn new(name: &'static str, data: &'data str) -> Self {
        Self { name, data }
    }

    /// Parse with the standard `FromStr` logic
    fn parse<T: FromStr>(self) -> Result<T>
    where
        <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
    {
        self.data
            .parse::<T>()
            .wrap_err_with(|| format!("Could not parse configuration of {}", self.name))
    }

    /// Parse a boolean, also accepting the Fortran spelling
    fn parse_bool(self) -> Result<bool> {
        match self.data.to_lowercase().as_str() {
            ".true." => Ok(true),
            ".false." => Ok(false),
            _ => self.parse::<bool>(),
        }
    }
}
