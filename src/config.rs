use std::env;
use std::str::FromStr;

use thiserror::Error;

/// Returns the value of the named environment variable if it exists or panics.
pub fn get_variable(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("must define {} environment variable", name))
}

/// Returns the parsed value of the named environment variable, or
/// `default` if it isn't set.
pub fn get_optional_variable<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Unparseable { name, value }),
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not parse {name}={value:?}")]
    Unparseable { name: &'static str, value: String },

    #[error("{name} must be at least {minimum}")]
    TooSmall { name: &'static str, minimum: u32 },
}

/// Tunables for querying and deleting listings.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Page size used when a request doesn't specify one.
    pub default_page_size: u16,

    /// The largest page a caller may ask for.
    pub max_page_size: u16,

    /// How many extra native records to fetch per page, to make up for
    /// the ones the residual filter discards.
    pub over_fetch: u16,

    /// How many units to delete per batch when deleting a listing.
    pub unit_batch_size: u16,

    /// How many native batches a single page may consume before it is
    /// returned short.
    pub fill_batches: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            default_page_size: 12,
            max_page_size: 100,
            over_fetch: 5,
            unit_batch_size: 500,
            fill_batches: 1,
        }
    }
}

impl Config {
    /// Reads `HOMEBASE_*` variables, falling back to the defaults for
    /// any that are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let config = Config {
            default_page_size: get_optional_variable(
                "HOMEBASE_DEFAULT_PAGE_SIZE",
                defaults.default_page_size,
            )?,
            max_page_size: get_optional_variable("HOMEBASE_MAX_PAGE_SIZE", defaults.max_page_size)?,
            over_fetch: get_optional_variable("HOMEBASE_OVER_FETCH", defaults.over_fetch)?,
            unit_batch_size: get_optional_variable(
                "HOMEBASE_UNIT_BATCH_SIZE",
                defaults.unit_batch_size,
            )?,
            fill_batches: get_optional_variable("HOMEBASE_FILL_BATCHES", defaults.fill_batches)?,
        };

        config.check()?;

        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        let at_least_one = [
            ("HOMEBASE_DEFAULT_PAGE_SIZE", u32::from(self.default_page_size)),
            ("HOMEBASE_MAX_PAGE_SIZE", u32::from(self.max_page_size)),
            ("HOMEBASE_UNIT_BATCH_SIZE", u32::from(self.unit_batch_size)),
            ("HOMEBASE_FILL_BATCHES", u32::from(self.fill_batches)),
        ];

        for &(name, value) in at_least_one.iter() {
            if value < 1 {
                return Err(ConfigError::TooSmall { name, minimum: 1 });
            }
        }

        if self.default_page_size > self.max_page_size {
            return Err(ConfigError::TooSmall {
                name: "HOMEBASE_MAX_PAGE_SIZE",
                minimum: u32::from(self.default_page_size),
            });
        }

        Ok(())
    }
}
