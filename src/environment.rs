use std::sync::Arc;

use log::{debug, Logger};
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::config::{get_variable, Config, ConfigError};
use crate::db::{Db, PgDb};
use crate::store::{S3Store, Store};

/// Everything an operation needs to reach the backends.
#[derive(Clone)]
pub struct Environment {
    pub logger: Arc<Logger>,
    pub db: Arc<dyn Db + Send + Sync>,
    pub store: Arc<dyn Store>,
    pub config: Config,
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Invalid configuration")]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Could not connect to the database")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    #[error("Could not set up the S3 client")]
    Tls {
        #[from]
        source: rusoto_core::request::TlsError,
    },
}

impl Environment {
    pub fn new(
        logger: Arc<Logger>,
        db: Arc<dyn Db + Send + Sync>,
        store: Arc<dyn Store>,
        config: Config,
    ) -> Self {
        Self {
            logger,
            db,
            store,
            config,
        }
    }

    /// Connects to Postgres and S3 as configured by the environment
    /// (and `.env`, if present).
    pub async fn from_env(logger: Arc<Logger>) -> Result<Self, EnvironmentError> {
        dotenv::dotenv().ok();

        let config = Config::from_env()?;
        debug!(logger, "Loaded configuration"; "config" => ?config);

        let connection_string = get_variable("HOMEBASE_DB_CONNECTION_STRING");
        let pool_size: u32 = crate::config::get_optional_variable("HOMEBASE_DB_POOL_SIZE", 5)?;

        debug!(logger, "Connecting to database..."; "pool_size" => pool_size);
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(&connection_string)
            .await?;

        debug!(logger, "Creating S3 client...");
        let store = S3Store::from_env()?;

        Ok(Environment::new(
            logger,
            Arc::new(PgDb::new(pool)),
            Arc::new(store),
            config,
        ))
    }
}
