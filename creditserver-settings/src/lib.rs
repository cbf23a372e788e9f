use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

static PREFIX: &str = "creditserver";

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub host: String,
    pub port: u16,

    /// The URL of the MySQL database.
    pub database_url: String,
    /// The max size of the database connection pool.
    pub database_pool_max_size: u32,
    /// Pool timeout when waiting for a slot to become available, in seconds
    pub database_pool_connection_timeout: Option<u32>,
    /// Database request timeout, in seconds
    pub database_request_timeout: Option<u32>,
    /// Run each pooled connection inside a test transaction (tests only).
    pub database_use_test_transactions: bool,
    /// Whether or not to run the embedded migrations upon startup.
    pub run_migrations: bool,

    /// The daily credit allotment granted to users that are not whitelisted.
    pub default_credits: i32,

    pub statsd_host: Option<String>,
    pub statsd_port: u16,
    /// The label to be used when reporting Metrics.
    pub statsd_label: String,

    pub human_logs: bool,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            host: "127.0.0.1".to_owned(),
            port: 8000,
            database_url: "mysql://root@127.0.0.1/creditserver".to_owned(),
            database_pool_max_size: 10,
            database_pool_connection_timeout: Some(30),
            database_request_timeout: None,
            database_use_test_transactions: false,
            run_migrations: cfg!(test),
            default_credits: 5,
            statsd_host: None,
            statsd_port: 8125,
            statsd_label: "creditserver".to_owned(),
            human_logs: false,
        }
    }
}

impl Settings {
    /// Load the settings from the config file if supplied, then the environment.
    ///
    /// Environment variables are merged with a `CREDITSERVER_` prefix and a
    /// `__` separator, so `CREDITSERVER_DATABASE_URL=...` overrides
    /// `database_url`.
    pub fn with_env_and_config_file(filename: Option<&str>) -> Result<Self, ConfigError> {
        let mut s = Config::default();

        // Merge the config file if supplied
        if let Some(config_filename) = filename {
            s.merge(File::with_name(config_filename))?;
        }

        // Merge the environment overrides
        s.merge(Environment::with_prefix(&PREFIX.to_uppercase()).separator("__"))?;

        match s.try_into::<Self>() {
            Ok(s) => Ok(s),
            // Configuration errors are not very sysop friendly, Try to make them
            // a bit more 3AM useful.
            Err(ConfigError::Message(v)) => {
                println!("Bad configuration: {:?}", &v);
                println!("Please set in config file or use environment variable.");
                println!(
                    "For example to set `database_url` use env var `{}_DATABASE_URL`\n",
                    PREFIX.to_uppercase()
                );
                Err(ConfigError::NotFound(v))
            }
            Err(e) => Err(e),
        }
    }

    pub fn test_settings() -> Self {
        let mut settings =
            Self::with_env_and_config_file(None).expect("Could not get Settings in test_settings");
        settings.database_pool_max_size = 1;
        settings.database_use_test_transactions = true;
        settings.run_migrations = true;
        settings
    }
}
