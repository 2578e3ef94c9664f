use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{invalid_input_error, Error};

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub firebase_api_key: String,
    pub firebase_storage_bucket: String,
    pub identity_api_base: String,
    pub storage_api_base: String,
    pub default_city: String,
    pub submission_timeout: Duration,
    pub local_store_path: PathBuf,
}

impl Config {
    #[tracing::instrument(name = "Config::from_env")]
    pub fn from_env() -> Result<Self, Error> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            firebase_api_key: env::var("FIREBASE_API_KEY")?,
            firebase_storage_bucket: env::var("FIREBASE_STORAGE_BUCKET")?,
            identity_api_base: var_or("IDENTITY_API_BASE", "identitytoolkit.googleapis.com"),
            storage_api_base: var_or("STORAGE_API_BASE", "firebasestorage.googleapis.com"),
            default_city: var_or("CASA_DEFAULT_CITY", "Miami"),
            submission_timeout: Duration::from_secs(parse_or("CASA_SUBMISSION_TIMEOUT_SECS", 30)?),
            local_store_path: var_or("CASA_LOCAL_STORE", "casa-local.json").into(),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.into())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, Error> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            tracing::error!("{} is not a valid value: {:?}", key, raw);
            invalid_input_error()
        }),
        Err(_) => Ok(default),
    }
}

#[test]
fn defaults_apply_when_unset() {
    assert_eq!(var_or("CASA_TEST_SURELY_UNSET", "Miami"), "Miami");
    assert_eq!(parse_or("CASA_TEST_SURELY_UNSET", 30u64).unwrap(), 30);
}

#[test]
fn malformed_numbers_are_rejected() {
    env::set_var("CASA_TEST_BAD_NUMBER", "thirty");
    assert_eq!(
        parse_or("CASA_TEST_BAD_NUMBER", 30u64).unwrap_err(),
        invalid_input_error()
    );
    env::remove_var("CASA_TEST_BAD_NUMBER");
}
