use super::error::{CouchDaoError, CouchResult};

const BASE_URL_ENV: &str = "COUCH_BASE_URL";
const DATABASE_ENV: &str = "COUCH_DB";
const USERNAME_ENV: &str = "COUCH_USERNAME";
const PASSWORD_ENV: &str = "COUCH_PASSWORD";
const DEFAULT_DATABASE: &str = "quizchain";

/// Basic-auth pair sent with every request.
#[derive(Debug, Clone)]
pub struct CouchCredentials {
    pub username: String,
    pub password: String,
}

/// Where the quiz documents live.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    pub base_url: String,
    pub database: String,
    pub credentials: Option<CouchCredentials>,
}

impl CouchConfig {
    /// `COUCH_BASE_URL` is required; `COUCH_DB` defaults to `quizchain`.
    /// Credentials are used only when both user and password are set.
    pub fn from_env() -> CouchResult<Self> {
        let base_url = std::env::var(BASE_URL_ENV)
            .map_err(|_| CouchDaoError::MissingSetting { var: BASE_URL_ENV })?;
        let database = std::env::var(DATABASE_ENV)
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATABASE.into());
        let credentials = match (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV)) {
            (Ok(username), Ok(password)) => Some(CouchCredentials { username, password }),
            _ => None,
        };

        Ok(Self {
            base_url,
            database,
            credentials,
        })
    }
}
