use anyhow::{Context, anyhow};
use chrono::FixedOffset;

#[derive(Clone, Debug)]
pub struct Config {
    /// Unset means the in-memory store.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub server_port: u16,
    /// Local calendar for due dates, lateness and notification day boundaries.
    pub library_utc_offset: FixedOffset,
    /// Accounts registered with this e-mail become administrators.
    pub bootstrap_admin_email: Option<String>,
}

impl Config {
    /// Load configuration from environment variables, applying defaults where appropriate.
    ///
    /// # Errors
    /// Returns an error if `JWT_SECRET` is missing or `LIBRARY_UTC_OFFSET` is not
    /// an offset such as `+01:00`.
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let jwt_secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let server_port = std::env::var("SERVER_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let library_utc_offset = match std::env::var("LIBRARY_UTC_OFFSET") {
            Ok(raw) => parse_offset(&raw)?,
            Err(_) => FixedOffset::east_opt(0).context("zero offset")?,
        };
        let bootstrap_admin_email = std::env::var("BOOTSTRAP_ADMIN_EMAIL")
            .ok()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty());

        Ok(Self {
            database_url,
            jwt_secret,
            server_port,
            library_utc_offset,
            bootstrap_admin_email,
        })
    }
}

fn parse_offset(raw: &str) -> anyhow::Result<FixedOffset> {
    raw.trim()
        .parse::<FixedOffset>()
        .map_err(|e| anyhow!("LIBRARY_UTC_OFFSET {raw:?} is not a UTC offset: {e}"))
}
