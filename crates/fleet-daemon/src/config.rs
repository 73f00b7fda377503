//! Environment-sourced process configuration.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

pub struct FleetConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub auth_token: Option<String>,
    pub twilio_auth_token: Option<String>,
    pub twilio_webhook_url: Option<String>,
    pub twilio_allowed_numbers: Option<Vec<String>>,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl FleetConfig {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("FLEET_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("FLEET_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);

        let data_dir = std::env::var("FLEET_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".fleet")
            });

        let auth_token = std::env::var("AUTH_TOKEN").ok().filter(|v| !v.is_empty());
        let twilio_auth_token = std::env::var("TWILIO_AUTH_TOKEN").ok().filter(|v| !v.is_empty());
        let twilio_webhook_url = std::env::var("TWILIO_WEBHOOK_URL").ok().filter(|v| !v.is_empty());
        let twilio_allowed_numbers = std::env::var("TWILIO_ALLOWED_NUMBERS")
            .ok()
            .map(|v| v.split(',').map(|n| n.trim().to_string()).filter(|n| !n.is_empty()).collect::<Vec<_>>())
            .filter(|v| !v.is_empty());

        let rate_limit_max_requests = std::env::var("FLEET_RATE_LIMIT_MAX").ok().and_then(|v| v.parse().ok()).unwrap_or(120);
        let rate_limit_window_secs: u64 = std::env::var("FLEET_RATE_LIMIT_WINDOW_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(60);

        Ok(Self {
            host,
            port,
            data_dir,
            auth_token,
            twilio_auth_token,
            twilio_webhook_url,
            twilio_allowed_numbers,
            rate_limit_max_requests,
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        // scoped env mutation: a process-global side effect, but this
        // crate has no other test that reads these keys.
        std::env::remove_var("FLEET_PORT");
        std::env::remove_var("AUTH_TOKEN");
        let cfg = FleetConfig::from_env().unwrap();
        assert_eq!(cfg.port, 8080);
        assert!(cfg.auth_token.is_none());
    }
}
