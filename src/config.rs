use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default timetable group when GROUP_ID is not set
const DEFAULT_GROUP_ID: u64 = 224003553;

/// Process-wide configuration, read once from the environment at startup and
/// passed by reference into every component.
#[derive(Debug, Clone)]
pub struct Config {
    /// Calendar that receives the auto-managed events
    pub target_calendar_id: String,

    /// Timetable group to fetch
    pub group_id: u64,

    /// Time between reconciliation passes
    pub update_interval: Duration,

    /// Pause between consecutive calendar mutations
    pub request_pause: Duration,

    /// Records whose discipline or teacher surname contains one of these
    /// (case-insensitively) are dropped from the fetched schedule
    pub stop_words: Vec<String>,

    /// disciplineType -> Google Calendar color id
    pub colors: HashMap<String, String>,
}

impl Config {
    /// Load configuration from the environment. TARGET_CALENDAR_ID is the
    /// only required variable.
    pub fn from_env() -> Result<Config> {
        let target_calendar_id =
            std::env::var("TARGET_CALENDAR_ID").context("TARGET_CALENDAR_ID is not set")?;

        let group_id = match std::env::var("GROUP_ID") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("GROUP_ID is not a number: {:?}", raw))?,
            Err(_) => DEFAULT_GROUP_ID,
        };

        let update_interval = env_or("UPDATE_INTERVAL", "86400")
            .parse()
            .map(Duration::from_secs)
            .context("UPDATE_INTERVAL must be whole seconds")?;

        let request_pause = env_or("PAUSE_BETWEEN_REQUESTS", "0.2")
            .parse()
            .map(Duration::from_secs_f64)
            .context("PAUSE_BETWEEN_REQUESTS must be seconds")?;

        let stop_words = parse_stop_words(
            &env_or("STOP_WORDS", "Пашкевич,Иванов"),
            &env_or("SUBGROUP", ""),
        );

        let mut colors = HashMap::new();
        colors.insert("Сем".to_string(), env_or("COLOR_SEM", "9"));
        colors.insert("Практ".to_string(), env_or("COLOR_PR", "10"));
        colors.insert("Лек".to_string(), env_or("COLOR_LK", "11"));

        Ok(Config {
            target_calendar_id,
            group_id,
            update_interval,
            request_pause,
            stop_words,
            colors,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Split the comma-separated stop-word list. SUBGROUP, when set, joins the
/// list: it names the cross-listed section whose lessons should be
/// suppressed.
fn parse_stop_words(raw: &str, subgroup: &str) -> Vec<String> {
    let mut words: Vec<String> = raw
        .split(',')
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect();
    if !subgroup.is_empty() {
        words.push(subgroup.to_string());
    }
    words
}

/// OAuth client credentials for the Google Calendar API
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Stored tokens for the authenticated account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Get the config directory path (~/.config/unisync)
pub fn config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Could not determine config directory")?
        .join("unisync");
    Ok(config_dir)
}

/// Get the credentials file path (~/.config/unisync/credentials.json)
pub fn credentials_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("credentials.json"))
}

/// Get the tokens file path (~/.config/unisync/tokens.json)
pub fn tokens_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("tokens.json"))
}

/// Load OAuth client credentials from ~/.config/unisync/credentials.json
pub fn load_credentials() -> Result<Credentials> {
    let path = credentials_path()?;

    if !path.exists() {
        anyhow::bail!(
            "Credentials file not found at {}\n\n\
            Create it with your Google OAuth client:\n\n\
            {{\n\
            \x20 \"client_id\": \"your-client-id.apps.googleusercontent.com\",\n\
            \x20 \"client_secret\": \"your-client-secret\"\n\
            }}",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read credentials file at {}", path.display()))?;

    let credentials: Credentials = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse credentials file at {}", path.display()))?;

    Ok(credentials)
}

/// Load tokens from ~/.config/unisync/tokens.json
pub fn load_tokens() -> Result<Tokens> {
    let path = tokens_path()?;

    if !path.exists() {
        anyhow::bail!(
            "No stored tokens at {}. Run `unisync auth` first.",
            path.display()
        );
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read tokens file at {}", path.display()))?;

    let tokens: Tokens = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse tokens file at {}", path.display()))?;

    Ok(tokens)
}

/// Save tokens to ~/.config/unisync/tokens.json
pub fn save_tokens(tokens: &Tokens) -> Result<()> {
    let path = tokens_path()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }

    let contents = serde_json::to_string_pretty(tokens).context("Failed to serialize tokens")?;

    std::fs::write(&path, contents)
        .with_context(|| format!("Failed to write tokens file at {}", path.display()))?;

    Ok(())
}

/// Whether the stored access token is expired or about to be (60s buffer).
/// Tokens without an expiry are assumed valid until the API says otherwise.
pub fn tokens_need_refresh(tokens: &Tokens) -> bool {
    match tokens.expires_at {
        Some(expires_at) => chrono::Utc::now() + chrono::Duration::seconds(60) >= expires_at,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stop_words_trims_and_drops_empty() {
        let words = parse_stop_words("Пашкевич, Иванов,,", "");
        assert_eq!(words, vec!["Пашкевич".to_string(), "Иванов".to_string()]);
    }

    #[test]
    fn test_subgroup_joins_stop_words() {
        let words = parse_stop_words("Иванов", "2 подгруппа");
        assert_eq!(words, vec!["Иванов".to_string(), "2 подгруппа".to_string()]);
    }

    #[test]
    fn test_fresh_tokens_do_not_need_refresh() {
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(!tokens_need_refresh(&tokens));
    }

    #[test]
    fn test_expired_tokens_need_refresh() {
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: Some(chrono::Utc::now() - chrono::Duration::minutes(5)),
        };
        assert!(tokens_need_refresh(&tokens));
    }

    #[test]
    fn test_tokens_without_expiry_are_trusted() {
        let tokens = Tokens {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: None,
        };
        assert!(!tokens_need_refresh(&tokens));
    }
}
