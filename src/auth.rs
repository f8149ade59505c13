//! OAuth bootstrap and token refresh for the Google Calendar API.
//!
//! The rest of the syncer only ever asks for a ready-to-use access token;
//! everything about consent, storage, and refresh stays in here.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;

use crate::config::{self, Credentials, Tokens};

const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPE: &str = "https://www.googleapis.com/auth/calendar";
const REDIRECT_PORT: u16 = 8085;

fn redirect_uri() -> String {
    format!("http://localhost:{REDIRECT_PORT}/callback")
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default)]
    expires_in: i64,
}

impl TokenResponse {
    /// Fold the response into stored tokens, keeping the previous refresh
    /// token when the endpoint does not send a new one (it usually doesn't
    /// on refresh).
    fn into_tokens(self, previous_refresh_token: Option<&str>) -> Tokens {
        let refresh_token = if self.refresh_token.is_empty() {
            previous_refresh_token.unwrap_or_default().to_string()
        } else {
            self.refresh_token
        };

        let expires_at = if self.expires_in > 0 {
            Some(chrono::Utc::now() + chrono::Duration::seconds(self.expires_in))
        } else {
            None
        };

        Tokens {
            access_token: self.access_token,
            refresh_token,
            expires_at,
        }
    }
}

/// Return a valid access token, refreshing the stored one if it is expired
/// or about to expire. Fails when no tokens are stored yet.
pub async fn access_token() -> Result<String> {
    let mut tokens = config::load_tokens()?;

    if config::tokens_need_refresh(&tokens) {
        let credentials = config::load_credentials()?;
        tokens = refresh(&credentials, &tokens).await?;
        config::save_tokens(&tokens)?;
    }

    Ok(tokens.access_token)
}

async fn refresh(credentials: &Credentials, tokens: &Tokens) -> Result<Tokens> {
    let params = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("refresh_token", tokens.refresh_token.as_str()),
        ("grant_type", "refresh_token"),
    ];

    let response: TokenResponse = reqwest::Client::new()
        .post(TOKEN_URL)
        .form(&params)
        .send()
        .await
        .context("Token refresh request failed")?
        .error_for_status()
        .context("Token refresh was rejected")?
        .json()
        .await
        .context("Failed to decode token refresh response")?;

    Ok(response.into_tokens(Some(&tokens.refresh_token)))
}

/// Run the full interactive OAuth flow and store the resulting tokens.
pub async fn cmd_auth() -> Result<()> {
    let credentials = config::load_credentials()?;

    let auth_url = consent_url(&credentials);
    println!("\nOpen this URL in your browser to authenticate:\n");
    println!("{auth_url}\n");

    // Try to open the browser automatically
    if open::that(&auth_url).is_err() {
        println!("(Could not open browser automatically, please copy the URL above)");
    }

    let code = wait_for_callback()?;

    println!("\nReceived authorization code, exchanging for tokens...");
    let tokens = exchange_code(&credentials, &code).await?;
    config::save_tokens(&tokens)?;

    println!(
        "Tokens saved to {}. You can start the sync loop now: unisync run",
        config::tokens_path()?.display()
    );

    Ok(())
}

fn consent_url(credentials: &Credentials) -> String {
    format!(
        "{AUTH_URL}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        urlencoding::encode(&credentials.client_id),
        urlencoding::encode(&redirect_uri()),
        urlencoding::encode(SCOPE),
    )
}

/// Start a local HTTP server to receive the OAuth callback.
fn wait_for_callback() -> Result<String> {
    let listener = TcpListener::bind(format!("127.0.0.1:{REDIRECT_PORT}"))
        .with_context(|| format!("Failed to bind to port {REDIRECT_PORT}"))?;

    println!("Waiting for OAuth callback on port {REDIRECT_PORT}...");

    let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

    let mut reader = BufReader::new(&stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;

    let code = code_from_request_line(&request_line)?;

    // Send a response to the browser
    let response = "HTTP/1.1 200 OK\r\n\
        Content-Type: text/html\r\n\
        Connection: close\r\n\
        \r\n\
        <html><body>\
        <h1>Authentication successful!</h1>\
        <p>You can close this window and return to the terminal.</p>\
        </body></html>";

    stream.write_all(response.as_bytes())?;
    stream.flush()?;

    Ok(code)
}

/// Pull the authorization code out of "GET /callback?code=... HTTP/1.1".
fn code_from_request_line(request_line: &str) -> Result<String> {
    let url_part = request_line
        .split_whitespace()
        .nth(1)
        .context("Invalid request")?;

    let url = url::Url::parse(&format!("http://localhost{url_part}"))?;

    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.to_string())
        .context("No code in callback")
}

async fn exchange_code(credentials: &Credentials, code: &str) -> Result<Tokens> {
    let params = [
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret.as_str()),
        ("code", code),
        ("grant_type", "authorization_code"),
        ("redirect_uri", &redirect_uri()),
    ];

    let response: TokenResponse = reqwest::Client::new()
        .post(TOKEN_URL)
        .form(&params)
        .send()
        .await
        .context("Token exchange request failed")?
        .error_for_status()
        .context("Token exchange was rejected")?
        .json()
        .await
        .context("Failed to decode token exchange response")?;

    Ok(response.into_tokens(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_extracted_from_callback_request() {
        let code =
            code_from_request_line("GET /callback?code=4%2Fabc123&scope=calendar HTTP/1.1").unwrap();
        assert_eq!(code, "4/abc123");
    }

    #[test]
    fn test_callback_without_code_is_an_error() {
        assert!(code_from_request_line("GET /callback?error=access_denied HTTP/1.1").is_err());
        assert!(code_from_request_line("").is_err());
    }

    #[test]
    fn test_consent_url_carries_client_and_scope() {
        let credentials = Credentials {
            client_id: "client-1".to_string(),
            client_secret: "secret".to_string(),
        };
        let url = consent_url(&credentials);
        assert!(url.starts_with(AUTH_URL));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("access_type=offline"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_refresh_response_keeps_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: String::new(),
            expires_in: 3600,
        };
        let tokens = response.into_tokens(Some("old-refresh"));
        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token, "old-refresh");
        assert!(tokens.expires_at.is_some());
    }
}
