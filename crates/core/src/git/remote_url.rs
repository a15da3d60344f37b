//! Host-aware remote URL credential handling.
//!
//! Token and basic credentials are embedded in the userinfo part of an HTTPS
//! remote URL. GitHub-style hosts take the token as the user
//! (`https://<token>@host/..`), GitLab-style hosts expect
//! `https://oauth2:<token>@host/..`. SSH remotes are passed through and
//! authenticated by the ambient agent.

use url::Url;

use crate::models::{AuthConfig, HostStyle};

/// Return `url` with the credentials of `auth` embedded.
///
/// Non-HTTP(S) URLs (ssh, scp-like, local paths) are returned unchanged.
/// Any userinfo already present in the URL is replaced. Fails with a
/// human-readable detail when the secret has not been resolved.
pub fn inject_credentials(url: &str, auth: &AuthConfig) -> Result<String, String> {
    let Some(mut parsed) = parse_http_url(url) else {
        return Ok(url.to_string());
    };

    let (user, password) = match auth {
        AuthConfig::Ssh { .. } => return Ok(url.to_string()),
        AuthConfig::Token {
            token,
            token_env,
            host_style,
        } => {
            let token = token
                .as_deref()
                .ok_or_else(|| format!("token variable '{}' is not set", token_env))?;
            let host = parsed.host_str().unwrap_or_default();
            match host_style.unwrap_or_else(|| detect_host_style(host)) {
                HostStyle::Github => (token, None),
                HostStyle::Gitlab => ("oauth2", Some(token)),
            }
        }
        AuthConfig::Basic {
            username,
            password,
            password_env,
        } => {
            let password = password
                .as_deref()
                .ok_or_else(|| format!("password variable '{}' is not set", password_env))?;
            (username.as_str(), Some(password))
        }
    };

    // Encode fully up front; `Url` leaves `%` untouched in userinfo.
    let password = password.map(urlencoding::encode);
    parsed
        .set_username(&urlencoding::encode(user))
        .and_then(|_| parsed.set_password(password.as_deref()))
        .map_err(|_| format!("cannot embed credentials in '{}'", redact_credentials(url)))?;
    Ok(parsed.into())
}

/// Replace any userinfo in `url` with `***` so it is safe to log.
pub fn redact_credentials(url: &str) -> String {
    match parse_http_url(url) {
        Some(mut parsed) if !parsed.username().is_empty() || parsed.password().is_some() => {
            let redacted = parsed
                .set_password(None)
                .and_then(|_| parsed.set_username("***"));
            match redacted {
                Ok(()) => parsed.into(),
                Err(()) => "***".to_string(),
            }
        }
        _ => url.to_string(),
    }
}

/// Decode the `user[:password]` pair embedded in an HTTP(S) URL, if any.
pub fn embedded_credentials(url: &str) -> Option<(String, String)> {
    let parsed = parse_http_url(url)?;
    if parsed.username().is_empty() {
        return None;
    }
    Some((
        decode(parsed.username()),
        decode(parsed.password().unwrap_or_default()),
    ))
}

/// Guess the token convention from the host name.
pub fn detect_host_style(host: &str) -> HostStyle {
    if host.to_ascii_lowercase().contains("gitlab") {
        HostStyle::Gitlab
    } else {
        HostStyle::Github
    }
}

/// Parse `url` when it is an http or https URL with a host.
fn parse_http_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url).ok()?;
    let is_http = matches!(parsed.scheme(), "http" | "https");
    (is_http && parsed.has_host()).then_some(parsed)
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| value.to_string())
}
