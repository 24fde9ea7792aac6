// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token endpoint exchanges: refresh-token and authorization-code grants.

use reqwest::Url;

use crate::token::{AuthError, TokenErrorResponse, TokenResponse};

/// Client credentials and endpoint for the OAuth provider.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub authorize_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

/// Exchange a refresh token for a new token response.
pub async fn refresh(
    http: &reqwest::Client,
    oauth: &OAuthClient,
    refresh_token: &str,
) -> Result<TokenResponse, AuthError> {
    post_grant(
        http,
        &oauth.token_url,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", &oauth.client_id),
            ("client_secret", &oauth.client_secret),
            ("refresh_token", refresh_token),
        ],
    )
    .await
}

/// Exchange an authorization code for the initial token response.
pub async fn exchange_code(
    http: &reqwest::Client,
    oauth: &OAuthClient,
    code: &str,
    redirect_uri: &str,
) -> Result<TokenResponse, AuthError> {
    post_grant(
        http,
        &oauth.token_url,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", &oauth.client_id),
            ("client_secret", &oauth.client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await
}

/// Build the URL the operator's browser is sent to for authorization.
pub fn authorize_url(
    oauth: &OAuthClient,
    redirect_uri: &str,
    state: &str,
) -> anyhow::Result<String> {
    let url = Url::parse_with_params(
        &oauth.authorize_url,
        &[
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", oauth.scope.as_str()),
            ("approval_prompt", "force"),
            ("state", state),
        ],
    )?;
    Ok(url.into())
}

/// POST a form-encoded grant and classify the outcome.
///
/// Connection failures, timeouts and 5xx responses are `Transport`; any
/// other non-success status is a `Rejected` grant.
async fn post_grant(
    http: &reqwest::Client,
    token_url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let resp = http
        .post(token_url)
        .form(form)
        .send()
        .await
        .map_err(|e| AuthError::Transport(format!("HTTP error: {e}")))?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| AuthError::Transport(format!("read body: {e}")))?;

    if status.is_server_error() {
        return Err(AuthError::Transport(format!("HTTP {status}")));
    }
    if !status.is_success() {
        if let Ok(err) = serde_json::from_str::<TokenErrorResponse>(&body) {
            return Err(AuthError::Rejected(match err.error_description {
                Some(desc) => format!("{}: {desc}", err.error),
                None => err.error,
            }));
        }
        return Err(AuthError::Rejected(format!("HTTP {status}")));
    }

    serde_json::from_str(&body)
        .map_err(|e| AuthError::Rejected(format!("unparseable token response: {e}")))
}
