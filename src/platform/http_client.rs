//! Shared HTTP client construction and JSON request helpers for paginators.
//!
//! Every platform client shares timeout, user-agent and compression policy,
//! and every JSON call classifies failures the same way.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::user_agent;

/// Default connect timeout.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default whole-request timeout.
pub const READ_TIMEOUT_SECS: u64 = 30;

/// Timeouts applied to every client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpSettings {
    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds
    pub read_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

/// HTTP client construction failed.
#[derive(Debug, Error)]
#[error("HTTP client construction failed for {platform}: {reason}")]
pub struct ClientBuildError {
    /// Platform the client was for
    pub platform: String,
    /// What went wrong
    pub reason: String,
}

/// Builds an HTTP client using shared project policy.
///
/// # Errors
///
/// Returns [`ClientBuildError`] when the client cannot be constructed.
pub fn build_http_client(platform: &str, settings: HttpSettings) -> Result<Client, ClientBuildError> {
    let failure = |reason: String| ClientBuildError {
        platform: platform.to_string(),
        reason,
    };

    match try_build_client(settings, false) {
        Ok(client) => Ok(client),
        Err(BuildClientFailure::Panic) => {
            // Some sandboxed environments panic when querying system proxy
            // settings. Retry with env proxies only.
            warn!(
                platform,
                "client hit system proxy panic; using env-proxy fallback builder"
            );
            match try_build_client(settings, true) {
                Ok(client) => Ok(client),
                Err(BuildClientFailure::Panic) => Err(failure("construction panicked".to_string())),
                Err(BuildClientFailure::Build(error)) => Err(failure(error.to_string())),
            }
        }
        Err(BuildClientFailure::Build(error)) => Err(failure(error.to_string())),
    }
}

enum BuildClientFailure {
    Panic,
    Build(reqwest::Error),
}

fn try_build_client(
    settings: HttpSettings,
    disable_system_proxy_lookup: bool,
) -> Result<Client, BuildClientFailure> {
    catch_unwind(AssertUnwindSafe(move || {
        let mut builder = base_builder(settings);
        if disable_system_proxy_lookup {
            builder = apply_env_proxy_fallback(builder.no_proxy());
        }
        builder.build().map_err(BuildClientFailure::Build)
    }))
    .map_err(|_| BuildClientFailure::Panic)?
}

fn base_builder(settings: HttpSettings) -> ClientBuilder {
    Client::builder()
        .connect_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .timeout(Duration::from_secs(settings.read_timeout_secs))
        .user_agent(user_agent::default_user_agent())
        .gzip(true)
}

fn apply_env_proxy_fallback(mut builder: ClientBuilder) -> ClientBuilder {
    if let Some(proxy) = first_env_var(&["HTTPS_PROXY", "https_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::https(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    if let Some(proxy) = first_env_var(&["HTTP_PROXY", "http_proxy", "ALL_PROXY", "all_proxy"])
        && let Ok(resolved) = Proxy::http(&proxy)
    {
        builder = builder.proxy(resolved);
    }
    builder
}

fn first_env_var(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// Sends a GET and returns the body of a successful response.
///
/// # Errors
///
/// Network failures become [`ApiError::Network`]; non-2xx responses are
/// classified by [`ApiError::from_response`].
pub async fn get_text(
    client: &Client,
    endpoint: &str,
    url: &str,
    query: &[(&str, String)],
    bearer: Option<&str>,
) -> Result<String, ApiError> {
    let mut request = client.get(url).query(query);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    debug!(endpoint, url, "calling platform API");
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::network(endpoint, e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::network(endpoint, e))?;

    if !status.is_success() {
        debug!(endpoint, status = status.as_u16(), "platform API error");
        return Err(ApiError::from_response(endpoint, status.as_u16(), &body));
    }
    Ok(body)
}

/// Sends a GET and decodes a successful JSON response.
///
/// A 2xx body carrying a rate-limit or capacity signature is still reported
/// as such, since some services return errors inside a 200 envelope.
///
/// # Errors
///
/// See [`get_text`]; undecodable bodies become [`ApiError::Malformed`].
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    endpoint: &str,
    url: &str,
    query: &[(&str, String)],
    bearer: Option<&str>,
) -> Result<T, ApiError> {
    let body = get_text(client, endpoint, url, query, bearer).await?;
    decode_json(endpoint, &body)
}

/// Decodes a JSON body, reclassifying terminal signatures hidden in it.
///
/// # Errors
///
/// Returns [`ApiError::Malformed`] when the body is not the expected shape.
pub fn decode_json<T: DeserializeOwned>(endpoint: &str, body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| match ApiError::from_response(endpoint, 200, body) {
        ApiError::HttpStatus { .. } => ApiError::malformed(endpoint, e.to_string()),
        terminal => terminal,
    })
}

/// Classifies an error that a service reported inside a 2xx envelope.
#[must_use]
pub fn body_failure(endpoint: &str, message: &str) -> ApiError {
    match ApiError::from_response(endpoint, 200, message) {
        ApiError::HttpStatus { .. } => ApiError::malformed(endpoint, message),
        terminal => terminal,
    }
}
