//! Module for talking to the Firebase identity and realtime database REST endpoints.
use std::fs;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::auth::{AuthError, Grant, IdentityProvider};
use crate::path::DatastorePath;
use crate::sync::{Datastore, PublishError};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// Struct modeling the parameters required to reach the Firebase project.
pub struct FirebaseParameters
{
    /// The web API key of the project.
    pub api_key: String,
    /// Base url of the realtime database.
    pub database_url: String,
    /// Base url of the identity toolkit API.
    #[serde(default = "default_identity_endpoint")]
    pub identity_endpoint: String,
    /// Base url of the secure token API.
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    /// Timeout for a single request in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Optional TLS parameters, for endpoints behind a private CA.
    #[serde(default)]
    pub tls_params: Option<FirebaseTlsParameters>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
/// TLS parameters for the https connections.
pub struct FirebaseTlsParameters {
    /// The path to an additional CA certificate in PEM format.
    pub ca_path: String,
}

fn default_identity_endpoint() -> String { String::from("https://identitytoolkit.googleapis.com/v1") }
fn default_token_endpoint() -> String { String::from("https://securetoken.googleapis.com/v1") }
fn default_request_timeout_ms() -> u64 { 10_000 }

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not read CA certificate \'{path}\': {source}")]
    CaFile { path: String, source: std::io::Error },
    #[error("tls setup failed: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("http client setup failed: {0}")]
    Client(#[from] reqwest::Error),
}

/// Builds the blocking https client shared by the identity provider and the datastore.
pub fn http_client(params: &FirebaseParameters) -> Result<Client, TransportError> {
    let mut builder = Client::builder().timeout(Duration::from_millis(params.request_timeout_ms));

    if let Some(tls_params) = &params.tls_params {
        let pem = fs::read(&tls_params.ca_path)
            .map_err(|source| TransportError::CaFile { path: tls_params.ca_path.clone(), source })?;
        let certificate = native_tls::Certificate::from_pem(&pem)?;
        let connector = native_tls::TlsConnector::builder()
            .add_root_certificate(certificate)
            .build()?;
        builder = builder.use_preconfigured_tls(connector);
        log::debug!(target: "gianode::firebase", "Added CA certificate \'{}\'", tls_params.ca_path);
    }

    Ok(builder.build()?)
}

/// Extracts the human readable part of an error body.
///
/// The database answers `{"error": "..."}`, the identity APIs `{"error": {"message": "..."}}`.
fn error_reason(body: &str) -> String {
    match serde_json::from_str::<Value>(body) {
        Ok(value) => match value.get("error") {
            Some(Value::String(reason)) => reason.clone(),
            Some(error) => error.get("message")
                .and_then(Value::as_str)
                .map(String::from)
                .unwrap_or_else(|| error.to_string()),
            None => body.trim().to_string(),
        },
        Err(_) => body.trim().to_string(),
    }
}

fn send(request: RequestBuilder) -> Result<Response, PublishError> {
    let response = request.send().map_err(|err| PublishError::NetworkFailed(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(PublishError::Rejected { status: status.as_u16(), reason: error_reason(&body) })
}

fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, PublishError> {
    response.json::<T>().map_err(|err| PublishError::Malformed(err.to_string()))
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SignUpResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
}

#[derive(Deserialize, Debug)]
struct RefreshResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    user_id: String,
}

fn parse_expiry(expires_in: &str) -> Result<i64, String> {
    expires_in.trim().parse::<i64>().map_err(|err| format!("invalid expiresIn \'{}\': {}", expires_in, err))
}

/// Anonymous accounts of the Firebase identity toolkit.
pub struct FirebaseIdentity {
    client: Client,
    identity_endpoint: String,
    token_endpoint: String,
    api_key: String,
    request_timeout: Duration,
}

impl FirebaseIdentity {
    pub fn new(client: Client, params: &FirebaseParameters) -> Self {
        FirebaseIdentity {
            client,
            identity_endpoint: params.identity_endpoint.trim_end_matches('/').to_string(),
            token_endpoint: params.token_endpoint.trim_end_matches('/').to_string(),
            api_key: params.api_key.clone(),
            request_timeout: Duration::from_millis(params.request_timeout_ms),
        }
    }
}

impl IdentityProvider for FirebaseIdentity {
    fn sign_up_anonymous(&self, timeout: Duration) -> Result<Grant, AuthError> {
        let request = self.client
            .post(&format!("{}/accounts:signUp", self.identity_endpoint))
            .timeout(timeout.min(self.request_timeout))
            .query(&[("key", self.api_key.as_str())])
            .json(&serde_json::json!({ "returnSecureToken": true }));

        let response: SignUpResponse = send(request)
            .and_then(read_json)
            .map_err(|err| AuthError::SignupFailed(err.to_string()))?;

        Ok(Grant {
            expires_in_secs: parse_expiry(&response.expires_in).map_err(AuthError::SignupFailed)?,
            uid: response.local_id,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        })
    }

    fn refresh(&self, refresh_token: &str) -> Result<Grant, AuthError> {
        let request = self.client
            .post(&format!("{}/token", self.token_endpoint))
            .query(&[("key", self.api_key.as_str())])
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)]);

        let response: RefreshResponse = send(request)
            .and_then(read_json)
            .map_err(|err| AuthError::RefreshFailed(err.to_string()))?;

        Ok(Grant {
            expires_in_secs: parse_expiry(&response.expires_in).map_err(AuthError::RefreshFailed)?,
            uid: response.user_id,
            id_token: response.id_token,
            refresh_token: response.refresh_token,
        })
    }
}

#[derive(Deserialize, Debug)]
struct PushResponse {
    name: String,
}

/// Key of an appended child, if the reply carries one.
fn push_key(body: &str) -> Option<String> {
    serde_json::from_str::<PushResponse>(body).ok().map(|response| response.name)
}

/// Stand-in key when the store accepted an append without naming it.
const UNKNOWN_KEY: &str = "<unknown>";

/// The realtime database REST interface.
pub struct FirebaseDatastore {
    client: Client,
    database_url: String,
}

impl FirebaseDatastore {
    pub fn new(client: Client, params: &FirebaseParameters) -> Self {
        FirebaseDatastore {
            client,
            database_url: params.database_url.trim_end_matches('/').to_string(),
        }
    }

    fn resource_url(&self, path: &DatastorePath) -> String {
        format!("{}/{}.json", self.database_url, path)
    }

    fn authorize(request: RequestBuilder, auth: Option<&str>) -> RequestBuilder {
        match auth {
            Some(token) => request.query(&[("auth", token)]),
            None => request,
        }
    }
}

impl Datastore for FirebaseDatastore {
    fn put(&self, path: &DatastorePath, body: &Value, auth: Option<&str>) -> Result<(), PublishError> {
        let request = self.client.put(&self.resource_url(path)).json(body);
        send(Self::authorize(request, auth)).map(|_| ())
    }

    fn push(&self, path: &DatastorePath, body: &Value, auth: Option<&str>) -> Result<String, PublishError> {
        let request = self.client.post(&self.resource_url(path)).json(body);
        let response = send(Self::authorize(request, auth))?;
        let body = response.text().unwrap_or_default();
        match push_key(&body) {
            Some(key) => Ok(key),
            None => {
                log::warn!(target: "gianode::firebase", "Append to '{}' accepted without a key: '{}'", path, body.trim());
                Ok(String::from(UNKNOWN_KEY))
            }
        }
    }

    fn get(&self, path: &DatastorePath, auth: Option<&str>) -> Result<Value, PublishError> {
        let request = self.client.get(&self.resource_url(path));
        send(Self::authorize(request, auth)).and_then(read_json)
    }
}
