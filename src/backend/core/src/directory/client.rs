//! Casdoor REST client.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::models::{DirectoryRole, DirectoryUser, OAuthToken};
use super::{DirectoryError, IdentityDirectory};
use crate::config::DirectoryConfig;

/// `{status, msg, data}` wrapper used by every Casdoor API response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<Option<T>, DirectoryError> {
        if self.status == "ok" {
            Ok(self.data)
        } else {
            Err(DirectoryError::Rejected(self.msg))
        }
    }
}

/// HTTP client for a Casdoor-compatible identity directory.
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: Client,
    endpoint: Url,
    client_id: String,
    client_secret: String,
    organization: String,
    application: String,
}

impl HttpDirectory {
    pub fn new(config: &DirectoryConfig) -> Result<Self, DirectoryError> {
        let mut base = config.endpoint.trim_end_matches('/').to_string();
        base.push('/');
        let endpoint =
            Url::parse(&base).map_err(|e| DirectoryError::InvalidEndpoint(format!("{}: {}", base, e)))?;

        let client = Client::builder().timeout(config.timeout()).build()?;

        Ok(Self {
            client,
            endpoint,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            organization: config.organization.clone(),
            application: config.application.clone(),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    fn url(&self, path: &str) -> Result<Url, DirectoryError> {
        self.endpoint
            .join(path)
            .map_err(|e| DirectoryError::InvalidEndpoint(format!("{}: {}", path, e)))
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, DirectoryError> {
        Ok(self
            .client
            .request(method, self.url(path)?)
            .basic_auth(&self.client_id, Some(&self.client_secret)))
    }

    fn record_id(&self, name: &str) -> String {
        format!("{}/{}", self.organization, name)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>, DirectoryError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Directory returned non-success status");
            return Err(status_error(status));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        envelope.into_result()
    }

    /// Send a write call and require the directory to report a change.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        path: &str,
        id: Option<&str>,
        body: &B,
    ) -> Result<(), DirectoryError> {
        let mut request = self.request(Method::POST, path)?.json(body);
        if let Some(id) = id {
            request = request.query(&[("id", id)]);
        }

        match self.fetch::<String>(request).await? {
            Some(affected) if affected == "Affected" => Ok(()),
            other => Err(DirectoryError::Rejected(format!(
                "{} made no change ({})",
                path,
                other.unwrap_or_default()
            ))),
        }
    }

    /// Download the application's signing certificate.
    pub async fn fetch_certificate(&self) -> Result<String, DirectoryError> {
        let request = self
            .request(Method::GET, "api/get-app-cert")?
            .query(&[("appName", self.application.as_str())]);
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        let body = response.text().await?;
        // Newer directories wrap the PEM in the usual envelope.
        if let Ok(envelope) = serde_json::from_str::<Envelope<String>>(&body) {
            return envelope
                .into_result()?
                .ok_or_else(|| DirectoryError::Decode("certificate response carried no data".into()));
        }
        if body.contains("-----BEGIN") {
            Ok(body)
        } else {
            Err(DirectoryError::Decode("certificate response is not PEM".into()))
        }
    }
}

/// 5xx means the directory is unwell; anything else is a refusal.
fn status_error(status: StatusCode) -> DirectoryError {
    if status.is_server_error() {
        DirectoryError::Status(status)
    } else {
        DirectoryError::Rejected(format!("HTTP {}", status))
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    token_type: String,
    #[serde(default)]
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[async_trait]
impl IdentityDirectory for HttpDirectory {
    async fn get_roles(&self) -> Result<Vec<DirectoryRole>, DirectoryError> {
        let request = self
            .request(Method::GET, "api/get-roles")?
            .query(&[("owner", self.organization.as_str())]);
        let roles: Vec<DirectoryRole> = self.fetch(request).await?.unwrap_or_default();
        debug!(count = roles.len(), "Fetched roles from directory");
        Ok(roles)
    }

    async fn get_users(&self) -> Result<Vec<DirectoryUser>, DirectoryError> {
        let request = self
            .request(Method::GET, "api/get-users")?
            .query(&[("owner", self.organization.as_str())]);
        let users: Vec<DirectoryUser> = self.fetch(request).await?.unwrap_or_default();
        debug!(count = users.len(), "Fetched users from directory");
        Ok(users)
    }

    async fn get_user(&self, name: &str) -> Result<Option<DirectoryUser>, DirectoryError> {
        let id = self.record_id(name);
        let request = self
            .request(Method::GET, "api/get-user")?
            .query(&[("id", id.as_str())]);
        self.fetch(request).await
    }

    async fn add_user(&self, mut user: DirectoryUser) -> Result<(), DirectoryError> {
        user.owner = self.organization.clone();
        self.mutate("api/add-user", None, &user).await
    }

    async fn update_user(&self, mut user: DirectoryUser) -> Result<(), DirectoryError> {
        user.owner = self.organization.clone();
        let id = user.id();
        self.mutate("api/update-user", Some(&id), &user).await
    }

    async fn delete_user(&self, name: &str) -> Result<(), DirectoryError> {
        let user = DirectoryUser::new(self.organization.as_str(), name);
        self.mutate("api/delete-user", None, &user).await
    }

    async fn add_role(&self, mut role: DirectoryRole) -> Result<(), DirectoryError> {
        role.owner = self.organization.clone();
        self.mutate("api/add-role", None, &role).await
    }

    async fn update_role(&self, mut role: DirectoryRole) -> Result<(), DirectoryError> {
        role.owner = self.organization.clone();
        let id = self.record_id(&role.name);
        self.mutate("api/update-role", Some(&id), &role).await
    }

    async fn delete_role(&self, name: &str) -> Result<(), DirectoryError> {
        let role = DirectoryRole::new(self.organization.as_str(), name);
        self.mutate("api/delete-role", None, &role).await
    }

    fn signin_url(&self, redirect_url: &str) -> Result<String, DirectoryError> {
        let mut url = self.url("login/oauth/authorize")?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_url)
            .append_pair("scope", "read")
            .append_pair("state", &self.application);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, code: &str, _state: &str) -> Result<OAuthToken, DirectoryError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("code", code),
        ];
        let response = self
            .client
            .post(self.url("api/login/oauth/access_token")?)
            .form(&form)
            .send()
            .await?;

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;

        if let Some(error) = token.error.filter(|e| !e.is_empty()) {
            return Err(DirectoryError::Rejected(format!(
                "{}: {}",
                error,
                token.error_description.unwrap_or_default()
            )));
        }

        let access_token = token
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| DirectoryError::Decode("token response carried no access_token".into()))?;

        Ok(OAuthToken {
            access_token,
            token_type: token.token_type,
            expires_in: token.expires_in,
            refresh_token: token.refresh_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(endpoint: &str) -> DirectoryConfig {
        DirectoryConfig {
            endpoint: endpoint.to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            organization: "acme".to_string(),
            application: "gateway".to_string(),
            redirect_url: "http://localhost:9000/callback".to_string(),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_signin_url() {
        let directory = HttpDirectory::new(&config("http://sso.acme.test/")).unwrap();
        let url = directory.signin_url("http://localhost:9000/callback").unwrap();
        assert!(url.starts_with("http://sso.acme.test/login/oauth/authorize?"));
        assert!(url.contains("client_id=client"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A9000%2Fcallback"));
        assert!(url.contains("state=gateway"));
    }

    #[test]
    fn test_endpoint_with_path_prefix() {
        let directory = HttpDirectory::new(&config("http://sso.acme.test/casdoor")).unwrap();
        assert_eq!(
            directory.url("api/get-roles").unwrap().as_str(),
            "http://sso.acme.test/casdoor/api/get-roles"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpDirectory::new(&config("not a url")),
            Err(DirectoryError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_envelope_error() {
        let envelope: Envelope<Vec<DirectoryRole>> =
            serde_json::from_str(r#"{"status":"error","msg":"Unauthorized operation"}"#).unwrap();
        assert!(matches!(
            envelope.into_result(),
            Err(DirectoryError::Rejected(msg)) if msg == "Unauthorized operation"
        ));
    }
}
