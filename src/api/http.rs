//! HTTP API client for the photo booth backend.

use futures_util::future::{BoxFuture, FutureExt};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::auth::AuthSession;
use super::BackendApi;
use crate::compose::CapturedImage;
use crate::config;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Server error: {0}")]
    Server(String),
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Access denied: {0}")]
    Forbidden(String),
    #[error("Admin session expired")]
    SessionExpired,
}

/// Branding and posting settings as served by the backend
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct KioskSettings {
    pub business_name: String,
    pub business_address: String,
    pub hashtags: String,
    pub caption_templates: Vec<String>,
    pub max_photos: u32,
    pub post_interval_minutes: u32,
    pub page_title: String,
    pub logo_filename: Option<String>,
    pub background_filename: Option<String>,
}

impl KioskSettings {
    /// Absolute URL of the business logo, if one is configured
    pub fn logo_url(&self, api_base: &str) -> Option<String> {
        self.logo_filename
            .as_deref()
            .filter(|name| !name.is_empty())
            .map(|name| config::asset_url(api_base, name))
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    detail: String,
}

/// HTTP client for the photo booth API
#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.into(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Log in as an admin and start an auth session
    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession, ApiError> {
        let url = config::login_url(&self.base);
        log::info!("Logging in as {} at {}", username, url);

        let response = self
            .client
            .post(&url)
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(login_error(status, &body));
        }

        let login: LoginResponse = response.json().await?;
        log::info!("Logged in as {}", username);
        Ok(AuthSession::issue(login.access_token, config::AUTH_TOKEN_TTL))
    }

    /// Fetch branding settings, authenticated when a session is given
    pub async fn fetch_settings(&self, auth: Option<&AuthSession>) -> Result<KioskSettings, ApiError> {
        let url = config::settings_url(&self.base);
        log::debug!("Fetching settings from {}", url);

        let mut request = self.client.get(&url);
        if let Some(auth) = auth {
            let token = auth.bearer().ok_or(ApiError::SessionExpired)?;
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::UNAUTHORIZED {
                return Err(ApiError::SessionExpired);
            }
            return Err(ApiError::Server(format!("{}: {}", status, body)));
        }

        let settings: KioskSettings = response.json().await?;
        Ok(settings)
    }

    /// Upload a confirmed still
    pub async fn upload_photo(&self, image: &CapturedImage) -> Result<(), ApiError> {
        let url = config::upload_url(&self.base);
        log::info!(
            "Uploading {}x{} photo ({} bytes) to {}",
            image.width,
            image.height,
            image.bytes.len(),
            url
        );

        let part = Part::bytes(image.bytes.to_vec())
            .file_name(config::UPLOAD_FILE_NAME)
            .mime_str("image/png")?;
        let form = Form::new().part(config::UPLOAD_FIELD, part);

        let response = self.client.post(&url).multipart(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Server(format!("{}: {}", status, body)));
        }

        // Body is informational only
        let _ = response.bytes().await;
        log::info!("Photo uploaded");
        Ok(())
    }

    /// Fetch image bytes from a URL
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, ApiError> {
        log::debug!("Fetching image from {}", url);
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ApiError::Server(format!("Failed to fetch image: {}", status)));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}

impl BackendApi for ApiClient {
    fn upload_photo(&self, image: CapturedImage) -> BoxFuture<'static, Result<(), ApiError>> {
        let client = self.clone();
        async move { client.upload_photo(&image).await }.boxed()
    }

    fn fetch_image(&self, url: String) -> BoxFuture<'static, Result<Vec<u8>, ApiError>> {
        let client = self.clone();
        async move { client.fetch_image(&url).await }.boxed()
    }
}

/// Map a failed login response to an error the operator can act on
fn login_error(status: StatusCode, body: &str) -> ApiError {
    let detail = serde_json::from_str::<ErrorDetail>(body)
        .map(|e| e.detail)
        .unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => ApiError::InvalidCredentials,
        StatusCode::FORBIDDEN if detail.contains("pending approval") => ApiError::Forbidden(
            "account is pending approval, contact the administrator".into(),
        ),
        StatusCode::FORBIDDEN if detail.contains("deactivated") => {
            ApiError::Forbidden("account has been deactivated, contact the administrator".into())
        }
        StatusCode::FORBIDDEN if !detail.is_empty() => ApiError::Forbidden(detail),
        StatusCode::FORBIDDEN => ApiError::Forbidden("access denied".into()),
        _ if !detail.is_empty() => ApiError::Server(format!("{}: {}", status, detail)),
        _ => ApiError::Server(format!("{}: login failed", status)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_deserialize() {
        let json = r##"{
            "business_name": "Cafe Selfie",
            "business_address": "1 Main St",
            "hashtags": "#selfie",
            "caption_templates": ["Hello", "World"],
            "max_photos": 15,
            "post_interval_minutes": 5,
            "page_title": "TMTSelfie",
            "logo_filename": "/static/uploads/logo.png",
            "background_filename": null
        }"##;
        let settings: KioskSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.page_title, "TMTSelfie");
        assert_eq!(settings.caption_templates.len(), 2);
        assert_eq!(
            settings.logo_url("http://localhost:8000").as_deref(),
            Some("http://localhost:8000/static/uploads/logo.png")
        );
    }

    #[test]
    fn test_settings_tolerate_missing_fields() {
        let settings: KioskSettings = serde_json::from_str(r#"{"page_title": "Booth"}"#).unwrap();
        assert_eq!(settings.page_title, "Booth");
        assert_eq!(settings.logo_url("http://localhost:8000"), None);

        let empty_logo = KioskSettings {
            logo_filename: Some(String::new()),
            ..settings
        };
        assert_eq!(empty_logo.logo_url("http://localhost:8000"), None);
    }

    #[test]
    fn test_login_error_mapping() {
        assert!(matches!(
            login_error(StatusCode::UNAUTHORIZED, "{}"),
            ApiError::InvalidCredentials
        ));

        match login_error(StatusCode::FORBIDDEN, r#"{"detail": "Account pending approval"}"#) {
            ApiError::Forbidden(msg) => assert!(msg.contains("pending approval")),
            other => panic!("unexpected error: {:?}", other),
        }

        match login_error(StatusCode::FORBIDDEN, r#"{"detail": "Account deactivated"}"#) {
            ApiError::Forbidden(msg) => assert!(msg.contains("deactivated")),
            other => panic!("unexpected error: {:?}", other),
        }

        match login_error(StatusCode::INTERNAL_SERVER_ERROR, "oops") {
            ApiError::Server(msg) => assert!(msg.contains("500")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
