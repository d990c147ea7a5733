//! Typed facade over the chat backend's REST endpoints

use crate::config::SecretString;
use crate::conversation::ThreadStore;
use crate::error::{ChatError, ValidationError};
use crate::http::{ApiRequest, ApiResponse, FormData, RequestBody, Transport};
use crate::keys::KeyStore;
use crate::protocol::{
    normalize_provider, AccessToken, ApiKey, Attachment, Credentials, HealthStatus, Message, NewApiKey,
    NewThread, ProviderCatalog, ProviderInfo, ProviderModels, SendRequest, Thread, User,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Minimum password length accepted by the backend
pub const MIN_PASSWORD_CHARS: usize = 8;

/// Backend client holding the session's bearer token
pub struct BackendApi {
    transport: Arc<dyn Transport>,
    token: RwLock<Option<SecretString>>,
}

impl BackendApi {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            token: RwLock::new(None),
        }
    }

    pub fn with_token(self, token: Option<SecretString>) -> Self {
        self.set_token(token);
        self
    }

    pub fn set_token(&self, token: Option<SecretString>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    pub fn token(&self) -> Option<SecretString> {
        self.token.read().ok().and_then(|slot| slot.clone())
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    fn authorized(&self, request: ApiRequest) -> ApiRequest {
        request.with_bearer(self.token())
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ChatError> {
        self.transport
            .execute(self.authorized(request))
            .await?
            .into_json()
    }

    async fn call_discarding(&self, request: ApiRequest) -> Result<(), ChatError> {
        self.transport.execute(self.authorized(request)).await?;
        Ok(())
    }

    // Accounts

    pub async fn register(&self, credentials: &Credentials) -> Result<User, ChatError> {
        check_credentials(credentials)?;
        if credentials.password.char_count() < MIN_PASSWORD_CHARS {
            return Err(ValidationError::WeakPassword {
                min: MIN_PASSWORD_CHARS,
            }
            .into());
        }
        let user: User = self
            .call(ApiRequest::post("/auth/register").with_body(RequestBody::json(credentials)?))
            .await?;
        info!("Registered account {}", user.email);
        Ok(user)
    }

    /// Log in and keep the issued token for later calls
    pub async fn login(&self, credentials: &Credentials) -> Result<AccessToken, ChatError> {
        check_credentials(credentials)?;
        let token: AccessToken = self
            .call(ApiRequest::post("/auth/login").with_body(RequestBody::json(credentials)?))
            .await?;
        self.set_token(Some(token.access_token.clone()));
        info!("Logged in as {}", credentials.email);
        Ok(token)
    }

    pub async fn current_user(&self) -> Result<User, ChatError> {
        self.call(ApiRequest::get("/auth/me")).await
    }

    // Catalog

    pub async fn providers(&self) -> Result<Vec<ProviderInfo>, ChatError> {
        self.call(ApiRequest::get("/providers")).await
    }

    pub async fn provider_models(&self, provider: &str) -> Result<ProviderModels, ChatError> {
        self.call(ApiRequest::get(format!(
            "/providers/{}/models",
            normalize_provider(provider)
        )))
        .await
    }

    pub async fn catalog(&self) -> Result<ProviderCatalog, ChatError> {
        self.call(ApiRequest::get("/providers-and-models")).await
    }

    // Keys

    pub async fn list_keys(&self) -> Result<Vec<ApiKey>, ChatError> {
        self.call(ApiRequest::get("/api-keys")).await
    }

    pub async fn create_key(&self, key: &NewApiKey) -> Result<ApiKey, ChatError> {
        for (field, value) in [
            ("provider", key.provider.as_str()),
            ("model_name", key.model_name.as_str()),
            ("key_name", key.key_name.as_str()),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::MissingField { field }.into());
            }
        }
        if key.api_key.is_empty() {
            return Err(ValidationError::MissingField { field: "api_key" }.into());
        }

        let created: ApiKey = self
            .call(ApiRequest::post("/api-keys").with_body(RequestBody::json(key)?))
            .await?;
        info!("Stored key {} for {}", created.id, created.provider);
        Ok(created)
    }

    pub async fn delete_key(&self, key_id: &str) -> Result<(), ChatError> {
        self.call_discarding(ApiRequest::delete(format!("/api-keys/{}", key_id)))
            .await
    }

    // Threads

    pub async fn list_threads(&self) -> Result<Vec<Thread>, ChatError> {
        self.call(ApiRequest::get("/threads")).await
    }

    pub async fn create_thread(&self, thread: &NewThread) -> Result<Thread, ChatError> {
        self.call(ApiRequest::post("/threads").with_body(RequestBody::json(thread)?))
            .await
    }

    pub async fn delete_thread(&self, thread_id: &str) -> Result<(), ChatError> {
        self.call_discarding(ApiRequest::delete(format!("/threads/{}", thread_id)))
            .await
    }

    /// Messages of a thread, oldest first
    pub async fn thread_messages(&self, thread_id: &str) -> Result<Vec<Message>, ChatError> {
        self.call(ApiRequest::get(format!("/threads/{}/messages", thread_id)))
            .await
    }

    // Misc

    pub async fn health(&self) -> Result<HealthStatus, ChatError> {
        self.call(ApiRequest::get("/health")).await
    }

    /// Dispatch a chat request; an attachment switches the body to multipart
    /// form data with the file under `file`
    pub async fn chat(
        &self,
        request: &SendRequest,
        attachment: Option<Attachment>,
    ) -> Result<ApiResponse, ChatError> {
        let body = match attachment {
            Some(attachment) => {
                RequestBody::Form(FormData::new(request.form_fields()).with_file("file", attachment))
            }
            None => RequestBody::json(request)?,
        };
        self.transport
            .execute(self.authorized(ApiRequest::post("/chat").with_body(body)))
            .await
    }
}

fn check_credentials(credentials: &Credentials) -> Result<(), ValidationError> {
    if !credentials.email.contains('@') {
        return Err(ValidationError::InvalidEmail);
    }
    if credentials.password.is_empty() {
        return Err(ValidationError::MissingField { field: "password" });
    }
    Ok(())
}

#[async_trait]
impl KeyStore for BackendApi {
    async fn active_keys(&self, provider: &str) -> Result<Vec<ApiKey>, ChatError> {
        let wanted = normalize_provider(provider);
        let keys: Vec<ApiKey> = self
            .list_keys()
            .await?
            .into_iter()
            .filter(|key| key.is_active && normalize_provider(&key.provider) == wanted)
            .collect();
        debug!("{} active keys for provider {}", keys.len(), wanted);
        Ok(keys)
    }
}

#[async_trait]
impl ThreadStore for BackendApi {
    async fn messages(&self, thread_id: &str) -> Result<Vec<Message>, ChatError> {
        self.thread_messages(thread_id).await
    }
}
