//! REST and WebSocket client for the Wire backend API (§6).
//!
//! `ApiClient` is a thin wrapper around a single [`reqwest::Client`]: it exposes one method per
//! backend endpoint and leaves bearer-token acquisition to a pluggable [`auth::TokenProvider`], the
//! same shape the teacher's gRPC client uses for its channel — one shared connection, many thin
//! endpoint methods hung off it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use url::Url;
use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId, QualifiedId};

pub mod auth;
pub mod dto;
pub mod error;
pub mod websocket;

use auth::TokenProvider;
use dto::*;
use error::BackendError;

/// Requests are retried with exponential backoff on 5xx up to this many times (§5).
const MAX_RETRIES: u32 = 10;
const INITIAL_BACKOFF: Duration = Duration::from_millis(200);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    http: Client,
    base_url: Url,
    token_provider: Arc<dyn TokenProvider>,
}

impl ApiClient {
    fn new(base_url: Url, token_provider: Arc<dyn TokenProvider>) -> Result<Self, BackendError> {
        let http = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(BackendError::Http)?;
        Ok(Self {
            inner: Arc::new(ApiClientInner { http, base_url, token_provider }),
        })
    }

    /// Production flow: the access token is supplied directly (§9's resolved Open Question).
    pub fn bearer_token(base_url: Url, token: impl Into<String>) -> Result<Self, BackendError> {
        Self::new(base_url, Arc::new(auth::BearerTokenProvider::new(token)))
    }

    /// Demo/sample backend flow: an email/password cookie exchange via `/login` + `/access`.
    pub fn demo_login(base_url: Url, email: impl Into<String>, password: impl Into<String>) -> Result<Self, BackendError> {
        Self::new(base_url, Arc::new(auth::DemoLoginProvider::new(email, password)))
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Lets the token provider attach a client id once `CryptoBootstrap` has registered a device,
    /// needed by the demo flow's `/access?client_id=…`.
    pub fn set_client_id(&self, client_id: &str) {
        self.inner.token_provider.set_client_id(client_id);
    }

    fn url(&self, path: &str) -> Result<Url, BackendError> {
        self.inner.base_url.join(path).map_err(|e| BackendError::InvalidUrl(e.to_string()))
    }

    /// Builds an authenticated request each attempt (token may have been refreshed between
    /// retries) and decodes a JSON body on success.
    async fn execute<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T, BackendError> {
        self.execute_with_body::<(), T>(method, path, None).await
    }

    async fn execute_with_body<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, BackendError> {
        let response = self.execute_authed(method, path, body).await?;
        response.json().await.map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn execute_empty<B: Serialize>(&self, method: Method, path: &str, body: Option<&B>) -> Result<(), BackendError> {
        self.execute_authed(method, path, body).await?;
        Ok(())
    }

    async fn execute_authed<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, BackendError> {
        let url = self.url(path)?;
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=MAX_RETRIES {
            let token = self.inner.token_provider.access_token(&self.inner.http, &self.inner.base_url).await?;
            let mut request = self.inner.http.request(method.clone(), url.clone()).bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(BackendError::Http)?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }
            if status.is_server_error() && attempt < MAX_RETRIES {
                warn!(%status, attempt, %path, "backend server error, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            let status_code = status.as_u16();
            let response_body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BackendError::Server { status: status_code });
            }
            return Err(BackendError::Client { status: status_code, body: response_body });
        }
        unreachable!("loop always returns before exceeding MAX_RETRIES")
    }

    async fn execute_mls_bytes(&self, method: Method, path: &str, body: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let url = self.url(path)?;
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=MAX_RETRIES {
            let token = self.inner.token_provider.access_token(&self.inner.http, &self.inner.base_url).await?;
            let response = self
                .inner
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token)
                .header("content-type", "message/mls")
                .body(body.clone())
                .send()
                .await
                .map_err(BackendError::Http)?;
            let status = response.status();
            if status.is_success() {
                return response.bytes().await.map(|b| b.to_vec()).map_err(BackendError::Http);
            }
            if status.is_server_error() && attempt < MAX_RETRIES {
                warn!(%status, attempt, %path, "backend server error, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            let status_code = status.as_u16();
            let response_body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BackendError::Server { status: status_code });
            }
            return Err(BackendError::Client { status: status_code, body: response_body });
        }
        unreachable!("loop always returns before exceeding MAX_RETRIES")
    }

    // ---- discovery ----

    pub async fn api_version(&self) -> Result<ApiVersionResponse, BackendError> {
        self.execute(Method::GET, "api-version").await
    }

    pub async fn feature_configs(&self) -> Result<FeatureConfigsResponse, BackendError> {
        self.execute(Method::GET, "feature-configs").await
    }

    /// Accepts a pending team invitation; the event router calls this on `TeamInvite` before
    /// projecting the team locally.
    pub async fn confirm_team_invite(&self, team_id: &wire_sdk_common::identifiers::TeamId) -> Result<(), BackendError> {
        self.execute_empty::<()>(Method::POST, &format!("teams/{}/confirm", team_id.0), None).await
    }

    // ---- client registration (C9) ----

    pub async fn register_client(&self, request: &RegisterClientRequest) -> Result<RegisterClientResponse, BackendError> {
        self.execute_with_body(Method::POST, "clients", Some(request)).await
    }

    pub async fn attach_mls_public_key(&self, client_id: &str, public_key: &[u8], ciphersuite_name: &str) -> Result<(), BackendError> {
        use base64::Engine as _;
        let mut mls_public_keys = HashMap::new();
        mls_public_keys.insert(ciphersuite_name.to_string(), base64::engine::general_purpose::STANDARD.encode(public_key));
        let request = AttachMlsPublicKeyRequest { mls_public_keys };
        self.execute_empty(Method::PUT, &format!("clients/{client_id}"), Some(&request)).await
    }

    pub async fn mls_public_keys(&self) -> Result<MlsPublicKeysResponse, BackendError> {
        self.execute(Method::GET, "mls/public-keys").await
    }

    // ---- key packages ----

    pub async fn upload_key_packages(&self, client_id: &CryptoClientId, key_packages: Vec<Vec<u8>>) -> Result<(), BackendError> {
        use base64::Engine as _;
        let request = UploadKeyPackagesRequest {
            key_packages: key_packages
                .iter()
                .map(|kp| base64::engine::general_purpose::STANDARD.encode(kp))
                .collect(),
        };
        self.execute_empty(Method::POST, &format!("mls/key-packages/self/{client_id}"), Some(&request)).await
    }

    pub async fn claim_key_packages(&self, user_id: &QualifiedId) -> Result<Vec<Vec<u8>>, BackendError> {
        use base64::Engine as _;
        let response: ClaimedKeyPackagesResponse = self
            .execute(Method::POST, &format!("mls/key-packages/claim/{}/{}", user_id.domain, user_id.id))
            .await?;
        response
            .key_packages
            .iter()
            .map(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded)
                    .map_err(|e| BackendError::Decode(e.to_string()))
            })
            .collect()
    }

    pub async fn key_package_count(&self, client_id: &CryptoClientId) -> Result<u32, BackendError> {
        #[derive(serde::Deserialize)]
        struct Count {
            count: u32,
        }
        let response: Count = self.execute(Method::GET, &format!("mls/key-packages/self/{client_id}/count")).await?;
        Ok(response.count)
    }

    // ---- MLS wire traffic (C4) ----

    pub async fn post_commit_bundle(&self, group_id: &MlsGroupId, bundle: Vec<u8>) -> Result<(), BackendError> {
        self.execute_mls_bytes(Method::POST, &format!("mls/commit-bundles/{}", group_id.to_base64()), bundle)
            .await
            .map(|_| ())
    }

    pub async fn post_mls_message(&self, message: Vec<u8>) -> Result<(), BackendError> {
        self.execute_mls_bytes(Method::POST, "mls/messages", message).await.map(|_| ())
    }

    pub async fn fetch_group_info(&self, group_id: &MlsGroupId) -> Result<Vec<u8>, BackendError> {
        self.execute_mls_bytes(Method::GET, &format!("conversations/group-info/{}", group_id.to_base64()), Vec::new())
            .await
    }

    // ---- conversations (C5) ----

    pub async fn get_conversation(&self, id: &QualifiedId) -> Result<ConversationResponse, BackendError> {
        self.execute(Method::GET, &format!("conversations/{}/{}", id.domain, id.id)).await
    }

    pub async fn get_one_to_one(&self, other: &QualifiedId) -> Result<ConversationResponse, BackendError> {
        self.execute(Method::GET, &format!("conversations/one2one/{}/{}", other.domain, other.id)).await
    }

    pub async fn create_conversation(
        &self,
        name: Option<&str>,
        conversation_type: &'static str,
        team: Option<uuid::Uuid>,
    ) -> Result<ConversationResponse, BackendError> {
        let request = CreateConversationRequest { name, conversation_type, team };
        self.execute_with_body(Method::POST, "conversations", Some(&request)).await
    }

    pub async fn delete_conversation(&self, id: &QualifiedId) -> Result<(), BackendError> {
        self.execute_empty::<()>(Method::DELETE, &format!("conversations/{}/{}", id.domain, id.id), None)
            .await
    }

    pub async fn remove_member(&self, conversation: &QualifiedId, member: &QualifiedId) -> Result<(), BackendError> {
        self.execute_empty::<()>(
            Method::DELETE,
            &format!(
                "conversations/{}/{}/members/{}/{}",
                conversation.domain, conversation.id, member.domain, member.id
            ),
            None,
        )
        .await
    }

    pub async fn update_member_role(
        &self,
        conversation: &QualifiedId,
        member: &QualifiedId,
        role: wire_sdk_common::Role,
    ) -> Result<(), BackendError> {
        let request = UpdateMemberRoleRequest { conversation_role: role_to_wire(role).to_string() };
        self.execute_empty(
            Method::PUT,
            &format!(
                "conversations/{}/{}/members/{}/{}",
                conversation.domain, conversation.id, member.domain, member.id
            ),
            Some(&request),
        )
        .await
    }

    pub async fn list_conversation_ids(&self, paging_state: Option<String>, size: u32) -> Result<ListConversationIdsResponse, BackendError> {
        let request = ListConversationIdsRequest { paging_state, size };
        self.execute_with_body(Method::POST, "conversations/list-ids", Some(&request)).await
    }

    pub async fn list_conversations(&self, ids: &[QualifiedId]) -> Result<ListConversationsResponse, BackendError> {
        let request = ListConversationsRequest { qualified_ids: ids.iter().map(Into::into).collect() };
        self.execute_with_body(Method::POST, "conversations/list", Some(&request)).await
    }

    // ---- notifications (C8) ----

    pub async fn last_notification_id(&self) -> Result<Option<uuid::Uuid>, BackendError> {
        #[derive(serde::Deserialize)]
        struct LastNotification {
            id: Option<uuid::Uuid>,
        }
        let response: LastNotification = self.execute(Method::GET, "notifications/last").await?;
        Ok(response.id)
    }

    pub async fn notifications_since(&self, since: Option<uuid::Uuid>, size: u32) -> Result<NotificationPageResponse, BackendError> {
        let mut path = format!("notifications?size={size}");
        if let Some(since) = since {
            path.push_str(&format!("&since={since}"));
        }
        self.execute(Method::GET, &path).await
    }

    // ---- assets (C10) ----

    pub async fn upload_asset(&self, ciphertext: Vec<u8>, public: bool, sha256_as_md5: Vec<u8>) -> Result<AssetUploadResponse, BackendError> {
        use base64::Engine as _;
        let metadata = AssetMetadataPart { public, retention: "expiring" };
        let metadata_json = serde_json::to_vec(&metadata).map_err(|e| BackendError::Decode(e.to_string()))?;
        let md5_header = base64::engine::general_purpose::STANDARD.encode(&sha256_as_md5);
        let url = self.url("assets/v3")?;
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=MAX_RETRIES {
            let token = self.inner.token_provider.access_token(&self.inner.http, &self.inner.base_url).await?;
            let form = reqwest::multipart::Form::new()
                .part(
                    "metadata",
                    reqwest::multipart::Part::bytes(metadata_json.clone())
                        .mime_str("application/json")
                        .map_err(BackendError::Http)?,
                )
                .part(
                    "asset",
                    reqwest::multipart::Part::bytes(ciphertext.clone())
                        .mime_str("application/octet-stream")
                        .map_err(BackendError::Http)?,
                );
            let response = self
                .inner
                .http
                .post(url.clone())
                .bearer_auth(token)
                .header("Content-MD5", md5_header.clone())
                .multipart(form)
                .send()
                .await
                .map_err(BackendError::Http)?;
            let status = response.status();
            if status.is_success() {
                return response.json().await.map_err(|e| BackendError::Decode(e.to_string()));
            }
            if status.is_server_error() && attempt < MAX_RETRIES {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BackendError::Server { status: status_code });
            }
            return Err(BackendError::Client { status: status_code, body });
        }
        unreachable!("loop always returns before exceeding MAX_RETRIES")
    }

    pub async fn download_asset(&self, domain: &str, key: &str, asset_token: Option<&str>) -> Result<Vec<u8>, BackendError> {
        let url = self.url(&format!("assets/v4/{domain}/{key}"))?;
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 0..=MAX_RETRIES {
            let token = self.inner.token_provider.access_token(&self.inner.http, &self.inner.base_url).await?;
            let mut request = self.inner.http.get(url.clone()).bearer_auth(token);
            if let Some(asset_token) = asset_token {
                request = request.header("Asset-Token", asset_token);
            }
            let response = request.send().await.map_err(BackendError::Http)?;
            let status = response.status();
            if status.is_success() {
                return response.bytes().await.map(|b| b.to_vec()).map_err(BackendError::Http);
            }
            if status.is_server_error() && attempt < MAX_RETRIES {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
            let status_code = status.as_u16();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(BackendError::Server { status: status_code });
            }
            return Err(BackendError::Client { status: status_code, body });
        }
        unreachable!("loop always returns before exceeding MAX_RETRIES")
    }

    // ---- WebSocket ----

    pub async fn connect_websocket(&self, client_id: &str) -> Result<websocket::WebSocketConnection, BackendError> {
        let token = self.inner.token_provider.access_token(&self.inner.http, &self.inner.base_url).await?;
        websocket::WebSocketConnection::connect(&self.inner.base_url, &token, client_id).await
    }
}

/// Adapts [`ApiClient`] to the MLS engine's transport seam (C4) so `wire-sdk-crypto` never talks
/// to `reqwest` directly.
#[async_trait::async_trait]
impl wire_sdk_crypto::transport::MlsTransport for ApiClient {
    async fn send_commit_bundle(&self, group_id: &MlsGroupId, bundle: &[u8]) -> Result<(), wire_sdk_crypto::transport::TransportError> {
        self.post_commit_bundle(group_id, bundle.to_vec())
            .await
            .map_err(|e| wire_sdk_crypto::transport::TransportError::Rejected(e.to_string()))
    }

    async fn send_message(&self, _group_id: &MlsGroupId, message: &[u8]) -> Result<(), wire_sdk_crypto::transport::TransportError> {
        self.post_mls_message(message.to_vec())
            .await
            .map_err(|e| wire_sdk_crypto::transport::TransportError::Rejected(e.to_string()))
    }

    async fn fetch_group_info(&self, group_id: &MlsGroupId) -> Result<Vec<u8>, wire_sdk_crypto::transport::TransportError> {
        ApiClient::fetch_group_info(self, group_id)
            .await
            .map_err(|e| wire_sdk_crypto::transport::TransportError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn client_against(server: &mockito::ServerGuard) -> ApiClient {
        ApiClient::bearer_token(Url::parse(&server.url()).unwrap(), "test-token").unwrap()
    }

    #[tokio::test]
    async fn api_version_decodes_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api-version")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"domain":"wire.example.com","federation":true,"supported":[8,9],"development":[10]}"#)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let response = client.api_version().await.unwrap();
        assert_eq!(response.domain, "wire.example.com");
        assert_eq!(response.supported, vec![8, 9]);
    }

    #[tokio::test]
    async fn client_error_carries_body_for_stale_epoch_sniffing() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api-version")
            .with_status(409)
            .with_body(r#"{"label":"mls-stale-message"}"#)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let err = client.api_version().await.unwrap_err();
        assert!(err.is_stale_epoch());
    }

    #[tokio::test]
    async fn server_error_retries_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let _first = server.mock("GET", "/api-version").with_status(503).expect(1).create_async().await;
        let _second = server
            .mock("GET", "/api-version")
            .with_status(200)
            .with_body(r#"{"domain":"wire.example.com","federation":false,"supported":[9],"development":[]}"#)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let response = client.api_version().await.unwrap();
        assert_eq!(response.domain, "wire.example.com");
    }

    #[tokio::test]
    async fn claim_key_packages_decodes_base64_entries() {
        use base64::Engine as _;
        let mut server = mockito::Server::new_async().await;
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"key-package-bytes");
        let _mock = server
            .mock("POST", mockito::Matcher::Regex(r"^/mls/key-packages/claim/.*".into()))
            .with_status(200)
            .with_body(format!(r#"{{"key_packages":["{encoded}"]}}"#))
            .create_async()
            .await;

        let client = client_against(&server).await;
        let user_id = QualifiedId::new(uuid::Uuid::new_v4(), "wire.example.com");
        let key_packages = client.claim_key_packages(&user_id).await.unwrap();
        assert_eq!(key_packages, vec![b"key-package-bytes".to_vec()]);
    }

    #[tokio::test]
    async fn post_commit_bundle_sends_mls_content_type() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", mockito::Matcher::Regex(r"^/mls/commit-bundles/.*".into()))
            .match_header("content-type", "message/mls")
            .with_status(200)
            .create_async()
            .await;

        let client = client_against(&server).await;
        let group_id = MlsGroupId::from_bytes(vec![1, 2, 3]);
        client.post_commit_bundle(&group_id, vec![9, 9, 9]).await.unwrap();
    }
}
