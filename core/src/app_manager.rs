//! The app-facing façade (C10).
//!
//! `send_message` is the one contract every outbound path funnels through: encode via C3, encrypt
//! via C2, POST via C4, retrying once through [`MlsFallback`] on a stale-epoch rejection — the
//! same shape as `ConversationService::commit_add_members`. `send_asset`/`download_asset` layer
//! asset transport and AES-256-GCM confidentiality on top; everything else here is a thin
//! delegation to [`ConversationService`] so an application only has to hold one type.

use std::sync::Arc;

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use chrono::Utc;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::identifiers::QualifiedId;
use wire_sdk_common::message::{AssetMetadata, AssetRemoteData};
use wire_sdk_common::{WireError, WireMessage};
use wire_sdk_crypto::CryptoEngine;
use wire_sdk_storage::Store;

use crate::conversation_service::{AddMembersOutcome, ConversationService};
use crate::error::storage_err;
use crate::mls_fallback::MlsFallback;

/// Length in bytes of the nonce prepended to every uploaded asset ciphertext.
const NONCE_LEN: usize = 12;

pub struct AppManager<E> {
    engine: Arc<E>,
    api: ApiClient,
    store: Store,
    conversation_service: Arc<ConversationService<E>>,
    fallback: Arc<MlsFallback<E>>,
    self_user_id: QualifiedId,
    max_asset_size: u64,
}

impl<E: CryptoEngine> AppManager<E> {
    pub fn new(
        engine: Arc<E>,
        api: ApiClient,
        store: Store,
        conversation_service: Arc<ConversationService<E>>,
        fallback: Arc<MlsFallback<E>>,
        self_user_id: QualifiedId,
        max_asset_size: u64,
    ) -> Self {
        Self { engine, api, store, conversation_service, fallback, self_user_id, max_asset_size }
    }

    /// §4.5: look up the conversation, encode, encrypt, POST, retrying once via `MlsFallback` on
    /// a stale-epoch rejection, and return the message id.
    pub async fn send_message(&self, message: &WireMessage) -> Result<Uuid, WireError> {
        let header =
            message.header().ok_or_else(|| WireError::invalid_parameter("message carries no header"))?;
        let entity = self
            .store
            .conversations()
            .get(&header.conversation_id)
            .await
            .map_err(storage_err)?
            .ok_or_else(|| WireError::entity_not_found(header.conversation_id.to_string()))?;

        let bytes =
            wire_sdk_protos::encode(message).ok_or_else(|| WireError::invalid_parameter("message cannot be encoded"))?;

        let ciphertext = self.engine.encrypt_mls(&entity.mls_group_id, &bytes).await?;
        match self.api.post_mls_message(ciphertext).await {
            Ok(()) => {}
            Err(error) if error.is_stale_epoch() => {
                self.fallback.verify_conversation_out_of_sync(&entity.mls_group_id, &header.conversation_id).await?;
                let ciphertext = self.engine.encrypt_mls(&entity.mls_group_id, &bytes).await?;
                self.api.post_mls_message(ciphertext).await?;
            }
            Err(error) => return Err(error.into()),
        }
        Ok(header.id)
    }

    /// Caps at `max_asset_size`, encrypts with a fresh AES-256-GCM key, uploads, then sends the
    /// resulting `Asset` message through `send_message` (§4.5).
    pub async fn send_asset(
        &self,
        conversation_id: &QualifiedId,
        bytes: Vec<u8>,
        mime_type: String,
        name: Option<String>,
    ) -> Result<Uuid, WireError> {
        if bytes.len() as u64 > self.max_asset_size {
            return Err(WireError::invalid_parameter(format!(
                "asset of {} bytes exceeds the configured {} byte cap",
                bytes.len(),
                self.max_asset_size
            )));
        }
        let size = bytes.len() as u64;

        let key = Aes256Gcm::generate_key(&mut OsRng);
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let cipher = Aes256Gcm::new(&key);
        let ciphertext = cipher
            .encrypt(&nonce, bytes.as_slice())
            .map_err(|_| WireError::cryptographic("asset encryption failed"))?;

        // The nonce travels prepended to the ciphertext; there's nowhere else on the wire to
        // carry it, and the backend never needs to interpret the blob.
        let mut blob = nonce.to_vec();
        blob.extend_from_slice(&ciphertext);

        let mut hasher = Sha256::new();
        hasher.update(&blob);
        let sha256 = hasher.finalize().to_vec();

        // §4.5: the checksum travels in the legacy `md5` multipart field even though it's SHA-256.
        let upload = self.api.upload_asset(blob, false, sha256.clone()).await?;

        let message = WireMessage::Asset {
            header: wire_sdk_common::MessageHeader {
                id: Uuid::new_v4(),
                conversation_id: conversation_id.clone(),
                sender: self.self_user_id.clone(),
                timestamp: Utc::now(),
            },
            asset: AssetRemoteData {
                asset_id: upload.key,
                asset_domain: upload.domain,
                asset_token: upload.token,
                otr_key: key.to_vec(),
                sha256,
            },
            metadata: AssetMetadata { mime_type, size, name },
        };
        self.send_message(&message).await
    }

    /// Fetches the ciphertext, verifies its SHA-256 against `asset.sha256` (P9), then decrypts.
    pub async fn download_asset(&self, asset: &AssetRemoteData) -> Result<Vec<u8>, WireError> {
        let blob = self.api.download_asset(asset.asset_domain.as_deref().unwrap_or(""), &asset.asset_id, asset.asset_token.as_deref()).await?;

        let mut hasher = Sha256::new();
        hasher.update(&blob);
        let digest = hasher.finalize().to_vec();
        if digest != asset.sha256 {
            return Err(WireError::invalid_parameter("downloaded asset checksum does not match assetRemoteData.sha256"));
        }
        if blob.len() < NONCE_LEN || asset.otr_key.len() != 32 {
            return Err(WireError::invalid_parameter("asset ciphertext or key is malformed"));
        }

        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let key = Key::<Aes256Gcm>::from_slice(&asset.otr_key);
        let cipher = Aes256Gcm::new(key);
        let nonce = Nonce::from_slice(nonce_bytes);
        cipher.decrypt(nonce, ciphertext).map_err(|_| WireError::cryptographic("asset decryption failed"))
    }

    pub async fn create_group(&self, name: Option<&str>, user_ids: &[QualifiedId]) -> Result<QualifiedId, WireError> {
        self.conversation_service.create_group(name, user_ids).await
    }

    pub async fn create_one_to_one(&self, user_id: QualifiedId) -> Result<QualifiedId, WireError> {
        self.conversation_service.create_one_to_one(user_id).await
    }

    pub async fn add_members(
        &self,
        conversation_id: &QualifiedId,
        user_ids: &[QualifiedId],
    ) -> Result<AddMembersOutcome, WireError> {
        self.conversation_service.add_members_to_conversation(conversation_id, user_ids).await
    }

    pub async fn remove_members(&self, conversation_id: &QualifiedId, user_ids: &[QualifiedId]) -> Result<(), WireError> {
        self.conversation_service.remove_members_from_conversation(conversation_id, user_ids).await
    }

    pub async fn leave_conversation(&self, conversation_id: &QualifiedId) -> Result<(), WireError> {
        self.conversation_service.leave_conversation(conversation_id).await
    }

    pub async fn delete_conversation(&self, conversation_id: &QualifiedId) -> Result<(), WireError> {
        self.conversation_service.delete_conversation(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId};
    use wire_sdk_common::{ConversationEntity, ConversationType, Protocol};
    use wire_sdk_crypto::FakeCryptoEngine;

    use super::*;

    fn qid() -> QualifiedId {
        QualifiedId::new(Uuid::new_v4(), "example.com")
    }

    async fn manager_for_test(server_url: &str) -> (AppManager<FakeCryptoEngine>, Store, QualifiedId, MlsGroupId) {
        let api = ApiClient::bearer_token(url::Url::parse(server_url).unwrap(), "token").unwrap();
        let pool = wire_sdk_storage::open(":memory:").await.unwrap();
        let (store, _rx) = Store::new(pool);
        let self_user_id = qid();
        let client_id = CryptoClientId::new(self_user_id.id, "device1", &self_user_id.domain);
        let engine = Arc::new(FakeCryptoEngine::new(client_id));
        let fallback = Arc::new(MlsFallback::new(engine.clone(), api.clone(), store.clone()));
        let conversation_service = Arc::new(ConversationService::new(
            engine.clone(),
            api.clone(),
            store.clone(),
            fallback.clone(),
            0xf031,
            self_user_id.clone(),
        ));
        let manager = AppManager::new(
            engine.clone(),
            api,
            store.clone(),
            conversation_service,
            fallback,
            self_user_id.clone(),
            25 * 1024 * 1024,
        );

        let conversation_id = qid();
        let group_id = MlsGroupId::from_bytes(Uuid::new_v4().as_bytes().to_vec());
        engine.insert_group(group_id.clone(), 0);
        let entity = ConversationEntity {
            id: conversation_id.clone(),
            name: None,
            team_id: None,
            mls_group_id: group_id.clone(),
            epoch: 0,
            conversation_type: ConversationType::Group,
            protocol: Protocol::Mls,
        };
        store.conversations().upsert(&entity).await.unwrap();

        (manager, store, conversation_id, group_id)
    }

    #[tokio::test]
    async fn send_message_refuses_unknown_conversation() {
        let server = mockito::Server::new_async().await;
        let (manager, ..) = manager_for_test(&server.url()).await;
        let message = WireMessage::Text {
            header: wire_sdk_common::MessageHeader {
                id: Uuid::new_v4(),
                conversation_id: qid(),
                sender: qid(),
                timestamp: Utc::now(),
            },
            text: "hi".into(),
            mentions: Vec::new(),
            quoted_message_id: None,
        };
        let error = manager.send_message(&message).await.unwrap_err();
        assert!(matches!(error, WireError::EntityNotFound(_)));
    }

    #[tokio::test]
    async fn send_message_encrypts_and_posts_then_returns_the_message_id() {
        let mut server = mockito::Server::new_async().await;
        let (manager, _store, conversation_id, _group_id) = manager_for_test(&server.url()).await;
        let _mock = server.mock("POST", "/mls/messages").with_status(201).create_async().await;

        let message = WireMessage::Text {
            header: wire_sdk_common::MessageHeader {
                id: Uuid::new_v4(),
                conversation_id,
                sender: qid(),
                timestamp: Utc::now(),
            },
            text: "hello".into(),
            mentions: Vec::new(),
            quoted_message_id: None,
        };
        let id = message.id().unwrap();
        let returned = manager.send_message(&message).await.unwrap();
        assert_eq!(returned, id);
    }

    #[tokio::test]
    async fn send_asset_refuses_payloads_over_the_configured_cap() {
        let server = mockito::Server::new_async().await;
        let (manager, _store, conversation_id, _group_id) = manager_for_test(&server.url()).await;

        let mut manager = manager;
        manager.max_asset_size = 4;
        let error = manager
            .send_asset(&conversation_id, vec![0u8; 16], "application/octet-stream".into(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, WireError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn download_asset_fails_on_checksum_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let (manager, ..) = manager_for_test(&server.url()).await;
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(r"^/assets/v4/.*".into()))
            .with_status(200)
            .with_body(vec![1, 2, 3, 4])
            .create_async()
            .await;

        let asset = AssetRemoteData {
            asset_id: "asset-1".into(),
            asset_domain: Some("example.com".into()),
            asset_token: None,
            otr_key: vec![0u8; 32],
            sha256: vec![9u8; 32],
        };
        let error = manager.download_asset(&asset).await.unwrap_err();
        assert!(matches!(error, WireError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn send_asset_uploads_then_sends_the_resulting_asset_message() {
        let mut server = mockito::Server::new_async().await;
        let (manager, _store, conversation_id, _group_id) = manager_for_test(&server.url()).await;

        let _upload_mock = server
            .mock("POST", "/assets/v3")
            .with_status(201)
            .with_body(r#"{"key":"asset-1","domain":"example.com","token":"tok"}"#)
            .create_async()
            .await;
        let _send_mock = server.mock("POST", "/mls/messages").with_status(201).create_async().await;

        let plaintext = b"hello asset".to_vec();
        let message_id =
            manager.send_asset(&conversation_id, plaintext, "text/plain".into(), Some("greeting.txt".into())).await.unwrap();
        assert_ne!(message_id, Uuid::nil());
    }
}
