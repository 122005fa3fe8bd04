//! Device bootstrap (C9): register (or recognize) this app's backend client and construct its
//! [`CryptoEngine`], grounded on the teacher's own "identity is established once, then loaded on
//! every subsequent start" framing for client registration.

use std::sync::Arc;

use base64::Engine as _;
use rand::RngCore;
use tracing::info;
use wire_sdk_apiclient::dto::{PrekeyDto, RegisterClientRequest};
use wire_sdk_apiclient::ApiClient;
use wire_sdk_common::conversation::app_data_keys;
use wire_sdk_common::identifiers::CryptoClientId;
use wire_sdk_common::WireError;
use wire_sdk_crypto::CryptoEngine;
use wire_sdk_storage::Store;

use crate::error::storage_err;
use crate::config::Settings;

/// Matches the teacher's own modest default for a first key-package batch.
pub const DEFAULT_KEYPACKAGE_COUNT: usize = 100;

const STORAGE_KEY_LEN: usize = 32;

/// Everything a composition root needs to keep running after bootstrap completes.
pub struct BootstrapOutcome<E> {
    pub engine: Arc<E>,
    pub client_id: CryptoClientId,
    pub domain: String,
    pub ciphersuite: u16,
}

/// Maps a ciphersuite onto the signature-scheme name the backend's MLS public-key endpoints key
/// their maps by, mirroring `wire_sdk_apiclient::dto::removal_key_for_ciphersuite`'s convention.
fn signature_scheme_name(ciphersuite: u16) -> Option<&'static str> {
    match ciphersuite {
        0x0001 | 0xf031 => Some("ecdsa_secp256r1_sha256"),
        0x0002 => Some("ecdsa_secp384r1_sha384"),
        0x0003 => Some("ecdsa_secp521r1_sha512"),
        0x0004 | 0x0005 => Some("ed25519"),
        0x0006 | 0x0007 => Some("ed448"),
        _ => None,
    }
}

/// A single placeholder Proteus prekey. This SDK never speaks Proteus (every conversation it
/// creates or joins is MLS), but `POST /clients` still requires a non-empty prekey bundle; the
/// bytes are random and never used again.
fn placeholder_prekey(id: u16) -> PrekeyDto {
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    PrekeyDto {
        id,
        key: base64::engine::general_purpose::STANDARD.encode(key),
    }
}

pub struct CryptoBootstrap;

impl CryptoBootstrap {
    /// Runs the full bootstrap sequence described in §4.8. `build_engine` is parameterized so
    /// production code can hand in `OpenMlsCryptoEngine::new` while tests hand in a closure that
    /// wraps `FakeCryptoEngine::new`.
    pub async fn run<E, F>(
        settings: &Settings,
        api: &ApiClient,
        store: &Store,
        build_engine: F,
    ) -> Result<BootstrapOutcome<E>, WireError>
    where
        E: CryptoEngine,
        F: FnOnce(CryptoClientId, u16) -> Result<E, WireError>,
    {
        let feature_configs = api.feature_configs().await?;
        let ciphersuite = feature_configs.mls.default_ciphersuite;

        let api_version = api.api_version().await?;
        let domain = api_version.domain;

        let storage_key = base64::engine::general_purpose::STANDARD
            .decode(&settings.application.cryptography_storage_key)
            .map_err(|_| WireError::invalid_parameter("cryptography_storage_key is not valid base64"))?;
        if storage_key.len() != STORAGE_KEY_LEN {
            return Err(WireError::invalid_parameter(format!(
                "cryptography_storage_key must decode to {STORAGE_KEY_LEN} bytes, got {}",
                storage_key.len()
            )));
        }

        let existing_device_id = store.app().get(app_data_keys::DEVICE_ID).await.map_err(storage_err)?;
        let (device_id, is_first_registration) = match existing_device_id {
            Some(device_id) => {
                info!(%device_id, "reusing previously registered device");
                (device_id, false)
            }
            None => {
                let request = RegisterClientRequest {
                    prekeys: vec![placeholder_prekey(0)],
                    last_prekey: placeholder_prekey(u16::MAX),
                };
                let response = api.register_client(&request).await?;
                store.app().set(app_data_keys::DEVICE_ID, &response.id).await.map_err(storage_err)?;
                info!(device_id = %response.id, "registered new device");
                (response.id, true)
            }
        };

        let client_id = CryptoClientId::new(settings.user_id, &device_id, &domain);
        let engine = Arc::new(build_engine(client_id.clone(), ciphersuite)?);

        if is_first_registration {
            let name = signature_scheme_name(ciphersuite)
                .ok_or_else(|| WireError::cryptographic(format!("unsupported ciphersuite 0x{ciphersuite:04x}")))?;
            api.attach_mls_public_key(&device_id, &engine.public_key(), name).await?;

            let key_packages = engine.generate_key_packages(DEFAULT_KEYPACKAGE_COUNT, ciphersuite).await?;
            api.upload_key_packages(&client_id, key_packages).await?;

            store.app().set_should_rejoin_conversations(true).await.map_err(storage_err)?;
        }

        Ok(BootstrapOutcome { engine, client_id, domain, ciphersuite })
    }
}
