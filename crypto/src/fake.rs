//! An in-memory [`CryptoEngine`] fake for unit-testing `wire-sdk-core` without a real MLS stack.
//!
//! Groups are tracked as plain epoch counters; "ciphertext" is a trivial reversible encoding so
//! `encrypt_mls`/`decrypt_mls` round-trip without needing real cryptography. Scripted outcomes
//! (queued via `push_welcome_outcome`/`push_decrypt_outcome`/`push_decrypt_error`) let tests drive
//! the orphan-welcome and epoch-drift recovery paths deterministically.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use wire_sdk_common::identifiers::{CryptoClientId, MlsGroupId};

use crate::engine::{CommitBundle, CryptoEngine, CryptoError, DecryptOutcome, WelcomeOutcome};

const CIPHERTEXT_PREFIX: &[u8] = b"fake-mls:";

struct State {
    groups: HashMap<MlsGroupId, u64>,
    key_package_count: usize,
    welcome_outcomes: VecDeque<Result<(MlsGroupId, WelcomeOutcome), String>>,
    decrypt_outcomes: HashMap<MlsGroupId, VecDeque<Result<DecryptOutcome, String>>>,
}

pub struct FakeCryptoEngine {
    client_id: CryptoClientId,
    state: Mutex<State>,
}

impl FakeCryptoEngine {
    pub fn new(client_id: CryptoClientId) -> Self {
        Self {
            client_id,
            state: Mutex::new(State {
                groups: HashMap::new(),
                key_package_count: 100,
                welcome_outcomes: VecDeque::new(),
                decrypt_outcomes: HashMap::new(),
            }),
        }
    }

    pub fn set_key_package_count(&self, count: usize) {
        self.state.lock().unwrap().key_package_count = count;
    }

    pub fn insert_group(&self, group_id: MlsGroupId, epoch: u64) {
        self.state.lock().unwrap().groups.insert(group_id, epoch);
    }

    /// Schedules the next `process_welcome` call to return this outcome instead of the default
    /// (`Joined` into a fresh empty group at epoch 0).
    pub fn push_welcome_outcome(&self, outcome: Result<(MlsGroupId, WelcomeOutcome), String>) {
        self.state.lock().unwrap().welcome_outcomes.push_back(outcome);
    }

    /// Schedules the next `decrypt_mls` call for `group_id` to return this outcome instead of the
    /// default (decode the fake ciphertext back to plaintext).
    pub fn push_decrypt_outcome(&self, group_id: MlsGroupId, outcome: Result<DecryptOutcome, String>) {
        self.state
            .lock()
            .unwrap()
            .decrypt_outcomes
            .entry(group_id)
            .or_default()
            .push_back(outcome);
    }
}

fn fake_commit_bundle() -> CommitBundle {
    CommitBundle {
        commit: b"fake-commit".to_vec(),
        group_info: b"fake-group-info".to_vec(),
        welcome: None,
    }
}

#[async_trait]
impl CryptoEngine for FakeCryptoEngine {
    fn client_id(&self) -> &CryptoClientId {
        &self.client_id
    }

    async fn conversation_exists(&self, group_id: &MlsGroupId) -> Result<bool, CryptoError> {
        Ok(self.state.lock().unwrap().groups.contains_key(group_id))
    }

    async fn conversation_epoch(&self, group_id: &MlsGroupId) -> Result<u64, CryptoError> {
        self.state
            .lock()
            .unwrap()
            .groups
            .get(group_id)
            .copied()
            .ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))
    }

    async fn process_welcome(&self, _welcome: &[u8]) -> Result<(MlsGroupId, WelcomeOutcome), CryptoError> {
        let scripted = self.state.lock().unwrap().welcome_outcomes.pop_front();
        if let Some(scripted) = scripted {
            return scripted.map_err(CryptoError::Protocol);
        }
        let group_id = MlsGroupId::from_bytes(uuid::Uuid::new_v4().as_bytes().to_vec());
        self.state.lock().unwrap().groups.insert(group_id.clone(), 0);
        Ok((group_id, WelcomeOutcome::Joined { epoch: 0 }))
    }

    async fn decrypt_mls(&self, group_id: &MlsGroupId, message: &[u8]) -> Result<DecryptOutcome, CryptoError> {
        let scripted = self
            .state
            .lock()
            .unwrap()
            .decrypt_outcomes
            .get_mut(group_id)
            .and_then(VecDeque::pop_front);
        if let Some(scripted) = scripted {
            return scripted.map_err(CryptoError::Protocol);
        }
        if let Some(plaintext) = message.strip_prefix(CIPHERTEXT_PREFIX) {
            Ok(DecryptOutcome::Message(plaintext.to_vec()))
        } else {
            Ok(DecryptOutcome::EpochUpdate)
        }
    }

    async fn encrypt_mls(&self, group_id: &MlsGroupId, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.state.lock().unwrap().groups.contains_key(group_id) {
            return Err(CryptoError::GroupNotFound(group_id.to_string()));
        }
        let mut out = CIPHERTEXT_PREFIX.to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    async fn join_by_external_commit(&self, _group_info: &[u8]) -> Result<(MlsGroupId, CommitBundle), CryptoError> {
        let group_id = MlsGroupId::from_bytes(uuid::Uuid::new_v4().as_bytes().to_vec());
        self.state.lock().unwrap().groups.insert(group_id.clone(), 0);
        Ok((group_id, fake_commit_bundle()))
    }

    async fn create_conversation(
        &self,
        _external_senders_public_key: &[u8],
        _ciphersuite: u16,
    ) -> Result<(MlsGroupId, CommitBundle), CryptoError> {
        let group_id = MlsGroupId::from_bytes(uuid::Uuid::new_v4().as_bytes().to_vec());
        self.state.lock().unwrap().groups.insert(group_id.clone(), 0);
        Ok((group_id, fake_commit_bundle()))
    }

    async fn add_members(&self, group_id: &MlsGroupId, _key_packages: &[Vec<u8>]) -> Result<CommitBundle, CryptoError> {
        let mut state = self.state.lock().unwrap();
        let epoch = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))?;
        *epoch += 1;
        Ok(fake_commit_bundle())
    }

    async fn remove_members(&self, group_id: &MlsGroupId, _members: &[CryptoClientId]) -> Result<CommitBundle, CryptoError> {
        let mut state = self.state.lock().unwrap();
        let epoch = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))?;
        *epoch += 1;
        Ok(fake_commit_bundle())
    }

    async fn update_keying_material(&self, group_id: &MlsGroupId) -> Result<CommitBundle, CryptoError> {
        let mut state = self.state.lock().unwrap();
        let epoch = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| CryptoError::GroupNotFound(group_id.to_string()))?;
        *epoch += 1;
        Ok(fake_commit_bundle())
    }

    async fn generate_key_packages(&self, count: usize, _ciphersuite: u16) -> Result<Vec<Vec<u8>>, CryptoError> {
        self.state.lock().unwrap().key_package_count += count;
        Ok((0..count).map(|i| format!("fake-key-package-{i}").into_bytes()).collect())
    }

    async fn key_package_count(&self) -> Result<usize, CryptoError> {
        Ok(self.state.lock().unwrap().key_package_count)
    }

    fn public_key(&self) -> Vec<u8> {
        b"fake-public-key".to_vec()
    }

    async fn wipe_conversation(&self, group_id: &MlsGroupId) -> Result<(), CryptoError> {
        self.state.lock().unwrap().groups.remove(group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_id() -> CryptoClientId {
        CryptoClientId::new(uuid::Uuid::new_v4(), "device1", "example.com")
    }

    #[tokio::test]
    async fn encrypt_decrypt_round_trips() {
        let engine = FakeCryptoEngine::new(client_id());
        let (group_id, _) = engine.create_conversation(b"senders", 0xf031).await.unwrap();

        let ciphertext = engine.encrypt_mls(&group_id, b"hello").await.unwrap();
        let outcome = engine.decrypt_mls(&group_id, &ciphertext).await.unwrap();
        match outcome {
            DecryptOutcome::Message(bytes) => assert_eq!(bytes, b"hello"),
            DecryptOutcome::EpochUpdate => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn add_members_bumps_epoch() {
        let engine = FakeCryptoEngine::new(client_id());
        let (group_id, _) = engine.create_conversation(b"senders", 0xf031).await.unwrap();
        assert_eq!(engine.conversation_epoch(&group_id).await.unwrap(), 0);

        engine.add_members(&group_id, &[vec![1, 2, 3]]).await.unwrap();
        assert_eq!(engine.conversation_epoch(&group_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scripted_welcome_outcome_is_returned_once() {
        let engine = FakeCryptoEngine::new(client_id());
        engine.push_welcome_outcome(Ok((MlsGroupId::from_bytes(vec![9]), WelcomeOutcome::Orphan)));

        let (group_id, outcome) = engine.process_welcome(b"welcome").await.unwrap();
        assert_eq!(group_id, MlsGroupId::from_bytes(vec![9]));
        assert!(matches!(outcome, WelcomeOutcome::Orphan));

        // Second call falls back to the default behavior.
        let (_, outcome) = engine.process_welcome(b"welcome").await.unwrap();
        assert!(matches!(outcome, WelcomeOutcome::Joined { .. }));
    }
}
