//! Maps the one error type downstream crates can't legally write a `From<_> for WireError` impl
//! for: `wire-sdk-storage`'s bare `anyhow::Error`. `wire-sdk-apiclient`'s `BackendError` and
//! `wire-sdk-crypto`'s `CryptoError` already convert via `?` thanks to the `From` impls living in
//! those crates, since `WireError` is foreign to both and only a local-type impl is legal there.

use wire_sdk_common::WireError;

/// Every local-store failure is treated as an internal invalid-state error; storage methods only
/// fail on corrupt on-disk data or a broken connection, never on caller input.
pub fn storage_err(err: anyhow::Error) -> WireError {
    WireError::invalid_state(err.to_string())
}
