//! Pure encode/decode between [`wire_sdk_common::WireMessage`] and the generic-message protobuf
//! wire format (C3 `ProtobufCodec`).
//!
//! Both directions are free functions rather than methods so the crate has nothing to construct:
//! no client, no connection, no state. `decode` takes the header fields the protobuf itself does
//! not carry (conversation id, sender, timestamp) from the caller, since those are transport-level
//! context rather than message content.

mod codec;

include!(concat!(env!("OUT_DIR"), "/wire.messages.rs"));

pub use codec::{decode, encode};
