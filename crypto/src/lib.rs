//! The MLS capability surface (C2: `CryptoEngine` trait, C4: `MlsTransport`).
//!
//! No backend or storage dependency lives here — the engine is handed a [`transport::MlsTransport`]
//! by its caller and persists nothing on its own beyond the in-memory group map, matching the
//! component table's framing of the MLS primitives themselves as an external, opaque concern.

pub mod engine;
pub mod fake;
pub mod openmls_engine;
pub mod transport;

pub use engine::{CommitBundle, CryptoEngine, CryptoError, DecryptOutcome, WelcomeOutcome};
pub use fake::FakeCryptoEngine;
pub use openmls_engine::OpenMlsCryptoEngine;
pub use transport::{MlsTransport, TransportError};
