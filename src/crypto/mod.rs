pub mod keys;
pub mod signatures;

pub use keys::{KeyProvider, StaticKeyProvider};
pub use signatures::SignatureManager;
