//! TLS helpers shared by the liqo crates.
//!
//! PEM files are read in blocking tasks, as [`rustls_pemfile`] exposes only a synchronous API.

pub mod error;
#[cfg(any(test, feature = "test-util"))]
mod generate;
mod material;
mod policy;

#[cfg(any(test, feature = "test-util"))]
pub use generate::{encode_pem_bundle, generate_ca, generate_cert};
pub use material::{load_serving_cert, read_root_store, ServingCert};
pub use policy::{
    accepted_cipher_suites, policy_crypto_provider, server_config, PROTOCOL_VERSIONS,
};
