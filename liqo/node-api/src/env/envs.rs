//! Definitions of environment variables used to configure the virtual kubelet node API.
//!
//! If you want to add some more, please do it here.

use std::path::PathBuf;

use crate::env::checked_env::{CheckedEnv, StringRepr};

/// Path to the PEM certificate chain of the secured pod listener.
pub const CERT_LOCATION: CheckedEnv<StringRepr<PathBuf>> =
    CheckedEnv::new("APISERVER_CERT_LOCATION");

/// Path to the PEM private key of the secured pod listener.
pub const KEY_LOCATION: CheckedEnv<StringRepr<PathBuf>> = CheckedEnv::new("APISERVER_KEY_LOCATION");

/// Path to a PEM bundle of CAs. When set, the secured pod listener requires client certificates
/// issued by one of them.
pub const CLIENT_CA_LOCATION: CheckedEnv<StringRepr<PathBuf>> =
    CheckedEnv::new("APISERVER_CLIENT_CA_LOCATION");

/// Instructs the virtual kubelet to produce logs in JSON format.
pub const JSON_LOG: CheckedEnv<StringRepr<bool>> = CheckedEnv::new("LIQO_JSON_LOG");

