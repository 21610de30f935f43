//! Throwaway certificates for tests, enabled with the `test-util` feature.

use pem::{EncodeConfig, LineEnding, Pem};
use rcgen::{
    BasicConstraints, CertificateParams, CertifiedKey, DnType, Error, IsCa, KeyPair,
    KeyUsagePurpose,
};

fn params(name: &str) -> Result<CertificateParams, Error> {
    let mut params = CertificateParams::new([name.to_owned()])?;
    params.distinguished_name.push(DnType::CommonName, name);
    Ok(params)
}

/// Self-signed CA with a fresh key, can issue certificates with [`generate_cert`].
pub fn generate_ca(name: &str) -> Result<CertifiedKey, Error> {
    let key_pair = KeyPair::generate()?;

    let mut params = params(name)?;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];

    let cert = params.self_signed(&key_pair)?;
    Ok(CertifiedKey { cert, key_pair })
}

/// End-entity certificate with a fresh key, for `name` (a DNS name or an IP address).
///
/// Signed by `ca`, or self-signed without one.
pub fn generate_cert(name: &str, ca: Option<&CertifiedKey>) -> Result<CertifiedKey, Error> {
    let key_pair = KeyPair::generate()?;
    let params = params(name)?;

    let cert = match ca {
        Some(ca) => params.signed_by(&key_pair, &ca.cert, &ca.key_pair)?,
        None => params.self_signed(&key_pair)?,
    };

    Ok(CertifiedKey { cert, key_pair })
}

/// PEM document with the certificate of `leaf`, the certificates in `chain`, and the PKCS#8 key
/// of `leaf` if `with_key` is set.
///
/// Readable by [`load_serving_cert`](crate::load_serving_cert).
pub fn encode_pem_bundle(leaf: &CertifiedKey, chain: &[&CertifiedKey], with_key: bool) -> String {
    let certs = std::iter::once(leaf)
        .chain(chain.iter().copied())
        .map(|cert| Pem::new("CERTIFICATE", cert.cert.der().to_vec()));
    let key = with_key.then(|| Pem::new("PRIVATE KEY", leaf.key_pair.serialize_der()));

    let pems = certs.chain(key).collect::<Vec<_>>();
    pem::encode_many_config(&pems, EncodeConfig::new().set_line_ending(LineEnding::LF))
}
