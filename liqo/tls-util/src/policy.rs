use std::sync::Arc;

use rustls::{
    crypto::{
        aws_lc_rs::{self, cipher_suite},
        CryptoProvider,
    },
    pki_types::{CertificateDer, PrivateKeyDer},
    server::WebPkiClientVerifier,
    version, RootCertStore, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion,
};

use crate::error::TlsPolicyError;

/// Protocol versions accepted by the node API server. TLS 1.2 is the floor.
pub static PROTOCOL_VERSIONS: &[&SupportedProtocolVersion] = &[&version::TLS13, &version::TLS12];

/// Cipher suites accepted by the node API server, in the order of server preference.
///
/// Known weak suites are elided. The TLS 1.2 CBC-SHA variants are not implemented by [`rustls`],
/// so they never show up here. This list should be a moving target.
pub fn accepted_cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        cipher_suite::TLS13_AES_256_GCM_SHA384,
        cipher_suite::TLS13_AES_128_GCM_SHA256,
        cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

/// The [`aws_lc_rs`] provider restricted to [`accepted_cipher_suites`].
pub fn policy_crypto_provider() -> CryptoProvider {
    CryptoProvider {
        cipher_suites: accepted_cipher_suites(),
        ..aws_lc_rs::default_provider()
    }
}

/// Builds a [`ServerConfig`] that follows the static hardening policy:
///
/// 1. only [`PROTOCOL_VERSIONS`] are negotiated;
/// 2. only [`accepted_cipher_suites`] are negotiated, and the server's preference wins;
/// 3. if `client_roots` are given, clients must present a certificate issued by one of them.
pub fn server_config(
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_roots: Option<RootCertStore>,
) -> Result<ServerConfig, TlsPolicyError> {
    let provider = Arc::new(policy_crypto_provider());

    let builder = ServerConfig::builder_with_provider(provider.clone())
        .with_protocol_versions(PROTOCOL_VERSIONS)
        .map_err(TlsPolicyError::ProtocolVersions)?;

    let builder = match client_roots {
        Some(roots) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider).build()?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(cert_chain, key)
        .map_err(TlsPolicyError::InvalidCertChain)?;
    config.ignore_client_order = true;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(config)
}

#[cfg(test)]
mod tests {
    use rcgen::CertifiedKey;
    use rstest::rstest;
    use rustls::{pki_types::ServerName, ClientConfig, ProtocolVersion};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };
    use tokio_rustls::{TlsAcceptor, TlsConnector};

    use super::*;
    use crate::{generate_ca, generate_cert};

    fn leaf_with_root() -> (CertifiedKey, CertifiedKey) {
        let root = generate_ca("root").unwrap();
        let leaf = generate_cert("virtual-node", Some(&root)).unwrap();
        (root, leaf)
    }

    fn acceptor(leaf: &CertifiedKey, client_roots: Option<RootCertStore>) -> TlsAcceptor {
        let config = server_config(
            vec![leaf.cert.der().clone()],
            leaf.key_pair.serialize_der().try_into().unwrap(),
            client_roots,
        )
        .unwrap();

        TlsAcceptor::from(Arc::new(config))
    }

    fn connector(
        root: &CertifiedKey,
        suites: Vec<SupportedCipherSuite>,
        versions: &[&'static SupportedProtocolVersion],
        client_cert: Option<&CertifiedKey>,
    ) -> TlsConnector {
        let mut roots = RootCertStore::empty();
        roots.add(root.cert.der().clone()).unwrap();

        let provider = CryptoProvider {
            cipher_suites: suites,
            ..aws_lc_rs::default_provider()
        };

        let builder = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(versions)
            .unwrap()
            .with_root_certificates(roots);

        let config = match client_cert {
            Some(cert) => builder
                .with_client_auth_cert(
                    vec![cert.cert.der().clone()],
                    cert.key_pair.serialize_der().try_into().unwrap(),
                )
                .unwrap(),
            None => builder.with_no_client_auth(),
        };

        TlsConnector::from(Arc::new(config))
    }

    /// Runs a single handshake and returns the negotiated protocol version on success.
    async fn handshake(acceptor: TlsAcceptor, connector: TlsConnector) -> Option<ProtocolVersion> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            let name = ServerName::try_from("virtual-node").unwrap();
            let mut stream = connector.connect(name, stream).await.ok()?;
            stream.write_all(b"ping").await.ok()?;
            stream.shutdown().await.ok()?;
            Some(())
        });

        let stream = listener.accept().await.unwrap().0;
        let result = match acceptor.accept(stream).await {
            Ok(mut stream) => {
                let version = stream.get_ref().1.protocol_version();
                let mut message = String::new();
                stream.read_to_string(&mut message).await.unwrap();
                assert_eq!(message, "ping");
                version
            }
            Err(..) => None,
        };

        let _ = client.await;
        result
    }

    #[test]
    fn weak_suites_are_not_accepted() {
        let accepted = accepted_cipher_suites();

        assert!(accepted
            .iter()
            .all(|suite| !format!("{:?}", suite.suite()).contains("CHACHA20")
                || suite.version().version == ProtocolVersion::TLSv1_3));
        assert!(accepted
            .iter()
            .all(|suite| !format!("{:?}", suite.suite()).contains("CBC")));
    }

    #[rstest]
    #[case::tls13(ProtocolVersion::TLSv1_3)]
    #[case::tls12(ProtocolVersion::TLSv1_2)]
    #[tokio::test]
    async fn allowed_suites_handshake(#[case] expected: ProtocolVersion) {
        let protocol: &'static SupportedProtocolVersion = match expected {
            ProtocolVersion::TLSv1_3 => &version::TLS13,
            _ => &version::TLS12,
        };

        let (root, leaf) = leaf_with_root();
        let connector = connector(&root, accepted_cipher_suites(), &[protocol], None);

        assert_eq!(
            handshake(acceptor(&leaf, None), connector).await,
            Some(expected)
        );
    }

    #[tokio::test]
    async fn suite_outside_allow_list_is_rejected() {
        let (root, leaf) = leaf_with_root();
        let connector = connector(
            &root,
            vec![cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256],
            &[&version::TLS12],
            None,
        );

        assert_eq!(handshake(acceptor(&leaf, None), connector).await, None);
    }

    #[rstest]
    #[case::trusted_client_cert(true, true)]
    #[case::no_client_cert(false, false)]
    #[tokio::test]
    async fn client_verification(#[case] present_cert: bool, #[case] expect_accepted: bool) {
        let (root, leaf) = leaf_with_root();
        let client = generate_cert("home-cluster", Some(&root)).unwrap();

        let mut client_roots = RootCertStore::empty();
        client_roots.add(root.cert.der().clone()).unwrap();

        let connector = connector(
            &root,
            accepted_cipher_suites(),
            PROTOCOL_VERSIONS,
            present_cert.then_some(&client),
        );

        let result = handshake(acceptor(&leaf, Some(client_roots)), connector).await;
        assert_eq!(result.is_some(), expect_accepted);
    }
}
