use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    RootCertStore,
};
use rustls_pemfile::Item;
use tracing::Level;

use crate::error::FromPemError;

/// Certificate chain and private key a listener presents to its clients.
#[derive(Debug)]
pub struct ServingCert {
    /// Leaf first, then the intermediates.
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// Loads the serving certificate from a PEM certificate file and a PEM key file.
///
/// Both may point to the same bundle. Other PEM items are skipped, the certificate file must hold
/// at least one certificate and the key file exactly one private key. Certificates are checked
/// only later, when building the [`rustls::ServerConfig`].
#[tracing::instrument(level = Level::DEBUG, err(level = Level::DEBUG))]
pub async fn load_serving_cert(
    cert_path: PathBuf,
    key_path: PathBuf,
) -> Result<ServingCert, FromPemError> {
    tokio::task::spawn_blocking(move || {
        Ok(ServingCert {
            cert_chain: certificates(&cert_path)?,
            key: private_key(&key_path)?,
        })
    })
    .await?
}

/// Builds a [`RootCertStore`] from the certificates in the given PEM file, e.g. the CAs allowed to
/// issue client certificates.
///
/// Unparsable certificates are skipped with a warning, at least one must be usable.
#[tracing::instrument(level = Level::DEBUG, err(level = Level::DEBUG))]
pub async fn read_root_store(path: PathBuf) -> Result<RootCertStore, FromPemError> {
    let certs = {
        let path = path.clone();
        tokio::task::spawn_blocking(move || certificates(&path)).await??
    };

    let mut root_store = RootCertStore::empty();
    let (added, ignored) = root_store.add_parsable_certificates(certs);

    if ignored > 0 {
        tracing::warn!(
            ?path,
            added,
            "Ignored {ignored} invalid certificate(s) when building a root cert store."
        );
    }

    if added == 0 {
        return Err(FromPemError::NoCertFound(path));
    }

    Ok(root_store)
}

fn open(path: &Path) -> Result<BufReader<File>, FromPemError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|error| FromPemError::OpenFileError {
            error,
            path: path.to_path_buf(),
        })
}

fn certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, FromPemError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|error| FromPemError::ParseFileError {
            error,
            path: path.to_path_buf(),
        })?;

    if certs.is_empty() {
        return Err(FromPemError::NoCertFound(path.to_path_buf()));
    }

    Ok(certs)
}

fn private_key(path: &Path) -> Result<PrivateKeyDer<'static>, FromPemError> {
    let mut reader = open(path)?;
    let mut keys = rustls_pemfile::read_all(&mut reader).filter_map(|item| match item {
        Ok(Item::Pkcs1Key(key)) => Some(Ok(PrivateKeyDer::from(key))),
        Ok(Item::Pkcs8Key(key)) => Some(Ok(PrivateKeyDer::from(key))),
        Ok(Item::Sec1Key(key)) => Some(Ok(PrivateKeyDer::from(key))),
        Ok(..) => None,
        Err(error) => Some(Err(error)),
    });

    let parse_error = |error| FromPemError::ParseFileError {
        error,
        path: path.to_path_buf(),
    };

    match keys.next().transpose().map_err(parse_error)? {
        None => Err(FromPemError::NoKeyFound(path.to_path_buf())),
        Some(key) => match keys.next() {
            None => Ok(key),
            Some(..) => Err(FromPemError::MultipleKeysFound(path.to_path_buf())),
        },
    }
}
