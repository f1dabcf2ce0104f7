//! Mutual TLS material: CA pool plus server/client config builders
//! (`spec.md` §4.7).
//!
//! Grounded in `network/ca_pool.go` and `tls_server.go`'s `Listen`. The
//! original loads a single PEM file into an `x509.CertPool` and uses it both
//! as the server's `ClientCAs` and, implicitly, as every dialled peer's
//! trust root (peers exchange the same CA file out of band). Here the same
//! `RootCertStore` backs both a [`rustls::ServerConfig`] (mandatory client
//! auth) and a [`rustls::ClientConfig`] (server verification against the
//! same store), so there is exactly one trust root for the whole mesh.

use crate::error::{Error, Result};
use rustls::crypto::ring::cipher_suite::{
    TLS13_AES_128_GCM_SHA256, TLS13_AES_256_GCM_SHA384, TLS13_CHACHA20_POLY1305_SHA256,
};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::path::Path;
use std::sync::Arc;

/// The three AEAD suites the original restricts itself to
/// (`0x0035, 0xc030, 0xc02c` in the Go TLS 1.2 IDs), ported to their closest
/// TLS 1.3 equivalents — recorded as an Open Question resolution in
/// `DESIGN.md`.
fn allowed_provider() -> CryptoProvider {
    let mut provider = rustls::crypto::ring::default_provider();
    provider.cipher_suites = vec![
        TLS13_AES_128_GCM_SHA256,
        TLS13_AES_256_GCM_SHA384,
        TLS13_CHACHA20_POLY1305_SHA256,
    ];
    provider
}

/// Loads every certificate found in the PEM file at `path` into a trust
/// store, matching `CAPool.LoadPEM`.
pub fn load_ca_pool(path: impl AsRef<Path>) -> Result<RootCertStore> {
    let path = path.as_ref();
    let file = std::fs::File::open(path).map_err(Error::Io)?;
    let mut reader = std::io::BufReader::new(file);
    let mut store = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(Error::Io)?;
        store
            .add(cert)
            .map_err(|e| Error::Config(format!("invalid CA certificate in {}: {e}", path.display())))?;
    }
    if store.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in CA file {}",
            path.display()
        )));
    }
    Ok(store)
}

/// Loads a certificate chain + private key pair from PEM files
/// (`spec.md` §4.7, `--cert` flag).
pub fn load_cert_chain(
    cert_path: impl AsRef<Path>,
    key_path: impl AsRef<Path>,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_path = cert_path.as_ref();
    let key_path = key_path.as_ref();

    let cert_file = std::fs::File::open(cert_path).map_err(Error::Io)?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<std::result::Result<_, _>>()
        .map_err(Error::Io)?;
    if chain.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path).map_err(Error::Io)?;
    let mut key_reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(Error::Io)?
        .ok_or_else(|| Error::Config(format!("no private key found in {}", key_path.display())))?;

    Ok((chain, key))
}

/// Builds the listening side's TLS config: mandatory client certificate
/// verification against `ca_pool` (matches `ClientAuth:
/// tls.RequireAndVerifyClientCert`).
pub fn server_config(
    ca_pool: RootCertStore,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(allowed_provider());
    let verifier = rustls::server::WebPkiClientVerifier::builder_with_provider(
        Arc::new(ca_pool),
        provider.clone(),
    )
    .build()
    .map_err(|e| Error::Config(e.to_string()))?;

    let config = ServerConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(Error::Tls)?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(Error::Tls)?;

    Ok(Arc::new(config))
}

/// Builds the dialling side's TLS config: verifies the remote peer's
/// certificate against `ca_pool` and presents `chain`/`key` as its own
/// client certificate, since every peer connection is mutually
/// authenticated (`spec.md` §4.7 — there is no anonymous peer role).
pub fn client_config(
    ca_pool: RootCertStore,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(allowed_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(Error::Tls)?
        .with_root_certificates(ca_pool)
        .with_client_auth_cert(chain, key)
        .map_err(Error::Tls)?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (tempfile_cert::TempCert,) {
        (tempfile_cert::TempCert::generate(),)
    }

    /// Minimal in-module helper for generating throwaway self-signed certs
    /// for these tests without depending on the crate's shared test fixture
    /// module, since `tls.rs`'s tests only need a CA file's shape, not a
    /// full mesh.
    mod tempfile_cert {
        use rcgen::generate_simple_self_signed;
        use std::io::Write;

        pub struct TempCert {
            pub cert_path: std::path::PathBuf,
            pub key_path: std::path::PathBuf,
            _dir: tempfile::TempDir,
        }

        impl TempCert {
            pub fn generate() -> Self {
                let cert = generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
                let dir = tempfile::tempdir().unwrap();
                let cert_path = dir.path().join("cert.pem");
                let key_path = dir.path().join("key.pem");
                std::fs::File::create(&cert_path)
                    .unwrap()
                    .write_all(cert.cert.pem().as_bytes())
                    .unwrap();
                std::fs::File::create(&key_path)
                    .unwrap()
                    .write_all(cert.key_pair.serialize_pem().as_bytes())
                    .unwrap();
                Self {
                    cert_path,
                    key_path,
                    _dir: dir,
                }
            }
        }
    }

    #[test]
    fn loads_ca_pool_from_generated_cert() {
        let (tc,) = self_signed();
        let pool = load_ca_pool(&tc.cert_path).unwrap();
        assert!(!pool.is_empty());
    }

    #[test]
    fn loads_cert_chain_and_key() {
        let (tc,) = self_signed();
        let (chain, _key) = load_cert_chain(&tc.cert_path, &tc.key_path).unwrap();
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        assert!(load_ca_pool("/nonexistent/ca.pem").is_err());
    }

    #[test]
    fn server_and_client_configs_build_with_same_pool() {
        let (tc,) = self_signed();
        let (chain, key) = load_cert_chain(&tc.cert_path, &tc.key_path).unwrap();
        let ca_for_server = load_ca_pool(&tc.cert_path).unwrap();
        let ca_for_client = load_ca_pool(&tc.cert_path).unwrap();

        server_config(ca_for_server, chain.clone(), key.clone()).unwrap();
        client_config(ca_for_client, chain, key).unwrap();
    }
}
