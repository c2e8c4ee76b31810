use std::fs;

use p12_keystore::{KeyStore as Pkcs12Store, KeyStoreEntry};
use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use strand_transport::TransportError;
use tracing::debug;

use crate::{
    error::{material_error, material_error_from},
    material::{KeyEntry, KeyStore, KeyStoreOptions, TrustStore},
};

const SUPPORTED_TYPES: [&str; 2] = ["PKCS12", "P12"];

/// 从 PKCS#12 密钥库读取全部私钥条目。
pub(crate) fn load_key_store(
    options: &KeyStoreOptions,
    provider: &CryptoProvider,
) -> Result<KeyStore, TransportError> {
    let archive = open(options)?;
    let mut store = KeyStore::default();
    for (alias, entry) in archive.entries() {
        let KeyStoreEntry::PrivateKeyChain(chain) = entry else {
            continue;
        };
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(chain.key().to_vec()));
        provider
            .key_provider
            .load_private_key(key.clone_key())
            .map_err(|err| {
                material_error_from(format!("unsupported private key `{alias}`"), err)
            })?;
        let certificates = chain
            .chain()
            .iter()
            .map(|certificate| CertificateDer::from(certificate.as_der().to_vec()))
            .collect::<Vec<_>>();
        if certificates.is_empty() {
            return Err(material_error(format!(
                "private key `{alias}` has no certificate chain"
            )));
        }
        store.insert(alias.to_string(), KeyEntry::new(key, certificates));
    }
    debug!(path = %options.path.display(), entries = store.len(), "pkcs12 key store opened");
    Ok(store)
}

/// 从 PKCS#12 密钥库读取全部受信任证书条目。
pub(crate) fn load_trust_store(options: &KeyStoreOptions) -> Result<TrustStore, TransportError> {
    let archive = open(options)?;
    let mut store = TrustStore::default();
    for (alias, entry) in archive.entries() {
        if let KeyStoreEntry::Certificate(certificate) = entry {
            store.insert(
                alias.to_string(),
                CertificateDer::from(certificate.as_der().to_vec()),
            );
        }
    }
    debug!(path = %options.path.display(), entries = store.len(), "pkcs12 trust store opened");
    Ok(store)
}

fn open(options: &KeyStoreOptions) -> Result<Pkcs12Store, TransportError> {
    if !SUPPORTED_TYPES
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(&options.store_type))
    {
        return Err(material_error(format!(
            "unsupported key store type `{}`",
            options.store_type
        )));
    }
    let data = fs::read(&options.path).map_err(|err| {
        material_error_from(format!("cannot read {}", options.path.display()), err)
    })?;
    Pkcs12Store::from_pkcs12(&data, &options.passphrase).map_err(|err| {
        material_error(format!(
            "cannot open key store {}: {err:?}",
            options.path.display()
        ))
    })
}
