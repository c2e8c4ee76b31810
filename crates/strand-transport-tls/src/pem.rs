use std::{fs, path::Path};

use rustls::crypto::CryptoProvider;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, pem::PemObject};
use strand_transport::TransportError;

use crate::{
    error::{material_error, material_error_from},
    material::{KeyEntry, KeyStore, TrustStore, random_alias},
};

/// 从 PEM 私钥与证书链构建只含一个条目的身份材料库。
///
/// 私钥需能被加密提供者加载（RSA/ECDSA/Ed25519），否则视为不受支持的算法。
pub(crate) fn load_key_store(
    key_path: &Path,
    chain_path: &Path,
    provider: &CryptoProvider,
) -> Result<KeyStore, TransportError> {
    let key_pem = read(key_path)?;
    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(|err| {
        material_error(format!(
            "no usable private key in {}: {err:?}",
            key_path.display()
        ))
    })?;
    provider
        .key_provider
        .load_private_key(key.clone_key())
        .map_err(|err| {
            material_error_from(
                format!("unsupported private key in {}", key_path.display()),
                err,
            )
        })?;

    let chain = read_certificates(chain_path)?;
    let mut store = KeyStore::default();
    store.insert(random_alias(provider)?, KeyEntry::new(key, chain));
    Ok(store)
}

/// 把 PEM 文件中的每一张证书导入为一个独立的信任条目。
pub(crate) fn load_trust_store(
    path: &Path,
    provider: &CryptoProvider,
) -> Result<TrustStore, TransportError> {
    let mut store = TrustStore::default();
    for certificate in read_certificates(path)? {
        store.insert(random_alias(provider)?, certificate);
    }
    Ok(store)
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let pem = read(path)?;
    let certificates = CertificateDer::pem_slice_iter(&pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| {
            material_error(format!("malformed certificate in {}: {err:?}", path.display()))
        })?;
    if certificates.is_empty() {
        return Err(material_error(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certificates)
}

fn read(path: &Path) -> Result<Vec<u8>, TransportError> {
    fs::read(path)
        .map_err(|err| material_error_from(format!("cannot read {}", path.display()), err))
}
