//! 测试夹具：即时生成自签名身份，并把 PEM / PKCS#12 材料写入临时目录。
//!
//! 仅在启用 `test-util` 特性时编译，供本 workspace 的集成测试复用。

use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use p12_keystore::{Certificate, KeyStore, KeyStoreEntry, PrivateKeyChain};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls_pki_types::CertificateDer;
use tempfile::TempDir;

use crate::material::{KeyStoreOptions, MaterialSource, PemFiles, TrustMaterial};

fn other(error: impl fmt::Debug) -> io::Error {
    io::Error::other(format!("{error:?}"))
}

/// 一个自签名身份：证书对 `localhost` 与 `127.0.0.1` 有效。
#[derive(Clone, Debug)]
pub struct Identity {
    pub common_name: String,
    pub cert_pem: String,
    pub key_pem: String,
    pub cert_der: CertificateDer<'static>,
    pub key_pkcs8: Vec<u8>,
}

/// 2048 位 RSA 私钥（PKCS#8 PEM）。
const RSA_PKCS8_PEM: &str = include_str!("../fixtures/rsa-2048-pkcs8.pem");

impl Identity {
    /// 生成 ECDSA P-256 身份。
    pub fn generate(common_name: &str) -> io::Result<Self> {
        Self::issue(common_name, KeyPair::generate().map_err(other)?)
    }

    /// 以固定的 RSA PKCS#8 私钥签发身份。
    pub fn generate_rsa(common_name: &str) -> io::Result<Self> {
        Self::issue(common_name, KeyPair::from_pem(RSA_PKCS8_PEM).map_err(other)?)
    }

    fn issue(common_name: &str, key_pair: KeyPair) -> io::Result<Self> {
        let mut params =
            CertificateParams::new(vec!["localhost".to_owned(), "127.0.0.1".to_owned()])
                .map_err(other)?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, common_name);
        let cert = params.self_signed(&key_pair).map_err(other)?;
        Ok(Self {
            common_name: common_name.to_owned(),
            cert_pem: cert.pem(),
            key_pem: key_pair.serialize_pem(),
            cert_der: cert.der().clone(),
            key_pkcs8: key_pair.serialize_der(),
        })
    }
}

/// 存放材料文件的临时目录，随夹具一起删除。
#[derive(Debug)]
pub struct MaterialDir {
    dir: TempDir,
}

impl MaterialDir {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> io::Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// 写出 `own` 的私钥与证书，以及 `trusted` 的证书集合。
    pub fn pem_files(
        &self,
        label: &str,
        own: &Identity,
        trusted: &[&Identity],
    ) -> io::Result<PemFiles> {
        let key = self.write(&format!("{label}-key.pem"), &own.key_pem)?;
        let chain = self.write(&format!("{label}-chain.pem"), &own.cert_pem)?;
        let bundle: String = trusted
            .iter()
            .map(|identity| identity.cert_pem.as_str())
            .collect();
        let trusted = self.write(&format!("{label}-trusted.pem"), bundle)?;
        Ok(PemFiles::new(key, chain, trusted))
    }

    /// 同 [`MaterialDir::pem_files`]，直接返回 PEM 策略的材料提供者。
    pub fn pem_material(
        &self,
        label: &str,
        own: &Identity,
        trusted: &[&Identity],
        require_peer_auth: bool,
    ) -> io::Result<TrustMaterial> {
        let files = self.pem_files(label, own, trusted)?;
        Ok(TrustMaterial::new(MaterialSource::Pem(files), require_peer_auth))
    }

    /// 写出一个 PKCS#12 文件：可选的身份条目加若干受信任证书条目。
    pub fn pkcs12(
        &self,
        name: &str,
        own: Option<&Identity>,
        trusted: &[&Identity],
        passphrase: &str,
    ) -> io::Result<KeyStoreOptions> {
        let mut store = KeyStore::new();
        if let Some(identity) = own {
            let certificate = Certificate::from_der(identity.cert_der.as_ref()).map_err(other)?;
            let chain =
                PrivateKeyChain::new(identity.key_pkcs8.clone(), [0x01u8; 20], vec![certificate]);
            store.add_entry(
                &identity.common_name,
                KeyStoreEntry::PrivateKeyChain(chain),
            );
        }
        for identity in trusted {
            let certificate = Certificate::from_der(identity.cert_der.as_ref()).map_err(other)?;
            store.add_entry(&identity.common_name, KeyStoreEntry::Certificate(certificate));
        }
        let bytes = store.writer(passphrase).write().map_err(other)?;
        let path = self.write(name, bytes)?;
        Ok(KeyStoreOptions::new(path, passphrase))
    }
}
