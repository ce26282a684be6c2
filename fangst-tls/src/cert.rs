//! CA lifecycle and per-host leaf issuance.
//!
//! `validate_or_generate` is idempotent: a valid on-disk CA certificate
//! whose private key is retrievable from the secret store is reused
//! byte-for-byte; anything missing or invalid triggers regeneration of the
//! pair. The secret store is probed before any key material is touched so
//! an unusable backend aborts startup instead of surfacing mid-capture.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use tracing::{info, warn};
use webpki_roots::TLS_SERVER_ROOTS;
use x509_parser::prelude::{FromDer, X509Certificate};

use fangst_core::secrets::SecretStore;

use crate::error::TlsError;

pub const CA_COMMON_NAME: &str = "Fangst Root CA";
pub const CA_VALIDITY_DAYS: i64 = 365;
pub const LEAF_VALIDITY_DAYS: i64 = 7;

/// Days of remaining CA validity below which a warning is logged.
const CA_EXPIRY_WARNING_DAYS: i64 = 30;

const CA_CERT_FILE: &str = "ca.crt";
const CA_KEY_ID: &str = "fangst-ca-key";

/// Issued leaf material for one intercepted host.
pub struct LeafCert {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

struct IssuerState {
    issuer: Issuer<'static, KeyPair>,
    ca_der: Vec<u8>,
    not_before: NaiveDate,
    not_after: NaiveDate,
}

/// Owns the CA and hands out rustls configs for intercepted hosts.
pub struct CertificateManager {
    cert_dir: PathBuf,
    secrets: Arc<dyn SecretStore>,
    state: Mutex<Option<Arc<IssuerState>>>,
    config_cache: Mutex<HashMap<String, Arc<ServerConfig>>>,
}

impl CertificateManager {
    pub fn new(cert_dir: impl Into<PathBuf>, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            cert_dir: cert_dir.into(),
            secrets,
            state: Mutex::new(None),
            config_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_ca_cert_path(&self) -> Result<PathBuf, TlsError> {
        if self.state.lock().is_none() {
            return Err(TlsError::NotInitialized);
        }
        Ok(self.cert_dir.join(CA_CERT_FILE))
    }

    /// Loads the existing CA or generates a fresh one. Must succeed before
    /// the proxy starts; every error here aborts startup.
    pub fn validate_or_generate(&self) -> Result<(), TlsError> {
        self.secrets.probe()?;

        fs::create_dir_all(&self.cert_dir).map_err(|source| TlsError::Io {
            path: self.cert_dir.clone(),
            source,
        })?;

        let cert_path = self.cert_dir.join(CA_CERT_FILE);
        match self.try_load_existing(&cert_path) {
            Ok(Some(state)) => {
                info!(path = %cert_path.display(), "Existing CA certificate validated");
                *self.state.lock() = Some(Arc::new(state));
                return Ok(());
            }
            Ok(None) => {}
            // Expired, malformed or otherwise unusable pairs are replaced;
            // only an unusable secret store (probed above) is fatal.
            Err(err) => {
                warn!(error = %err, "Stored CA unusable, regenerating");
            }
        }

        let state = self.generate_ca(&cert_path)?;
        info!(path = %cert_path.display(), "Generated new CA certificate");
        *self.state.lock() = Some(Arc::new(state));
        Ok(())
    }

    /// Returns `Ok(None)` when no CA certificate exists yet.
    fn try_load_existing(&self, cert_path: &Path) -> Result<Option<IssuerState>, TlsError> {
        if !cert_path.exists() {
            return Ok(None);
        }
        ensure_not_symlink(cert_path)?;
        let ca_pem = fs::read_to_string(cert_path).map_err(|source| TlsError::Io {
            path: cert_path.to_path_buf(),
            source,
        })?;
        let ca_der = pem_to_der(&ca_pem, cert_path)?;
        let (not_before, not_after) = validate_ca_der(&ca_der, cert_path)?;

        let key_pem_bytes = self.secrets.get(CA_KEY_ID)?;
        let key_pem = String::from_utf8(key_pem_bytes).map_err(|_| TlsError::InvalidCaCert {
            path: cert_path.to_path_buf(),
            reason: "stored CA key is not valid PEM text".into(),
        })?;
        let key_pair = KeyPair::from_pem(&key_pem)?;
        let issuer = Issuer::from_ca_cert_pem(&ca_pem, key_pair)?;

        Ok(Some(IssuerState {
            issuer,
            ca_der,
            not_before,
            not_after,
        }))
    }

    fn generate_ca(&self, cert_path: &Path) -> Result<IssuerState, TlsError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

        let not_before = Utc::now().date_naive();
        let not_after = not_before + Duration::days(CA_VALIDITY_DAYS);
        params.not_before =
            rcgen::date_time_ymd(not_before.year(), not_before.month() as u8, not_before.day() as u8);
        params.not_after =
            rcgen::date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);

        let key_pair = KeyPair::generate()?;
        let ca_cert = params.self_signed(&key_pair)?;
        let ca_pem = ca_cert.pem();
        let ca_der = ca_cert.der().to_vec();

        // Key first: if the store rejects it, no orphan certificate is
        // left on disk.
        self.secrets.put(CA_KEY_ID, key_pair.serialize_pem().as_bytes())?;
        write_cert_file(cert_path, &ca_pem)?;

        let issuer = Issuer::new(params, key_pair);
        Ok(IssuerState {
            issuer,
            ca_der,
            not_before,
            not_after,
        })
    }

    /// Issues a short-lived leaf for `host`, clamped inside the CA window.
    pub fn issue_leaf_cert(&self, host: &str) -> Result<LeafCert, TlsError> {
        let state = self
            .state
            .lock()
            .clone()
            .ok_or(TlsError::NotInitialized)?;

        let mut params = CertificateParams::new(vec![host.to_string()])?;
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, host.to_string());

        let today = Utc::now().date_naive();
        let not_before = today.max(state.not_before);
        let not_after = (today + Duration::days(LEAF_VALIDITY_DAYS)).min(state.not_after);
        params.not_before =
            rcgen::date_time_ymd(not_before.year(), not_before.month() as u8, not_before.day() as u8);
        params.not_after =
            rcgen::date_time_ymd(not_after.year(), not_after.month() as u8, not_after.day() as u8);

        let key_pair = KeyPair::generate()?;
        let leaf = params.signed_by(&key_pair, &state.issuer)?;
        let chain = vec![
            leaf.der().clone(),
            CertificateDer::from(state.ca_der.clone()),
        ];
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok(LeafCert { chain, key })
    }

    /// Server config presented to intercepted clients, cached per host.
    pub fn server_config_for(&self, host: &str) -> Result<Arc<ServerConfig>, TlsError> {
        if let Some(config) = self.config_cache.lock().get(host) {
            return Ok(Arc::clone(config));
        }
        let leaf = self.issue_leaf_cert(host)?;
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(leaf.chain, leaf.key)?;
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let config = Arc::new(config);
        self.config_cache
            .lock()
            .insert(host.to_string(), Arc::clone(&config));
        Ok(config)
    }

    /// Client config for the re-originated upstream connection, verifying
    /// against the webpki root set.
    pub fn upstream_client_config(&self) -> Arc<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(TLS_SERVER_ROOTS.iter().cloned());
        let mut config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        Arc::new(config)
    }
}

fn pem_to_der(pem: &str, path: &Path) -> Result<Vec<u8>, TlsError> {
    let mut reader = std::io::BufReader::new(pem.as_bytes());
    let mut certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|_| TlsError::InvalidCaCert {
            path: path.to_path_buf(),
            reason: "not a PEM certificate".into(),
        })?;
    certs
        .pop()
        .map(|c| c.to_vec())
        .ok_or_else(|| TlsError::InvalidCaCert {
            path: path.to_path_buf(),
            reason: "no certificate block found".into(),
        })
}

/// Checks the validity window and CA basic constraint, returning the
/// window at day precision for leaf clamping.
fn validate_ca_der(der: &[u8], path: &Path) -> Result<(NaiveDate, NaiveDate), TlsError> {
    let (_, cert) = X509Certificate::from_der(der).map_err(|e| TlsError::InvalidCaCert {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !cert.is_ca() {
        return Err(TlsError::NotACa {
            path: path.to_path_buf(),
        });
    }

    let validity = cert.validity();
    let not_before = timestamp_to_date(validity.not_before.timestamp(), path)?;
    let not_after = timestamp_to_date(validity.not_after.timestamp(), path)?;
    let now = Utc::now();

    if now.timestamp() > validity.not_after.timestamp() {
        return Err(TlsError::CaExpired {
            path: path.to_path_buf(),
            not_after: not_after.to_string(),
        });
    }
    if now.timestamp() < validity.not_before.timestamp() {
        return Err(TlsError::CaNotYetValid {
            path: path.to_path_buf(),
            not_before: not_before.to_string(),
        });
    }

    let remaining_days = (validity.not_after.timestamp() - now.timestamp()) / 86_400;
    if remaining_days < CA_EXPIRY_WARNING_DAYS {
        warn!(
            path = %path.display(),
            remaining_days,
            "CA certificate expires soon"
        );
    }

    Ok((not_before, not_after))
}

fn timestamp_to_date(ts: i64, path: &Path) -> Result<NaiveDate, TlsError> {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| TlsError::InvalidCaCert {
            path: path.to_path_buf(),
            reason: "certificate validity out of representable range".into(),
        })
}

fn ensure_not_symlink(path: &Path) -> Result<(), TlsError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            Err(TlsError::SymlinkRefused(path.to_path_buf()))
        }
        _ => Ok(()),
    }
}

#[cfg(unix)]
fn write_cert_file(path: &Path, contents: &str) -> Result<(), TlsError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    ensure_not_symlink(path)?;
    let io = |source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .mode(0o644)
        .open(path)
        .map_err(io)?;
    file.write_all(contents.as_bytes()).map_err(io)?;
    file.sync_all().map_err(io)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_cert_file(path: &Path, contents: &str) -> Result<(), TlsError> {
    ensure_not_symlink(path)?;
    fs::write(path, contents).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fangst_core::secrets::MemorySecretStore;

    fn manager(dir: &Path) -> CertificateManager {
        CertificateManager::new(dir, Arc::new(MemorySecretStore::new()))
    }

    #[test]
    fn generates_ca_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.validate_or_generate().unwrap();
        let ca_path = mgr.get_ca_cert_path().unwrap();
        let pem = fs::read_to_string(&ca_path).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn reuses_valid_ca_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(MemorySecretStore::new());
        let mgr = CertificateManager::new(dir.path(), Arc::clone(&secrets) as Arc<dyn SecretStore>);
        mgr.validate_or_generate().unwrap();
        let first = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();

        let again =
            CertificateManager::new(dir.path(), Arc::clone(&secrets) as Arc<dyn SecretStore>);
        again.validate_or_generate().unwrap();
        let second = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn regenerates_when_key_missing_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.validate_or_generate().unwrap();
        let first = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();

        // Fresh store without the key: cert on disk alone is not enough.
        let again = manager(dir.path());
        again.validate_or_generate().unwrap();
        let second = fs::read(dir.path().join(CA_CERT_FILE)).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn regenerates_when_cert_garbled() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        fs::write(dir.path().join(CA_CERT_FILE), "not a cert").unwrap();
        mgr.validate_or_generate().unwrap();
        let pem = fs::read_to_string(dir.path().join(CA_CERT_FILE)).unwrap();
        assert!(pem.contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn regenerates_expired_ca() {
        let dir = tempfile::tempdir().unwrap();
        let secrets = Arc::new(MemorySecretStore::new());

        // A CA whose window closed years ago, cert on disk and key in
        // the store, exactly as a stale install would leave them.
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, CA_COMMON_NAME);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2021, 1, 1);
        let key_pair = KeyPair::generate().unwrap();
        let stale = params.self_signed(&key_pair).unwrap();
        fs::write(dir.path().join(CA_CERT_FILE), stale.pem()).unwrap();
        secrets
            .put(CA_KEY_ID, key_pair.serialize_pem().as_bytes())
            .unwrap();

        let mgr = CertificateManager::new(dir.path(), Arc::clone(&secrets) as Arc<dyn SecretStore>);
        mgr.validate_or_generate().unwrap();

        let pem = fs::read_to_string(dir.path().join(CA_CERT_FILE)).unwrap();
        assert_ne!(pem, stale.pem());
        let leaf = mgr.issue_leaf_cert("example.com").unwrap();
        let (_, parsed) = X509Certificate::from_der(leaf.chain[0].as_ref()).unwrap();
        assert!(parsed.validity().is_valid());
    }

    #[test]
    fn leaf_issuance_requires_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(matches!(
            mgr.issue_leaf_cert("example.com"),
            Err(TlsError::NotInitialized)
        ));
    }

    #[test]
    fn issues_leaf_with_ca_in_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.validate_or_generate().unwrap();
        let leaf = mgr.issue_leaf_cert("example.com").unwrap();
        assert_eq!(leaf.chain.len(), 2);

        let (_, parsed) = X509Certificate::from_der(leaf.chain[0].as_ref()).unwrap();
        assert!(!parsed.is_ca());
        assert!(parsed.validity().is_valid());
    }

    #[test]
    fn server_configs_are_cached_per_host() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.validate_or_generate().unwrap();
        let a = mgr.server_config_for("example.com").unwrap();
        let b = mgr.server_config_for("example.com").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = mgr.server_config_for("other.test").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
