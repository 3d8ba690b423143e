//! CA load-or-create and on-the-fly per-host leaf certificate issuance for
//! `httpsInterception` modes that require MITM. Grounded on the CA/leaf-signing shape of
//! a MITM proxy's certificate authority module (load-or-generate CA, sign per-host leaf
//! certs on demand), adapted from that example's rama/boring stack onto this workspace's
//! rustls/tokio-rustls/rcgen stack.

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Holds the CA keypair used to sign per-host leaf certificates. One instance is shared
/// across every MITM-terminated connection for the life of the process.
pub struct CertAuthority {
    ca_cert_pem: String,
    ca_key: KeyPair,
}

impl CertAuthority {
    /// Load a CA from `cert_path`/`key_path` if both exist, otherwise generate a fresh
    /// self-signed CA and persist it there.
    pub fn load_or_create(cert_path: &str, key_path: &str) -> Result<Self> {
        let cert_path = Path::new(cert_path);
        let key_path = Path::new(key_path);

        if cert_path.exists() && key_path.exists() {
            let ca_cert_pem = fs::read_to_string(cert_path)
                .with_context(|| format!("reading CA cert {}", cert_path.display()))?;
            let ca_key_pem = fs::read_to_string(key_path)
                .with_context(|| format!("reading CA key {}", key_path.display()))?;
            let ca_key = KeyPair::from_pem(&ca_key_pem).context("parsing CA private key")?;
            return Ok(Self { ca_cert_pem, ca_key });
        }

        let (ca_cert_pem, ca_key_pem, ca_key) = generate_ca()?;
        fs::write(cert_path, &ca_cert_pem)
            .with_context(|| format!("writing CA cert {}", cert_path.display()))?;
        write_private_key(key_path, &ca_key_pem)?;
        tracing::info!(cert = %cert_path.display(), key = %key_path.display(), "generated new MITM CA");
        Ok(Self { ca_cert_pem, ca_key })
    }

    /// Build a rustls `ServerConfig` presenting a leaf certificate for `host`, signed by
    /// this CA, good for a single TLS-terminated connection.
    pub fn server_config_for_host(&self, host: &str) -> Result<Arc<ServerConfig>> {
        let issuer = Issuer::from_ca_cert_pem(&self.ca_cert_pem, self.ca_key.clone())
            .context("rebuilding CA issuer from stored PEM")?;

        let mut params = CertificateParams::new(vec![host.to_string()])
            .context("building leaf certificate params")?;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];

        let leaf_key = KeyPair::generate().context("generating leaf key pair")?;
        let leaf_cert = params
            .signed_by(&leaf_key, &issuer)
            .context("signing leaf certificate")?;

        let cert_der = CertificateDer::from(leaf_cert.der().to_vec());
        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(leaf_key.serialize_der()));

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der)
            .context("building per-host rustls ServerConfig")?;
        Ok(Arc::new(config))
    }
}

fn generate_ca() -> Result<(String, String, KeyPair)> {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, "Archivo Ontology Time Machine CA");
    params.distinguished_name = dn;

    let ca_key = KeyPair::generate().context("generating CA key pair")?;
    let ca_cert = params.self_signed(&ca_key).context("self-signing CA certificate")?;
    let ca_key_pem = ca_key.serialize_pem();
    Ok((ca_cert.pem(), ca_key_pem, ca_key))
}

/// Write the CA private key with owner-only permissions.
#[cfg(unix)]
fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::write(path, pem).with_context(|| format!("writing CA key {}", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("restricting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, pem: &str) -> Result<()> {
    fs::write(path, pem).with_context(|| format!("writing CA key {}", path.display()))
}
