//! TLS material for the HTTPS interceptor.
//!
//! The game pins nothing; a locally generated self-signed certificate
//! whose subject-alt-names cover the intercept domains is enough once the
//! hosts file points them at the proxy. The key/cert pair is generated on
//! first start, written next to the config, and read once at startup.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

/// Domains the hosts file redirects to the proxy.
pub const INTERCEPT_DOMAINS: [&str; 4] = [
    "growtopia1.com",
    "www.growtopia1.com",
    "growtopia2.com",
    "www.growtopia2.com",
];

/// Loads the PEM pair, generating a fresh self-signed one when either
/// file is missing.
pub fn load_or_generate(cert_path: &Path, key_path: &Path) -> anyhow::Result<TlsAcceptor> {
    if !cert_path.exists() || !key_path.exists() {
        generate(cert_path, key_path)?;
    }

    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("tls server config")?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn generate(cert_path: &Path, key_path: &Path) -> anyhow::Result<()> {
    let names: Vec<String> = INTERCEPT_DOMAINS.iter().map(|d| d.to_string()).collect();
    let certified =
        rcgen::generate_simple_self_signed(names).context("generate self-signed certificate")?;

    for path in [cert_path, key_path] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
        }
    }
    fs::write(cert_path, certified.cert.pem())
        .with_context(|| format!("write {}", cert_path.display()))?;
    fs::write(key_path, certified.key_pair.serialize_pem())
        .with_context(|| format!("write {}", key_path.display()))?;

    info!(cert = %cert_path.display(), key = %key_path.display(), "generated tls certificate");
    Ok(())
}

fn load_certs(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .with_context(|| format!("parse certificates in {}", path.display()))?;
    anyhow::ensure!(!certs.is_empty(), "no certificates in {}", path.display());
    Ok(certs)
}

fn load_key(path: &Path) -> anyhow::Result<PrivateKeyDer<'static>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("parse key in {}", path.display()))?
        .with_context(|| format!("no private key in {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_pair() {
        let dir = std::env::temp_dir().join(format!("gtproxy-tls-{}", std::process::id()));
        let cert = dir.join("cert.pem");
        let key = dir.join("key.pem");
        let _ = fs::remove_dir_all(&dir);

        // First call generates, second reuses the files on disk.
        load_or_generate(&cert, &key).unwrap();
        let first = fs::read(&cert).unwrap();
        load_or_generate(&cert, &key).unwrap();
        assert_eq!(fs::read(&cert).unwrap(), first);

        let _ = fs::remove_dir_all(&dir);
    }
}
