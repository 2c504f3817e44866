/*
 * tls.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Corriere, an embedded HTTP engine.
 *
 * Corriere is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Corriere is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Corriere.  If not, see <http://www.gnu.org/licenses/>.
 */

//! TLS transports for client and server connections.
//!
//! Client connections verify the peer chain against a caller-supplied CA
//! file, the platform trust store, or the bundled webpki roots, in that
//! order of preference. Hostname verification extends the standard rules
//! with prefix wildcards (`f*.example.com`) and falls back to the subject
//! common name when the certificate carries no usable SAN entry. The
//! verification outcome is reported out-of-band so callers can inspect it
//! after a handshake.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore,
    ServerConfig, ServerConnection, SignatureScheme, StreamOwned,
};
use tracing::warn;
use x509_parser::prelude::*;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Install the process-wide crypto provider. Idempotent.
pub fn init() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Counterpart to [`init`]. Nothing needs releasing currently.
pub fn shutdown() {}

/// Outcome of peer verification for a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyResult {
    /// Verification has not run: no TLS exchange yet, or it was switched off.
    #[default]
    NotVerified,
    /// Certificate chain and hostname both checked out.
    Ok,
    /// The certificate chain failed validation.
    ChainInvalid,
    /// The chain was valid but no certificate name matched the host.
    HostnameMismatch,
}

fn set_report(report: &Arc<Mutex<VerifyResult>>, result: VerifyResult) {
    *report.lock().unwrap_or_else(PoisonError::into_inner) = result;
}

/// Trust anchors: the CA file when given, else the platform store, else the
/// bundled webpki roots.
fn build_root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let data = std::fs::read(path)?;
            for cert in rustls_pemfile::certs(&mut &data[..]) {
                let cert = cert.map_err(|e| Error::Tls(format!("bad CA certificate: {}", e)))?;
                roots
                    .add(cert)
                    .map_err(|e| Error::Tls(format!("bad CA certificate: {}", e)))?;
            }
            if roots.is_empty() {
                return Err(Error::Tls(format!(
                    "no CA certificates in {}",
                    path.display()
                )));
            }
        }
        None => {
            match rustls_native_certs::load_native_certs() {
                Ok(certs) => {
                    for cert in certs {
                        // Platform stores carry the occasional stale anchor.
                        let _ = roots.add(cert);
                    }
                }
                Err(e) => warn!("failed to load platform trust store: {}", e),
            }
            if roots.is_empty() {
                roots.roots = webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
            }
        }
    }
    Ok(roots)
}

pub(crate) struct TlsClientStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
}

pub(crate) struct TlsServerStream {
    inner: StreamOwned<ServerConnection, TcpStream>,
}

impl Read for TlsClientStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            // A peer closing without close_notify reads like truncation to
            // rustls; the engine treats it as end of stream.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            other => other,
        }
    }
}

impl Write for TlsClientStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Transport for TlsClientStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.sock.peer_addr().ok()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.sock.set_read_timeout(timeout)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.inner.conn.send_close_notify();
        while self.inner.conn.wants_write() {
            self.inner.conn.write_tls(&mut self.inner.sock)?;
        }
        self.inner.sock.shutdown(Shutdown::Write)
    }
}

impl Read for TlsServerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            other => other,
        }
    }
}

impl Write for TlsServerStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Transport for TlsServerStream {
    fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.sock.peer_addr().ok()
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.inner.sock.set_read_timeout(timeout)
    }

    fn shutdown_write(&mut self) -> io::Result<()> {
        self.inner.conn.send_close_notify();
        while self.inner.conn.wants_write() {
            self.inner.conn.write_tls(&mut self.inner.sock)?;
        }
        self.inner.sock.shutdown(Shutdown::Write)
    }
}

/// Wrap a connected socket in a verified (or deliberately unverified) TLS
/// session and complete the handshake.
pub(crate) fn connect_client(
    sock: TcpStream,
    host: &str,
    ca_file: Option<&Path>,
    verify: bool,
    report: Arc<Mutex<VerifyResult>>,
) -> Result<TlsClientStream> {
    set_report(&report, VerifyResult::NotVerified);
    let config = client_config(host, ca_file, verify, report)?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|_| Error::Tls(format!("invalid server name: {}", host)))?;
    let conn = ClientConnection::new(Arc::new(config), server_name)
        .map_err(|e| Error::Tls(e.to_string()))?;
    let mut strm = StreamOwned::new(conn, sock);
    while strm.conn.is_handshaking() {
        strm.conn
            .complete_io(&mut strm.sock)
            .map_err(|e| Error::Tls(format!("handshake failed: {}", e)))?;
    }
    Ok(TlsClientStream { inner: strm })
}

fn client_config(
    host: &str,
    ca_file: Option<&Path>,
    verify: bool,
    report: Arc<Mutex<VerifyResult>>,
) -> Result<ClientConfig> {
    let mut config = if verify {
        let roots = build_root_store(ca_file)?;
        let inner = WebPkiServerVerifier::builder(Arc::new(roots))
            .build()
            .map_err(|e| Error::Tls(format!("verifier build failed: {}", e)))?;
        let verifier = Arc::new(HostVerifier {
            inner,
            host: host.to_string(),
            report,
        });
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(verifier)
            .with_no_client_auth()
    } else {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
            .with_no_client_auth()
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

pub(crate) fn accept_server(
    sock: TcpStream,
    config: Arc<ServerConfig>,
) -> Result<TlsServerStream> {
    let conn = ServerConnection::new(config).map_err(|e| Error::Tls(e.to_string()))?;
    let mut strm = StreamOwned::new(conn, sock);
    while strm.conn.is_handshaking() {
        strm.conn
            .complete_io(&mut strm.sock)
            .map_err(|e| Error::Tls(format!("handshake failed: {}", e)))?;
    }
    Ok(TlsServerStream { inner: strm })
}

pub(crate) fn server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Tls(format!("bad certificate or key: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let data = std::fs::read(path)?;
    let mut certs = Vec::new();
    for cert in rustls_pemfile::certs(&mut &data[..]) {
        certs.push(cert.map_err(|e| Error::Tls(format!("bad certificate: {}", e)))?);
    }
    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates in {}", path.display())));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let data = std::fs::read(path)?;
    rustls_pemfile::private_key(&mut &data[..])
        .map_err(|e| Error::Tls(format!("bad private key: {}", e)))?
        .ok_or_else(|| Error::Tls(format!("no private key in {}", path.display())))
}

/// Chain verification is delegated to webpki; a name mismatch is re-checked
/// against the engine's own hostname rules before being accepted as fatal.
#[derive(Debug)]
struct HostVerifier {
    inner: Arc<WebPkiServerVerifier>,
    host: String,
    report: Arc<Mutex<VerifyResult>>,
}

impl HostVerifier {
    fn set(&self, result: VerifyResult) {
        set_report(&self.report, result);
    }
}

impl ServerCertVerifier for HostVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Ok(verified) => {
                self.set(VerifyResult::Ok);
                Ok(verified)
            }
            Err(rustls::Error::InvalidCertificate(e))
                if matches!(
                    e,
                    CertificateError::NotValidForName
                        | CertificateError::NotValidForNameContext { .. }
                ) =>
            {
                if verify_host(end_entity, &self.host) {
                    self.set(VerifyResult::Ok);
                    Ok(ServerCertVerified::assertion())
                } else {
                    self.set(VerifyResult::HostnameMismatch);
                    Err(rustls::Error::InvalidCertificate(
                        CertificateError::NotValidForName,
                    ))
                }
            }
            Err(e) => {
                self.set(VerifyResult::ChainInvalid);
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Accepts any presented certificate; used when verification is off.
#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Match the certificate's names against `host`. SAN entries are
/// authoritative whenever any entry of the relevant kind is present; the
/// subject common name is only consulted when there are none.
fn verify_host(end_entity: &CertificateDer<'_>, host: &str) -> bool {
    let Ok((_, cert)) = X509Certificate::from_der(end_entity.as_ref()) else {
        return false;
    };
    let ip: Option<std::net::IpAddr> = host.parse().ok();
    let mut relevant = 0usize;
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::DNSName(pattern) => {
                    if ip.is_none() {
                        relevant += 1;
                        if check_host_name(pattern, host) {
                            return true;
                        }
                    }
                }
                GeneralName::IPAddress(octets) => {
                    if let Some(ip) = ip {
                        relevant += 1;
                        if ip_matches(octets, ip) {
                            return true;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    if relevant > 0 {
        return false;
    }
    let subject_matches = cert
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .any(|cn| check_host_name(cn, host));
    subject_matches
}

fn ip_matches(octets: &[u8], ip: std::net::IpAddr) -> bool {
    match ip {
        std::net::IpAddr::V4(v4) => octets == v4.octets().as_slice(),
        std::net::IpAddr::V6(v6) => octets == v6.octets().as_slice(),
    }
}

/// Wildcard hostname match. Label counts must agree and each pattern label
/// must equal its host label, be a bare `*`, or prefix-match with a trailing
/// `*`. Comparison is case-insensitive.
pub fn check_host_name(pattern: &str, host: &str) -> bool {
    if pattern.eq_ignore_ascii_case(host) {
        return true;
    }
    let pattern_labels: Vec<&str> = pattern.split('.').collect();
    let host_labels: Vec<&str> = host.split('.').collect();
    if pattern_labels.len() != host_labels.len() {
        return false;
    }
    pattern_labels.iter().zip(&host_labels).all(|(p, h)| {
        if p.eq_ignore_ascii_case(h) || *p == "*" {
            return true;
        }
        if !p.ends_with('*') {
            return false;
        }
        // Compare as bytes; the host label may not have a char boundary at
        // the prefix length.
        let prefix = &p.as_bytes()[..p.len() - 1];
        let h = h.as_bytes();
        h.len() >= prefix.len() && h[..prefix.len()].eq_ignore_ascii_case(prefix)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn host_name_exact_match() {
        assert!(check_host_name("example.com", "example.com"));
        assert!(check_host_name("Example.COM", "example.com"));
        assert!(!check_host_name("example.com", "example.org"));
    }

    #[test]
    fn host_name_wildcard_label() {
        assert!(check_host_name("*.example.com", "www.example.com"));
        assert!(!check_host_name("*.example.com", "example.com"));
        assert!(!check_host_name("*.example.com", "a.b.example.com"));
    }

    #[test]
    fn host_name_prefix_wildcard() {
        assert!(check_host_name("www*.example.com", "www1.example.com"));
        assert!(check_host_name("www*.example.com", "www.example.com"));
        assert!(!check_host_name("www*.example.com", "web.example.com"));
        assert!(!check_host_name("www*.example.com", "ww.example.com"));
    }

    #[test]
    fn multibyte_host_labels_do_not_panic() {
        assert!(!check_host_name("ab*.example.com", "aé.example.com"));
        assert!(!check_host_name("f*.com", "é.com"));
        assert!(check_host_name("f*.com", "foo.com"));
    }

    fn self_signed(sans: Vec<String>) -> (rcgen::Certificate, rcgen::KeyPair) {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(sans).unwrap();
        params
            .subject_alt_names
            .push(rcgen::SanType::IpAddress("127.0.0.1".parse().unwrap()));
        let cert = params.self_signed(&key).unwrap();
        (cert, key)
    }

    #[test]
    fn verify_host_against_san_entries() {
        let (cert, _key) = self_signed(vec!["localhost".to_string(), "*.corriere.test".to_string()]);
        let der = cert.der();
        assert!(verify_host(der, "localhost"));
        assert!(verify_host(der, "www.corriere.test"));
        assert!(verify_host(der, "127.0.0.1"));
        assert!(!verify_host(der, "elsewhere.example"));
        assert!(!verify_host(der, "10.0.0.1"));
    }

    #[test]
    fn verify_host_falls_back_to_common_name() {
        let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let mut params = rcgen::CertificateParams::new(Vec::<String>::new()).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, "cn.corriere.test");
        let cert = params.self_signed(&key).unwrap();
        assert!(verify_host(cert.der(), "cn.corriere.test"));
        assert!(!verify_host(cert.der(), "other.corriere.test"));
    }

    #[test]
    fn root_store_from_ca_file() {
        let (cert, _key) = self_signed(vec!["ca.corriere.test".to_string()]);
        let path = std::env::temp_dir().join(format!("corriere-ca-{}.pem", std::process::id()));
        fs::write(&path, cert.pem()).unwrap();
        let roots = build_root_store(Some(&path)).unwrap();
        assert_eq!(roots.len(), 1);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn missing_ca_file_is_an_error() {
        let path = std::env::temp_dir().join("corriere-does-not-exist.pem");
        assert!(build_root_store(Some(&path)).is_err());
    }

    #[test]
    fn verify_result_defaults_to_not_verified() {
        assert_eq!(VerifyResult::default(), VerifyResult::NotVerified);
    }
}
