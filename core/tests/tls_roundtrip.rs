/*
 * tls_roundtrip.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * Integration tests for TLS connections against a local server with
 * self-signed certificates: verification off, verification against a CA
 * file, the prefix-wildcard hostname rules, and the reported verification
 * outcome for mismatched names and untrusted chains.
 *
 * Run with:
 *   cargo test -p corriere_core --test tls_roundtrip -- --nocapture
 */

#![cfg(feature = "tls")]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use corriere_core::{tls, Client, Server, VerifyResult};

static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

struct TestCert {
    cert_path: PathBuf,
    key_path: PathBuf,
}

/// Self-signed certificate for the given DNS names plus 127.0.0.1, written
/// out as PEM files. The same file serves as a trust root.
fn make_cert(dns_names: &[&str]) -> TestCert {
    let key = rcgen::KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
    let names: Vec<String> = dns_names.iter().map(|n| n.to_string()).collect();
    let mut params = rcgen::CertificateParams::new(names).unwrap();
    params
        .subject_alt_names
        .push(rcgen::SanType::IpAddress("127.0.0.1".parse().unwrap()));
    let cert = params.self_signed(&key).unwrap();

    let id = SEQUENCE.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir();
    let cert_path = dir.join(format!("corriere-tls-{}-{}.crt", std::process::id(), id));
    let key_path = dir.join(format!("corriere-tls-{}-{}.key", std::process::id(), id));
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key.serialize_pem()).unwrap();
    TestCert { cert_path, key_path }
}

impl Drop for TestCert {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.cert_path);
        let _ = std::fs::remove_file(&self.key_path);
    }
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn start_tls(cert: &TestCert) -> (Arc<Server>, u16, thread::JoinHandle<()>) {
    init_logging();
    tls::init();
    let mut server = Server::new();
    server.set_worker_count(2);
    server.set_tls_files(&cert.cert_path, &cert.key_path).unwrap();
    server.get("/secure", |_, res| {
        res.set_content("over tls", "text/plain");
    });
    let server = Arc::new(server);
    let port = server.bind_to_any_port("127.0.0.1").unwrap();
    let background = Arc::clone(&server);
    let handle = thread::spawn(move || background.listen_after_bind().unwrap());
    while !server.is_running() {
        thread::sleep(Duration::from_millis(5));
    }
    (server, port, handle)
}

fn shutdown(server: Arc<Server>, handle: thread::JoinHandle<()>) {
    server.stop();
    handle.join().unwrap();
}

#[test]
fn round_trip_without_verification() {
    let cert = make_cert(&["localhost"]);
    let (server, port, handle) = start_tls(&cert);

    let mut client = Client::new_tls("127.0.0.1", port);
    client.set_verify(false);
    let res = client.get("/secure").unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(&res.body[..], b"over tls");
    assert_eq!(client.verify_result(), VerifyResult::NotVerified);

    shutdown(server, handle);
}

#[test]
fn verification_against_ca_file() {
    let cert = make_cert(&["localhost"]);
    let (server, port, handle) = start_tls(&cert);

    let mut client = Client::new_tls("localhost", port);
    client.set_ca_cert_path(&cert.cert_path);
    let res = client.get("/secure").unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(&res.body[..], b"over tls");
    assert_eq!(client.verify_result(), VerifyResult::Ok);

    shutdown(server, handle);
}

#[test]
fn prefix_wildcard_names_are_accepted() {
    // webpki refuses a partial-label wildcard; the engine's own hostname
    // rules take over and accept it.
    let cert = make_cert(&["local*"]);
    let (server, port, handle) = start_tls(&cert);

    let mut client = Client::new_tls("localhost", port);
    client.set_ca_cert_path(&cert.cert_path);
    let res = client.get("/secure").unwrap();
    assert_eq!(res.status, 200);
    assert_eq!(client.verify_result(), VerifyResult::Ok);

    shutdown(server, handle);
}

#[test]
fn hostname_mismatch_is_reported() {
    let cert = make_cert(&["elsewhere.test"]);
    let (server, port, handle) = start_tls(&cert);

    let mut client = Client::new_tls("localhost", port);
    client.set_ca_cert_path(&cert.cert_path);
    assert!(client.get("/secure").is_err());
    assert_eq!(client.verify_result(), VerifyResult::HostnameMismatch);

    shutdown(server, handle);
}

#[test]
fn untrusted_chain_is_reported() {
    let server_cert = make_cert(&["localhost"]);
    let other_ca = make_cert(&["localhost"]);
    let (server, port, handle) = start_tls(&server_cert);

    let mut client = Client::new_tls("localhost", port);
    client.set_ca_cert_path(&other_ca.cert_path);
    assert!(client.get("/secure").is_err());
    assert_eq!(client.verify_result(), VerifyResult::ChainInvalid);

    shutdown(server, handle);
}
