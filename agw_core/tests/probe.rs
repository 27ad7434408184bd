//! RA-TLS probe tests against a throwaway in-process TLS server serving a
//! certificate minted with the vendor quote extension.

use std::{sync::Arc, time::Duration};

use agw_core::probe::{
	describe_extensions, fetch_peer_certificate, summarize_certificate,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const QUOTE_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 62397, 1, 1];
const UNKNOWN_OID: &[u64] = &[1, 2, 3, 4, 5];
const QUOTE_CONTENT: &[u8] = &[0xde, 0xad, 0xbe, 0xef];

fn test_certificate() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
	let mut params =
		rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
	params
		.distinguished_name
		.push(rcgen::DnType::CommonName, "agw probe test");
	params.custom_extensions.push(
		rcgen::CustomExtension::from_oid_content(
			QUOTE_OID,
			QUOTE_CONTENT.to_vec(),
		),
	);
	params.custom_extensions.push(
		rcgen::CustomExtension::from_oid_content(UNKNOWN_OID, vec![1, 2, 3]),
	);

	let key = rcgen::KeyPair::generate().unwrap();
	let cert = params.self_signed(&key).unwrap();
	let key_der = PrivatePkcs8KeyDer::from(key.serialize_der()).into();
	(cert.der().clone(), key_der)
}

/// Serve TLS handshakes on a random loopback port, presenting `cert`.
async fn spawn_tls_server(
	cert: CertificateDer<'static>,
	key: PrivateKeyDer<'static>,
) -> String {
	let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
	let config = rustls::ServerConfig::builder_with_provider(provider)
		.with_safe_default_protocol_versions()
		.unwrap()
		.with_no_client_auth()
		.with_single_cert(vec![cert], key)
		.unwrap();
	let acceptor = TlsAcceptor::from(Arc::new(config));

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	tokio::spawn(async move {
		while let Ok((tcp, _)) = listener.accept().await {
			let acceptor = acceptor.clone();
			tokio::spawn(async move {
				if let Ok(stream) = acceptor.accept(tcp).await {
					// hold the connection open long enough for the client
					// to read the peer certificate
					tokio::time::sleep(Duration::from_millis(200)).await;
					drop(stream);
				}
			});
		}
	});

	format!("127.0.0.1:{}", addr.port())
}

#[tokio::test]
async fn probe_fetches_the_served_leaf_certificate() {
	let (cert, key) = test_certificate();
	let endpoint = spawn_tls_server(cert.clone(), key).await;

	let leaf = fetch_peer_certificate(&endpoint).await.unwrap();
	assert_eq!(leaf.as_ref(), cert.as_ref());
}

#[tokio::test]
async fn described_extensions_label_the_vendor_quote_oid() {
	let (cert, _key) = test_certificate();

	let descriptors = describe_extensions(cert.as_ref()).unwrap();

	let quote_ext = descriptors
		.iter()
		.find(|d| d.oid == "1.3.6.1.4.1.62397.1.1")
		.expect("quote extension missing");
	assert_eq!(quote_ext.name.as_deref(), Some("phala-ratls-tdx-quote"));
	assert_eq!(quote_ext.size, QUOTE_CONTENT.len());
	assert!(!quote_ext.critical);

	let unknown_ext = descriptors
		.iter()
		.find(|d| d.oid == "1.2.3.4.5")
		.expect("unknown extension missing");
	assert_eq!(unknown_ext.name, None);
	assert_eq!(unknown_ext.size, 3);

	// original certificate ordering is preserved
	let quote_pos = descriptors
		.iter()
		.position(|d| d.oid == "1.3.6.1.4.1.62397.1.1")
		.unwrap();
	let unknown_pos =
		descriptors.iter().position(|d| d.oid == "1.2.3.4.5").unwrap();
	assert!(quote_pos < unknown_pos);
}

#[tokio::test]
async fn summary_carries_subject_validity_and_extensions() {
	let (cert, _key) = test_certificate();

	let summary = summarize_certificate(cert.as_ref()).unwrap();
	assert!(summary.subject.contains("agw probe test"), "{}", summary.subject);
	assert!(!summary.not_before.is_empty());
	assert!(!summary.not_after.is_empty());
	assert!(summary.extensions.len() >= 2);
}
