//! HTTP/3 probes over QUIC
//!
//! A minimal h3 GET per probe: fresh endpoint, certificate validation off,
//! success once the response head arrives and the body threshold is read.

use std::sync::Arc;

use bytes::Buf;
use prikop_core::targets::Target;
use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tracing::trace;

use super::bust_cache;
use super::http::USER_AGENT;

/// One HTTP/3 probe against the target URL.
pub async fn check(target: &Target) -> Result<bool, String> {
    let url = bust_cache(&target.url);
    let uri: http::Uri = url.parse().map_err(|e| format!("uri: {e}"))?;
    let host = uri.host().ok_or_else(|| "uri without host".to_string())?.to_string();
    let port = uri.port_u16().unwrap_or(443);

    let addr = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|e| format!("resolve {host}: {e}"))?
        .next()
        .ok_or_else(|| format!("no address for {host}"))?;

    let mut tls = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(SkipServerVerification::new())
        .with_no_client_auth();
    tls.alpn_protocols = vec![b"h3".to_vec()];

    let quic_tls = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
        .map_err(|e| format!("tls: {e}"))?;
    let client_config = quinn::ClientConfig::new(Arc::new(quic_tls));

    let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse().map_err(|e| format!("{e}"))?)
        .map_err(|e| format!("endpoint: {e}"))?;
    endpoint.set_default_client_config(client_config);

    let connection = endpoint
        .connect(addr, &host)
        .map_err(|e| format!("connect: {e}"))?
        .await
        .map_err(|e| format!("handshake: {e}"))?;

    let h3_conn = h3_quinn::Connection::new(connection);
    let (mut driver, mut sender) = h3::client::new(h3_conn)
        .await
        .map_err(|e| format!("h3 setup: {e}"))?;
    let drive = tokio::spawn(async move {
        let _ = futures::future::poll_fn(|cx| driver.poll_close(cx)).await;
    });

    let request = http::Request::builder()
        .method("GET")
        .uri(&url)
        .header(http::header::USER_AGENT, USER_AGENT)
        .body(())
        .map_err(|e| format!("request: {e}"))?;

    let result = exchange(&mut sender, request, target).await;

    drop(sender);
    endpoint.wait_idle().await;
    drive.abort();

    result
}

async fn exchange(
    sender: &mut h3::client::SendRequest<h3_quinn::OpenStreams, bytes::Bytes>,
    request: http::Request<()>,
    target: &Target,
) -> Result<bool, String> {
    let mut stream = sender
        .send_request(request)
        .await
        .map_err(|e| format!("send: {e}"))?;
    stream.finish().await.map_err(|e| format!("finish: {e}"))?;

    let response = stream
        .recv_response()
        .await
        .map_err(|e| format!("response: {e}"))?;

    if !target.ignore_status {
        let status = response.status().as_u16();
        if !(200..400).contains(&status) {
            trace!(url = target.url, status, "h3 probe rejected by status");
            return Ok(false);
        }
    }

    let mut read = 0usize;
    while read < target.threshold {
        match stream.recv_data().await {
            Ok(Some(chunk)) => read += chunk.remaining(),
            Ok(None) => break,
            Err(e) => return Err(format!("body: {e}")),
        }
    }

    Ok(read >= target.threshold)
}

/// Accepts any server certificate. Reachability through a mangled path is
/// being measured, not transport security.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self(Arc::new(rustls::crypto::ring::default_provider())))
    }
}

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
