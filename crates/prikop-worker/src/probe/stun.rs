//! STUN binding probes
//!
//! A bare Binding Request over UDP; any Binding Response or Binding Error
//! proves the path carries the traffic end to end.

use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const BINDING_ERROR: u16 = 0x0111;

const READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Send one Binding Request to `host:port` and wait for a reply.
pub async fn check(address: &str) -> Result<bool, String> {
    let address = address
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("stun:");

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| format!("bind: {e}"))?;
    socket
        .connect(address)
        .await
        .map_err(|e| format!("connect {address}: {e}"))?;

    socket
        .send(&binding_request())
        .await
        .map_err(|e| format!("send: {e}"))?;

    let mut buf = [0u8; 1024];
    let n = tokio::time::timeout(READ_TIMEOUT, socket.recv(&mut buf))
        .await
        .map_err(|_| "read timeout".to_string())?
        .map_err(|e| format!("recv: {e}"))?;

    Ok(is_binding_response(&buf[..n]))
}

fn binding_request() -> [u8; 20] {
    let mut req = [0u8; 20];
    req[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    // message length stays zero: no attributes
    req[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut req[8..20]);
    req
}

/// Whether a datagram is a STUN Binding Response or Binding Error.
pub fn is_binding_response(datagram: &[u8]) -> bool {
    if datagram.len() < 20 {
        return false;
    }
    let msg_type = u16::from_be_bytes([datagram[0], datagram[1]]);
    msg_type == BINDING_RESPONSE || msg_type == BINDING_ERROR
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(msg_type: u16, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        if len >= 2 {
            buf[0..2].copy_from_slice(&msg_type.to_be_bytes());
        }
        if len >= 8 {
            buf[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_binding_request_shape() {
        let req = binding_request();
        assert_eq!(u16::from_be_bytes([req[0], req[1]]), BINDING_REQUEST);
        assert_eq!(u16::from_be_bytes([req[2], req[3]]), 0);
        assert_eq!(
            u32::from_be_bytes([req[4], req[5], req[6], req[7]]),
            MAGIC_COOKIE
        );
    }

    #[test]
    fn test_accepts_binding_response_and_error() {
        assert!(is_binding_response(&response(BINDING_RESPONSE, 20)));
        assert!(is_binding_response(&response(BINDING_ERROR, 20)));
    }

    #[test]
    fn test_rejects_other_types_and_runts() {
        assert!(!is_binding_response(&response(BINDING_REQUEST, 20)));
        assert!(!is_binding_response(&response(0x0002, 20)));
        assert!(!is_binding_response(&response(BINDING_RESPONSE, 12)));
        assert!(!is_binding_response(&[]));
    }

    #[tokio::test]
    async fn test_check_against_local_responder() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            assert!(n >= 20);
            let mut reply = buf;
            reply[0..2].copy_from_slice(&BINDING_RESPONSE.to_be_bytes());
            let _ = server.send_to(&reply[..n], peer).await;
        });
        assert!(check(&addr.to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_check_strips_url_scheme() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            let (n, peer) = server.recv_from(&mut buf).await.unwrap();
            let mut reply = buf;
            reply[0..2].copy_from_slice(&BINDING_ERROR.to_be_bytes());
            let _ = server.send_to(&reply[..n], peer).await;
        });
        assert!(check(&format!("https://{addr}")).await.unwrap());
    }
}
