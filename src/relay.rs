//! One request/response exchange over an established tunnel. The bytes are
//! forwarded as-is; nothing here understands HTTP beyond building the fixed
//! request line.

use crate::error::{Error, Result};

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

const BUFFER_SIZE: usize = 4096;

pub fn http_get_request(host: &str) -> Vec<u8> {
    format!("GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host).into_bytes()
}

/// Send `request`, then collect everything the peer sends until it closes
/// or stays silent for `idle_timeout`.
pub async fn exchange<S>(stream: &mut S, request: &[u8], idle_timeout: Duration) -> Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(request).await.map_err(Error::RelayError)?;
    stream.flush().await.map_err(Error::RelayError)?;
    debug!("relayed {} request bytes", request.len());

    let mut response = Vec::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        match timeout(idle_timeout, stream.read(&mut buf)).await {
            Ok(Ok(0)) => {
                debug!("remote closed after {} bytes", response.len());
                break;
            }
            Ok(Ok(n)) => response.extend_from_slice(&buf[..n]),
            Ok(Err(e)) => return Err(Error::RelayError(e)),
            Err(_) => {
                debug!("no data for {:?}, ending relay with {} bytes", idle_timeout, response.len());
                break;
            }
        }
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn test_http_get_request() {
        assert_eq!(
            http_get_request("example.com"),
            b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n".to_vec()
        );
    }

    #[tokio::test]
    async fn test_exchange_until_close() {
        let (mut local, mut remote) = duplex(64);
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 4];
            remote.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            remote.write_all(b"pong and more").await.unwrap();
        });
        let response = exchange(&mut local, b"ping", Duration::from_secs(5)).await.unwrap();
        assert_eq!(response, b"pong and more".to_vec());
        peer.await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_idle_timeout_keeps_data() {
        let (mut local, mut remote) = duplex(64);
        let peer = tokio::spawn(async move {
            let mut buf = [0u8; 2];
            remote.read_exact(&mut buf).await.unwrap();
            remote.write_all(b"partial").await.unwrap();
            // hold the stream open past the idle timeout
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(remote);
        });
        let response = exchange(&mut local, b"hi", Duration::from_millis(100)).await.unwrap();
        assert_eq!(response, b"partial".to_vec());
        peer.await.unwrap();
    }
}
