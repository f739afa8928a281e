//! The TCPROS wire protocol: the connection-header handshake shared by topic and service
//! connections, and the length-prefixed message framing used after the handshake completes.

mod connection_header;
mod header_codec;

pub use connection_header::{field, ConnectionHeader};
pub use header_codec::HeaderFields;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TcprosError;

/// Default timeout applied to the handshake (header exchange) portion of establishing a
/// connection. Does not apply once the handshake has completed and the connection is steady
/// state.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads one length-prefixed connection header off `stream`.
pub async fn receive_header<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<ConnectionHeader, TcprosError> {
    let total_len = stream.read_u32_le().await? as usize;
    let mut buf = vec![0u8; total_len];
    stream.read_exact(&mut buf).await?;
    ConnectionHeader::from_bytes(&buf)
}

/// Writes one length-prefixed connection header to `stream`.
pub async fn send_header<S: AsyncWrite + Unpin>(
    stream: &mut S,
    header: &ConnectionHeader,
) -> Result<(), TcprosError> {
    stream.write_all(&header.to_bytes()).await?;
    Ok(())
}

/// Runs `fut` (typically a `send_header`/`receive_header` pair) with the default handshake
/// timeout, converting elapsed timeouts into [TcprosError::HandshakeTimeout].
pub async fn with_handshake_timeout<T>(
    fut: impl std::future::Future<Output = Result<T, TcprosError>>,
) -> Result<T, TcprosError> {
    tokio::time::timeout(DEFAULT_HANDSHAKE_TIMEOUT, fut)
        .await
        .map_err(|_| TcprosError::HandshakeTimeout)?
}

/// Reads one length-prefixed message body (the common post-handshake framing for both topic
/// and service connections: a `u32` little-endian length followed by that many bytes).
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, TcprosError> {
    let len = stream.read_u32_le().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TcprosError::ConnectionClosed
        } else {
            TcprosError::Io(e)
        }
    })? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one length-prefixed message body.
pub async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    body: &[u8],
) -> Result<(), TcprosError> {
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.write_u32::<LittleEndian>(body.len() as u32).unwrap();
    framed.extend_from_slice(body);
    stream.write_all(&framed).await?;
    Ok(())
}

/// Reads one length-prefixed message body and reattaches its length prefix, producing the exact
/// buffer shape `roslibrust_serde_rosmsg::from_slice` expects (it mirrors `to_vec`, whose output
/// already carries this same prefix -- the wire framing and the serializer's framing are the same
/// four bytes, not two separate ones).
pub async fn read_message<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Vec<u8>, TcprosError> {
    let body = read_frame(stream).await?;
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.write_u32::<LittleEndian>(body.len() as u32).unwrap();
    framed.extend_from_slice(&body);
    Ok(framed)
}

/// Verifies that two digests are handshake-compatible (exact match or wildcard `"*"` on either
/// side), returning a [TcprosError::HandshakeMismatch] otherwise.
pub fn check_digest_compatible(
    name: &str,
    local_md5sum: &str,
    remote_md5sum: &str,
) -> Result<(), TcprosError> {
    if roslibrust_common::md5sum::digests_compatible(local_md5sum, remote_md5sum) {
        Ok(())
    } else {
        Err(TcprosError::HandshakeMismatch {
            name: name.to_string(),
            local: local_md5sum.to_string(),
            remote: remote_md5sum.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn header_round_trips_over_a_real_async_stream() {
        let (mut a, mut b) = duplex(4096);
        let header = ConnectionHeader::for_subscriber(
            "/listener",
            "/chatter",
            "std_msgs/String",
            "992ce8a1687cec8c8bd883ec73ca41d1",
            "string data\n",
        );
        let header_clone = header.clone();
        let writer = tokio::spawn(async move { send_header(&mut a, &header_clone).await });
        let received = receive_header(&mut b).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(received, header);
    }

    #[tokio::test]
    async fn frame_round_trips() {
        let (mut a, mut b) = duplex(4096);
        let body = b"hello world".to_vec();
        let body_clone = body.clone();
        let writer = tokio::spawn(async move { write_frame(&mut a, &body_clone).await });
        let received = read_frame(&mut b).await.unwrap();
        writer.await.unwrap().unwrap();
        assert_eq!(received, body);
    }

    #[tokio::test]
    async fn read_frame_on_closed_stream_reports_connection_closed() {
        let (a, mut b) = duplex(4096);
        drop(a);
        let err = read_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, TcprosError::ConnectionClosed));
    }

    #[test]
    fn digest_check_accepts_wildcard() {
        assert!(check_digest_compatible("/chatter", "abc", "*").is_ok());
        assert!(check_digest_compatible("/chatter", "*", "abc").is_ok());
        assert!(check_digest_compatible("/chatter", "abc", "abc").is_ok());
        assert!(check_digest_compatible("/chatter", "abc", "def").is_err());
    }
}
