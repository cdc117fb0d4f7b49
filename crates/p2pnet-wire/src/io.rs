//! Async framing over tokio streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::message::Message;
use crate::{Header, WireError, HEADER_SIZE};

/// Read one message.
///
/// A clean EOF before the first header byte is [`WireError::ConnectionClosed`];
/// EOF anywhere after that is [`WireError::Truncated`]. For an unknown
/// type the payload is still consumed, so the caller can skip the frame
/// and keep reading.
pub async fn read_message<R>(reader: &mut R) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0u8; HEADER_SIZE];
    let first = reader.read(&mut header_buf[..1]).await?;
    if first == 0 {
        return Err(WireError::ConnectionClosed);
    }
    read_exact_or_truncated(reader, &mut header_buf[1..], HEADER_SIZE).await?;
    let header = Header::decode(&header_buf)?;

    let mut payload = vec![0u8; header.payload_len()];
    read_exact_or_truncated(reader, &mut payload, usize::from(header.size)).await?;

    Message::decode_payload(header.message_type, &payload)
}

/// Write one message and flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_truncated<R>(
    reader: &mut R,
    buf: &mut [u8],
    expected: usize,
) -> Result<(), WireError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(WireError::Truncated {
                expected,
                actual: expected - (buf.len() - filled),
            });
        }
        filled += n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onion::TunnelData;

    #[tokio::test]
    async fn test_stream_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let message = Message::OnionTunnelData(TunnelData {
            tunnel_id: 12,
            data: b"through the stream".to_vec(),
        });

        write_message(&mut client, &message).await.unwrap();
        write_message(&mut client, &Message::AuthSessionDeclined)
            .await
            .unwrap();

        assert_eq!(read_message(&mut server).await.unwrap(), message);
        assert_eq!(
            read_message(&mut server).await.unwrap(),
            Message::AuthSessionDeclined
        );
    }

    #[tokio::test]
    async fn test_clean_eof() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);
        assert!(matches!(
            read_message(&mut server).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_payload_is_truncation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        // Claims 10 bytes in total but only delivers 6.
        client.write_all(&[0x00, 0x0A, 0x02, 0x34, 1, 2]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_message(&mut server).await,
            Err(WireError::Truncated {
                expected: 10,
                actual: 6
            })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_header_is_truncation() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x00, 0x0A]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_message(&mut server).await,
            Err(WireError::Truncated {
                expected: 4,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_type_consumes_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[0x00, 0x06, 0x01, 0xF4, 9, 9]).await.unwrap();
        write_message(&mut client, &Message::AuthSessionConfirmed)
            .await
            .unwrap();

        assert!(matches!(
            read_message(&mut server).await,
            Err(WireError::UnknownType(500))
        ));
        assert_eq!(
            read_message(&mut server).await.unwrap(),
            Message::AuthSessionConfirmed
        );
    }
}
