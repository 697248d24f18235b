use super::{decode_uint, encode_uint, Signal};
use crate::config::ProtocolConfig;
use crate::error::{LotteryError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames messages over one open byte stream.
///
/// Reads and writes loop until the exact byte count is transferred, so a
/// stream that moves a single byte per call still frames correctly. A
/// transfer of zero bytes ends the exchange: `ConnectionBroken` on write,
/// `ConnectionClosed` on read.
pub struct Framer<S> {
    stream: S,
    config: ProtocolConfig,
}

impl<S> Framer<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, config: ProtocolConfig) -> Self {
        Self { stream, config }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn send_message(&mut self, payload: &str, eof: bool) -> Result<()> {
        let bytes = payload.as_bytes();
        let len = bytes.len() as u64;
        if len > self.config.max_payload_len() {
            return Err(LotteryError::decode(format!(
                "payload of {} bytes does not fit a {}-byte length prefix",
                len, self.config.length_width
            )));
        }

        let header = encode_uint(len, self.config.length_width);
        self.write_exact(&header).await?;
        self.send_signal(Signal::from(eof), self.config.eof_width)
            .await?;

        for chunk in bytes.chunks(self.config.max_packet_size.max(1)) {
            self.write_exact(chunk).await?;
        }

        self.stream.flush().await?;
        tracing::trace!("Sent message of {} bytes (eof: {})", len, eof);
        Ok(())
    }

    pub async fn receive_message(&mut self) -> Result<(String, bool)> {
        self.try_receive_message().await?.ok_or_else(|| {
            LotteryError::connection_closed("peer closed before sending a message")
        })
    }

    /// Like [`Framer::receive_message`], but a peer that hangs up cleanly
    /// between messages yields `None` instead of an error.
    pub async fn try_receive_message(&mut self) -> Result<Option<(String, bool)>> {
        let mut header = vec![0u8; self.config.length_width];
        let filled = self.fill(&mut header).await?;
        if filled == 0 && !header.is_empty() {
            return Ok(None);
        }
        if filled < header.len() {
            return Err(LotteryError::connection_closed(format!(
                "peer closed after {} of {} header bytes",
                filled,
                header.len()
            )));
        }
        let len = decode_uint(&header);
        let eof = self.receive_signal(self.config.eof_width).await?.is_set();

        let len = usize::try_from(len).map_err(|_| {
            LotteryError::decode(format!("payload length {} exceeds addressable memory", len))
        })?;

        let packet = self.config.max_packet_size.max(1).min(len);
        let mut chunk = vec![0u8; packet];
        let mut payload = Vec::with_capacity(packet);
        while payload.len() < len {
            let wanted = (len - payload.len()).min(packet);
            self.read_exact(&mut chunk[..wanted]).await?;
            payload.extend_from_slice(&chunk[..wanted]);
        }

        let payload = String::from_utf8(payload)
            .map_err(|e| LotteryError::decode(format!("payload is not valid UTF-8: {}", e)))?;

        tracing::trace!("Received message of {} bytes (eof: {})", len, eof);
        Ok(Some((payload, eof)))
    }

    pub async fn send_ack(&mut self, ok: bool) -> Result<()> {
        self.send_signal(Signal::from(ok), self.config.ack_width)
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn receive_ack(&mut self) -> Result<bool> {
        let signal = self.receive_signal(self.config.ack_width).await?;
        Ok(signal.is_set())
    }

    async fn send_signal(&mut self, signal: Signal, width: usize) -> Result<()> {
        let bytes = encode_uint(signal.code(&self.config), width);
        self.write_exact(&bytes).await
    }

    async fn receive_signal(&mut self, width: usize) -> Result<Signal> {
        let mut bytes = vec![0u8; width];
        self.read_exact(&mut bytes).await?;
        Signal::from_code(decode_uint(&bytes), &self.config)
    }

    async fn write_exact(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let written = self.stream.write(buf).await?;
            if written == 0 {
                return Err(LotteryError::connection_broken(format!(
                    "transport accepted 0 bytes with {} left to send",
                    buf.len()
                )));
            }
            buf = &buf[written..];
        }
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let filled = self.fill(buf).await?;
        if filled < buf.len() {
            return Err(LotteryError::connection_closed(format!(
                "peer closed after {} of {} bytes",
                filled,
                buf.len()
            )));
        }
        Ok(())
    }

    /// Read until `buf` is full or the peer hangs up; returns the bytes read.
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let read = self.stream.read(&mut buf[filled..]).await?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{duplex, ReadBuf};

    fn small_packets() -> ProtocolConfig {
        ProtocolConfig {
            max_packet_size: 3,
            ..ProtocolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_round_trip_one_byte_at_a_time() {
        let (client, server) = duplex(1);
        let mut client = Framer::new(client, small_packets());
        let mut server = Framer::new(server, small_packets());

        let payload = "1,Santiago,Lorca,30904465,1999-03-17,7574;1,Ana,Paz,1234,2001-01-09,12";
        let (sent, received) = tokio::join!(
            client.send_message(payload, true),
            server.receive_message()
        );

        sent.unwrap();
        assert_eq!(received.unwrap(), (payload.to_string(), true));

        let (sent, received) = tokio::join!(server.send_ack(false), client.receive_ack());
        sent.unwrap();
        assert!(!received.unwrap());
    }

    #[tokio::test]
    async fn test_several_messages_share_one_stream() {
        let (client, server) = duplex(64);
        let mut client = Framer::new(client, ProtocolConfig::default());
        let mut server = Framer::new(server, ProtocolConfig::default());

        client.send_message("first", false).await.unwrap();
        client.send_message("", true).await.unwrap();

        assert_eq!(server.receive_message().await.unwrap(), ("first".to_string(), false));
        assert_eq!(server.receive_message().await.unwrap(), (String::new(), true));
    }

    #[tokio::test]
    async fn test_peer_closing_mid_message_is_connection_closed() {
        let (mut client, server) = duplex(64);
        let mut server = Framer::new(server, ProtocolConfig::default());

        // Announce 10 bytes, deliver 2, then hang up.
        client.write_all(&[0, 0, 0, 10, 0, b'h', b'i']).await.unwrap();
        drop(client);

        let err = server.receive_message().await.unwrap_err();
        assert!(matches!(err, LotteryError::ConnectionClosed(_)));
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn test_clean_close_between_messages_is_not_an_error() {
        let (client, server) = duplex(64);
        let mut client = Framer::new(client, ProtocolConfig::default());
        let mut server = Framer::new(server, ProtocolConfig::default());

        client.send_message("only", false).await.unwrap();
        drop(client);

        assert_eq!(
            server.try_receive_message().await.unwrap(),
            Some(("only".to_string(), false))
        );
        assert_eq!(server.try_receive_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_inside_header_is_connection_closed() {
        let (mut client, server) = duplex(64);
        let mut server = Framer::new(server, ProtocolConfig::default());

        client.write_all(&[0, 0]).await.unwrap();
        drop(client);

        let err = server.try_receive_message().await.unwrap_err();
        assert!(matches!(err, LotteryError::ConnectionClosed(_)));
    }

    #[tokio::test]
    async fn test_unknown_sentinel_is_decode_error() {
        let (mut client, server) = duplex(64);
        let mut server = Framer::new(server, ProtocolConfig::default());

        client.write_all(&[0, 0, 0, 0, 7]).await.unwrap();
        let err = server.receive_message().await.unwrap_err();
        assert!(matches!(err, LotteryError::Decode(_)));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decode_error() {
        let (mut client, server) = duplex(64);
        let mut server = Framer::new(server, ProtocolConfig::default());

        client.write_all(&[0, 0, 0, 2, 1, 0xff, 0xfe]).await.unwrap();
        let err = server.receive_message().await.unwrap_err();
        assert!(matches!(err, LotteryError::Decode(_)));
        assert!(!err.is_transport());
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_before_writing() {
        let config = ProtocolConfig {
            length_width: 1,
            ..ProtocolConfig::default()
        };
        let (client, _server) = duplex(1024);
        let mut client = Framer::new(client, config);

        let payload = "x".repeat(300);
        assert!(client.send_message(&payload, false).await.is_err());
    }

    /// Accepts nothing, as a transport whose peer went away would.
    struct ZeroWriter;

    impl AsyncRead for ZeroWriter {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ZeroWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Ok(0))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_zero_byte_write_is_connection_broken() {
        let mut framer = Framer::new(ZeroWriter, ProtocolConfig::default());
        let err = framer.send_ack(true).await.unwrap_err();
        assert!(matches!(err, LotteryError::ConnectionBroken(_)));
    }

    #[tokio::test]
    async fn test_zero_byte_read_is_connection_closed() {
        let mut framer = Framer::new(ZeroWriter, ProtocolConfig::default());
        let err = framer.receive_ack().await.unwrap_err();
        assert!(matches!(err, LotteryError::ConnectionClosed(_)));
    }
}
