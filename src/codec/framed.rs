use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::{Config, Limits};
use crate::error::{Error, Result};
use crate::protocol::{Frame, FrameHeader};

/// Reads client frames from the read half of a connection.
///
/// Each header is validated as soon as it is complete, so an oversized or unmasked
/// frame is rejected before any of its payload is buffered.
pub struct FrameReader<R> {
    io: R,
    read_buf: BytesMut,
    chunk_size: usize,
    limits: Limits,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, config: &Config) -> Self {
        Self::with_buffer(io, BytesMut::with_capacity(config.read_buffer_size), config)
    }

    /// Start from bytes that were already read off the stream, e.g. the tail of the
    /// handshake request.
    #[must_use]
    pub fn with_buffer(io: R, read_buf: BytesMut, config: &Config) -> Self {
        Self {
            io,
            read_buf,
            chunk_size: config.read_buffer_size.max(64),
            limits: config.limits,
        }
    }

    /// Bytes received but not yet decoded.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read the next complete frame.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the stream ends, even in the middle of a frame
    /// - any header error from [`FrameHeader::parse`] or
    ///   [`FrameHeader::check_client_frame`]
    /// - `FrameTooLarge` if the declared payload exceeds `max_frame_size`
    /// - `Io` on read failure
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match FrameHeader::parse(&self.read_buf) {
                Ok(header) => {
                    header.check_client_frame()?;
                    self.limits.check_frame_size(header.payload_len)?;

                    let total = header.frame_len()?;
                    if self.read_buf.len() >= total {
                        self.read_buf.advance(header.header_len);
                        let payload = self.read_buf.split_to(total - header.header_len);
                        return Ok(Frame::from_parts(header, payload.to_vec()));
                    }
                    self.read_buf.reserve(total - self.read_buf.len());
                }
                Err(Error::IncompleteFrame { .. }) => {
                    self.read_buf.reserve(self.chunk_size);
                }
                Err(e) => return Err(e),
            }

            if self.io.read_buf(&mut self.read_buf).await? == 0 {
                return Err(Error::ConnectionClosed);
            }
        }
    }
}

/// Writes server frames to the write half of a connection.
///
/// Not synchronized on its own; the connection wraps it in a mutex so that frames from
/// different tasks never interleave.
pub struct FrameWriter<W> {
    io: W,
    write_buf: BytesMut,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, config: &Config) -> Self {
        Self {
            io,
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
        }
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Encode `frame` and write it out in full, then flush.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the stream rejects the write.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write_buf.clear();
        frame.write(&mut self.write_buf);
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Shut the write direction down. Further writes fail.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the shutdown fails.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    use crate::protocol::OpCode;

    /// Serves `data` in reads of at most `chunk` bytes.
    struct MockStream {
        read_data: Cursor<Vec<u8>>,
        chunk: usize,
        write_data: Vec<u8>,
        shut_down: bool,
    }

    impl MockStream {
        fn new(data: Vec<u8>) -> Self {
            Self {
                read_data: Cursor::new(data),
                chunk: usize::MAX,
                write_data: Vec::new(),
                shut_down: false,
            }
        }

        fn trickle(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                chunk,
                ..Self::new(data)
            }
        }
    }

    impl AsyncRead for MockStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.read_data.position() as usize;
            let data = self.read_data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let remaining = &data[pos..];
            let to_copy = remaining.len().min(buf.remaining()).min(self.chunk);
            buf.put_slice(&remaining[..to_copy]);
            self.read_data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for MockStream {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            if self.shut_down {
                return Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()));
            }
            self.write_data.extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
        ) -> Poll<std::io::Result<()>> {
            self.shut_down = true;
            Poll::Ready(Ok(()))
        }
    }

    /// Masked "Hello" from RFC 6455 §5.7.
    const MASKED_HELLO: [u8; 11] = [
        0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
    ];

    fn reader(data: Vec<u8>) -> FrameReader<MockStream> {
        FrameReader::new(MockStream::new(data), &Config::default())
    }

    #[tokio::test]
    async fn test_read_frame() {
        let mut reader = reader(MASKED_HELLO.to_vec());

        let frame = reader.read_frame().await.unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(frame.payload(), b"Hello");
        assert_eq!(reader.buffered(), 0);
    }

    #[tokio::test]
    async fn test_read_multiple_frames() {
        // "Hi" masked with [0x12, 0x34, 0x56, 0x78], then [0x01, 0x02] masked with
        // [0xaa, 0xbb, 0xcc, 0xdd]
        let data = vec![
            0x81, 0x82, 0x12, 0x34, 0x56, 0x78, 0x5a, 0x5d, //
            0x82, 0x82, 0xaa, 0xbb, 0xcc, 0xdd, 0xab, 0xb9,
        ];
        let mut reader = reader(data);

        assert_eq!(reader.read_frame().await.unwrap().payload(), b"Hi");
        let frame2 = reader.read_frame().await.unwrap();
        assert_eq!(frame2.opcode, OpCode::Binary);
        assert_eq!(frame2.payload(), &[0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_read_frame_byte_by_byte() {
        let mut reader = FrameReader::new(
            MockStream::trickle(MASKED_HELLO.to_vec(), 1),
            &Config::default(),
        );
        assert_eq!(reader.read_frame().await.unwrap().payload(), b"Hello");
    }

    #[tokio::test]
    async fn test_read_starts_from_leftover_bytes() {
        let (head, tail) = MASKED_HELLO.split_at(4);
        let mut reader = FrameReader::with_buffer(
            MockStream::new(tail.to_vec()),
            BytesMut::from(head),
            &Config::default(),
        );
        assert_eq!(reader.read_frame().await.unwrap().payload(), b"Hello");
    }

    #[tokio::test]
    async fn test_read_large_payload() {
        // zero mask leaves the payload unchanged
        let mut data = vec![0x82, 0xFE, 0x01, 0x2C, 0x00, 0x00, 0x00, 0x00];
        data.extend_from_slice(&[0xAB; 300]);
        let mut reader = reader(data);

        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.payload().len(), 300);
        assert!(frame.payload().iter().all(|&b| b == 0xAB));
    }

    #[tokio::test]
    async fn test_read_connection_closed() {
        let mut reader = reader(vec![]);
        assert_eq!(reader.read_frame().await.unwrap_err(), Error::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_read_eof_mid_frame() {
        let mut reader = reader(MASKED_HELLO[..7].to_vec());
        assert_eq!(reader.read_frame().await.unwrap_err(), Error::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_read_rejects_unmasked() {
        let mut reader = reader(vec![0x81, 0x02, b'H', b'i']);
        assert_eq!(reader.read_frame().await.unwrap_err(), Error::UnmaskedClientFrame);
    }

    #[tokio::test]
    async fn test_read_rejects_oversized_frame_before_payload() {
        let config = Config::default().with_limits(Limits::new(16, 1024, 4, 1024));
        // 64-bit length of 1 GiB, no payload follows
        let data = vec![0x82, 0xFF, 0, 0, 0, 0, 0x40, 0, 0, 0, 1, 2, 3, 4];
        let mut reader = FrameReader::new(MockStream::new(data), &config);

        assert!(matches!(
            reader.read_frame().await,
            Err(Error::FrameTooLarge { size: 0x4000_0000, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_read_rejects_fragmented_ping() {
        let mut reader = reader(vec![0x09, 0x80, 1, 2, 3, 4]);
        assert_eq!(reader.read_frame().await.unwrap_err(), Error::FragmentedControlFrame);
    }

    #[tokio::test]
    async fn test_write_frame_unmasked() {
        let mut writer = FrameWriter::new(MockStream::new(vec![]), &Config::default());

        writer.write_frame(&Frame::text(b"Hi".to_vec())).await.unwrap();

        let written = writer.into_inner().write_data;
        assert_eq!(written, vec![0x81, 0x02, b'H', b'i']);
    }

    #[tokio::test]
    async fn test_write_after_shutdown_fails() {
        let mut writer = FrameWriter::new(MockStream::new(vec![]), &Config::default());

        writer.shutdown().await.unwrap();
        let err = writer.write_frame(&Frame::pong(Vec::new())).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
