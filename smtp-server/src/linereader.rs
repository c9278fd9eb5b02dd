use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use futures::io::{AsyncRead, AsyncWrite};
use smtp_message::{next_crlf, NextCrLfState};

/// A buffered front-end over a duplex stream that knows how to pull
/// complete CR-LF terminated command lines while leaving any pipelined
/// bytes that follow (the next command, or DATA/BDAT content arriving in
/// the same TCP segment) available to subsequent reads — including reads
/// performed by [`smtp_message::EscapedDataReader`], since `LineReader`
/// itself implements [`AsyncRead`]/[`AsyncWrite`] and is handed to it
/// directly (spec §5: "pipelined commands are accepted").
pub struct LineReader<IO> {
    io: IO,
    buf: Vec<u8>,
    pos: usize,
    crlf_state: NextCrLfState,
}

impl<IO: AsyncRead + Unpin> LineReader<IO> {
    pub fn new(io: IO) -> LineReader<IO> {
        LineReader { io, buf: Vec::new(), pos: 0, crlf_state: NextCrLfState::Start }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Reads the next complete line, CR-LF stripped. `Ok(None)` means the
    /// peer closed the connection cleanly between lines. Lines (including
    /// their terminator) longer than `max_len` fail with `InvalidData`
    /// (spec §5: "max line size to enforce backpressure").
    pub async fn next_line(&mut self, max_len: usize) -> io::Result<Option<Vec<u8>>> {
        use futures::AsyncReadExt;
        loop {
            if let Some(p) = next_crlf(&self.buf[self.pos..], &mut self.crlf_state) {
                let line_end = self.pos + p - 2;
                let line = self.buf[self.pos..line_end].to_vec();
                self.pos += p;
                self.compact();
                return Ok(Some(line));
            }
            if self.buf.len() - self.pos > max_len {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
            }
            let mut chunk = [0u8; 4096];
            let n = self.io.read(&mut chunk).await?;
            if n == 0 {
                if self.pos < self.buf.len() {
                    return Err(io::Error::new(
                        io::ErrorKind::ConnectionAborted,
                        "connection shutdown with partial command line",
                    ));
                }
                return Ok(None);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    /// Reads exactly `n` bytes verbatim (no dot-unstuffing), for a BDAT
    /// chunk (spec §4.2: "byte-accurate chunk count").
    pub async fn read_exact_n(&mut self, n: u64) -> io::Result<Vec<u8>> {
        use futures::AsyncReadExt;
        let mut out = Vec::with_capacity(n as usize);
        let mut remaining = n;
        while self.pos < self.buf.len() && remaining > 0 {
            let take = std::cmp::min(remaining, (self.buf.len() - self.pos) as u64) as usize;
            out.extend_from_slice(&self.buf[self.pos..self.pos + take]);
            self.pos += take;
            remaining -= take as u64;
        }
        self.compact();
        if remaining > 0 {
            let mut rest = vec![0u8; remaining as usize];
            self.io.read_exact(&mut rest).await?;
            out.extend_from_slice(&rest);
        }
        Ok(out)
    }

    /// Prepends bytes that were already pulled off the wire (by an
    /// [`smtp_message::EscapedDataReader`]) but not consumed as message
    /// content, so the next [`Self::next_line`] sees them.
    pub fn unread(&mut self, bytes: Vec<u8>) {
        self.buf = bytes;
        self.pos = 0;
        self.crlf_state = NextCrLfState::Start;
    }

    pub fn has_pending_input(&self) -> bool {
        self.pos < self.buf.len()
    }

    pub fn into_inner(self) -> IO {
        self.io
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for LineReader<IO> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        dst: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if self.pos < self.buf.len() {
            let n = std::cmp::min(dst.len(), self.buf.len() - self.pos);
            dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            if self.pos == self.buf.len() {
                self.buf.clear();
                self.pos = 0;
            }
            return Poll::Ready(Ok(n));
        }
        Pin::new(&mut self.io).poll_read(cx, dst)
    }
}

impl<IO: AsyncWrite + Unpin> AsyncWrite for LineReader<IO> {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_close(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;

    #[test]
    fn reads_lines_one_at_a_time() {
        smol::block_on(async {
            let mut r = LineReader::new(Cursor::new(b"EHLO a\r\nMAIL FROM:<x>\r\n".to_vec()));
            assert_eq!(r.next_line(1024).await.unwrap().unwrap(), b"EHLO a");
            assert_eq!(r.next_line(1024).await.unwrap().unwrap(), b"MAIL FROM:<x>");
            assert!(r.next_line(1024).await.unwrap().is_none());
        });
    }

    #[test]
    fn read_exact_n_drains_buffer_before_io() {
        smol::block_on(async {
            let mut r = LineReader::new(Cursor::new(b"BDAT 5\r\nhello world".to_vec()));
            assert_eq!(r.next_line(1024).await.unwrap().unwrap(), b"BDAT 5");
            let chunk = r.read_exact_n(5).await.unwrap();
            assert_eq!(chunk, b"hello");
            let chunk2 = r.read_exact_n(6).await.unwrap();
            assert_eq!(chunk2, b" world");
        });
    }

    #[test]
    fn line_too_long_errors() {
        smol::block_on(async {
            let mut r = LineReader::new(Cursor::new(vec![b'a'; 100]));
            let err = r.next_line(10).await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        });
    }
}
