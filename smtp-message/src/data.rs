use std::io;

use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Tracks where we are relative to line boundaries and the dot-stuffed
/// terminator while streaming a DATA payload off the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    /// Immediately after a CRLF (or at the very start of the payload): the
    /// next byte, if a `.`, needs lookahead before we know whether it is
    /// stuffing or the terminator.
    AtLineStart,
    /// Saw a leading `.` at AtLineStart; waiting to see if it's `..`
    /// (stuffed) or `.\r\n` (terminator).
    SawLeadingDot,
    /// Saw `.\r`; one more `\n` completes the terminator.
    SawDotCr,
    /// Saw a bare `\r` in the middle of a line; waiting for `\n`.
    Cr,
    /// Anywhere else in a line.
    InLine,
    Completed,
}

/// Reads a DATA (or a BDAT-terminated-as-DATA) payload off a raw byte
/// stream, removing dot-stuffing and stopping exactly at the `CRLF . CRLF`
/// terminator (RFC 5321 §4.1.1.4).
///
/// Unlike BDAT chunks (fixed byte count, no stuffing), this reader never
/// knows the total length up front; it pulls from `inner` one raw chunk at
/// a time and may end up holding bytes that arrived after the terminator
/// (pipelined next-command bytes) — retrievable via [`Self::into_unhandled`]
/// once [`Self::is_finished`] is true.
pub struct EscapedDataReader<'a, R> {
    inner: &'a mut R,
    state: State,
    raw: Vec<u8>,
    raw_pos: usize,
}

impl<'a, R: AsyncRead + Unpin> EscapedDataReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        EscapedDataReader {
            inner,
            state: State::AtLineStart,
            raw: Vec::new(),
            raw_pos: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Completed
    }

    /// Bytes read from the wire but not yet consumed as part of this DATA
    /// payload (i.e. bytes following the terminator). Only meaningful once
    /// [`Self::is_finished`] returns true.
    pub fn into_unhandled(self) -> Vec<u8> {
        self.raw[self.raw_pos..].to_vec()
    }

    async fn fill_raw(&mut self) -> io::Result<bool> {
        if self.raw_pos < self.raw.len() {
            return Ok(true);
        }
        let mut buf = [0u8; 8192];
        let n = self.inner.read(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        self.raw.clear();
        self.raw.extend_from_slice(&buf[..n]);
        self.raw_pos = 0;
        Ok(true)
    }

    /// Reads unstuffed content bytes into `out`, returning how many were
    /// written. Returns `Ok(0)` once the terminator has been found; further
    /// calls after that keep returning `Ok(0)`.
    pub async fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < out.len() && self.state != State::Completed {
            if !self.fill_raw().await? {
                // Connection closed before terminator: treat as a protocol
                // error from the caller's perspective by simply stopping;
                // callers check `is_finished()` to distinguish this case.
                break;
            }
            while self.raw_pos < self.raw.len() && written < out.len() && self.state != State::Completed {
                let b = self.raw[self.raw_pos];
                self.raw_pos += 1;
                match self.state {
                    State::AtLineStart => {
                        if b == b'.' {
                            self.state = State::SawLeadingDot;
                        } else if b == b'\r' {
                            out[written] = b;
                            written += 1;
                            self.state = State::Cr;
                        } else {
                            out[written] = b;
                            written += 1;
                            self.state = State::InLine;
                        }
                    }
                    State::SawLeadingDot => {
                        if b == b'.' {
                            out[written] = b'.';
                            written += 1;
                            self.state = State::InLine;
                        } else if b == b'\r' {
                            self.state = State::SawDotCr;
                        } else {
                            // Malformed: a lone leading dot not part of a
                            // stuffed pair or the terminator. Emit the dot
                            // and reprocess this byte as in-line content.
                            if written < out.len() {
                                out[written] = b'.';
                                written += 1;
                            }
                            self.raw_pos -= 1;
                            self.state = State::InLine;
                        }
                    }
                    State::SawDotCr => {
                        if b == b'\n' {
                            self.state = State::Completed;
                        } else {
                            out[written] = b'.';
                            written += 1;
                            self.raw_pos -= 1;
                            self.state = State::Cr;
                        }
                    }
                    State::Cr => {
                        if b == b'\n' {
                            out[written] = b;
                            written += 1;
                            self.state = State::AtLineStart;
                        } else {
                            out[written] = b;
                            written += 1;
                            self.state = State::InLine;
                        }
                    }
                    State::InLine => {
                        if b == b'\r' {
                            out[written] = b;
                            written += 1;
                            self.state = State::Cr;
                        } else {
                            out[written] = b;
                            written += 1;
                        }
                    }
                    State::Completed => unreachable!(),
                }
            }
        }
        Ok(written)
    }
}

/// Writes a content byte stream to the wire with dot-stuffing applied and
/// the final `CRLF . CRLF` terminator appended, for the forwarding client's
/// outbound DATA command.
pub struct EscapingDataWriter<'a, W> {
    inner: &'a mut W,
    at_line_start: bool,
    last_byte_was_lf: bool,
    wrote_anything: bool,
}

impl<'a, W: AsyncWrite + Unpin> EscapingDataWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        EscapingDataWriter {
            inner,
            at_line_start: true,
            last_byte_was_lf: true,
            wrote_anything: false,
        }
    }

    pub async fn write(&mut self, mut data: &[u8]) -> io::Result<()> {
        while !data.is_empty() {
            if self.at_line_start && data[0] == b'.' {
                self.inner.write_all(b".").await?;
            }
            let eol = data.iter().position(|&b| b == b'\n').map(|p| p + 1).unwrap_or(data.len());
            let (line, rest) = data.split_at(eol);
            self.inner.write_all(line).await?;
            self.wrote_anything = true;
            self.last_byte_was_lf = line.last() == Some(&b'\n');
            self.at_line_start = self.last_byte_was_lf;
            data = rest;
        }
        Ok(())
    }

    /// Emits the terminating `CRLF . CRLF`, adding a trailing CRLF first if
    /// the content didn't already end in one.
    pub async fn finish(mut self) -> io::Result<()> {
        if self.wrote_anything && !self.last_byte_was_lf {
            self.inner.write_all(b"\r\n").await?;
        }
        self.inner.write_all(b".\r\n").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{executor::block_on, io::Cursor};

    #[test]
    fn unstuffs_dot_stuffed_content() {
        block_on(async {
            let mut src = Cursor::new(b"..line1\r\n.\r\n".to_vec());
            let mut reader = EscapedDataReader::new(&mut src);
            let mut out = Vec::new();
            let mut buf = [0u8; 4];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            assert!(reader.is_finished());
            assert_eq!(out, b".line1\r\n");
        });
    }

    #[test]
    fn stops_exactly_at_terminator_and_keeps_trailing_bytes() {
        block_on(async {
            let mut src = Cursor::new(b"hi\r\n.\r\nQUIT\r\n".to_vec());
            let mut reader = EscapedDataReader::new(&mut src);
            let mut out = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            assert!(reader.is_finished());
            assert_eq!(out, b"hi\r\n");
            assert_eq!(reader.into_unhandled(), b"QUIT\r\n");
        });
    }

    #[test]
    fn escaping_writer_stuffs_and_terminates() {
        block_on(async {
            let mut wire = Vec::new();
            {
                let mut writer = EscapingDataWriter::new(&mut wire);
                writer.write(b".line1\r\n").await.unwrap();
                writer.finish().await.unwrap();
            }
            assert_eq!(wire, b"..line1\r\n.\r\n");
        });
    }

    #[test]
    fn escaping_writer_adds_missing_trailing_crlf() {
        block_on(async {
            let mut wire = Vec::new();
            {
                let mut writer = EscapingDataWriter::new(&mut wire);
                writer.write(b"no trailing newline").await.unwrap();
                writer.finish().await.unwrap();
            }
            assert_eq!(wire, b"no trailing newline\r\n.\r\n");
        });
    }
}
