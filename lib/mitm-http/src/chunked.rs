/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::io::{self, Read};

/// Write `data` as a single chunk followed by the terminating zero chunk
/// marker. The final CRLF after the last-chunk line belongs to the trailer
/// section and is not written here.
pub(crate) fn encode_chunked(data: &[u8], buf: &mut Vec<u8>) {
    if !data.is_empty() {
        buf.extend_from_slice(format!("{:x}", data.len()).as_bytes());
        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.extend_from_slice(b"\r\n");
    }
    buf.extend_from_slice(b"0\r\n");
}

/// Unwraps chunked transfer framing from an inner reader. The zero-size
/// chunk terminates the stream; trailer bytes after it are left unread.
pub struct ChunkedReader<R> {
    inner: R,
    state: State,
    left_in_chunk: u64,
}

enum State {
    ChunkHeader,
    ChunkData,
    ChunkDataEnd,
    Finished,
}

impl<R: Read> ChunkedReader<R> {
    pub fn new(inner: R) -> Self {
        ChunkedReader {
            inner,
            state: State::ChunkHeader,
            left_in_chunk: 0,
        }
    }

    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::with_capacity(16);
        let mut byte = [0u8; 1];
        loop {
            let nr = self.inner.read(&mut byte)?;
            if nr == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "reader closed while reading chunk line",
                ));
            }
            if byte[0] == b'\n' {
                return Ok(line);
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
            }
            if line.len() > 256 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "chunk size line too long",
                ));
            }
        }
    }

    fn begin_chunk(&mut self) -> io::Result<()> {
        let line = self.read_line()?;
        let header = crate::parse::HttpChunkedLine::parse(&line)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        if header.chunk_size == 0 {
            self.state = State::Finished;
        } else {
            self.left_in_chunk = header.chunk_size;
            self.state = State::ChunkData;
        }
        Ok(())
    }

    fn end_chunk(&mut self) -> io::Result<()> {
        let mut end = [0u8; 2];
        self.inner.read_exact(&mut end)?;
        if &end != b"\r\n" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing CRLF after chunk data",
            ));
        }
        self.state = State::ChunkHeader;
        Ok(())
    }
}

impl<R: Read> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.state {
                State::Finished => return Ok(0),
                State::ChunkHeader => self.begin_chunk()?,
                State::ChunkDataEnd => self.end_chunk()?,
                State::ChunkData => {
                    if buf.is_empty() {
                        return Ok(0);
                    }
                    let limit = buf.len().min(self.left_in_chunk.min(usize::MAX as u64) as usize);
                    let nr = self.inner.read(&mut buf[..limit])?;
                    if nr == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "reader closed inside chunk data",
                        ));
                    }
                    self.left_in_chunk -= nr as u64;
                    if self.left_in_chunk == 0 {
                        self.state = State::ChunkDataEnd;
                    }
                    return Ok(nr);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple() {
        let mut buf = Vec::new();
        encode_chunked(b"hello", &mut buf);
        assert_eq!(buf, b"5\r\nhello\r\n0\r\n");
    }

    #[test]
    fn encode_empty() {
        let mut buf = Vec::new();
        encode_chunked(b"", &mut buf);
        assert_eq!(buf, b"0\r\n");
    }

    #[test]
    fn decode_round_trip() {
        let mut buf = Vec::new();
        encode_chunked(b"hello world", &mut buf);
        let mut decoded = Vec::new();
        ChunkedReader::new(&buf[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn decode_multiple_chunks() {
        let wire = b"3\r\nfoo\r\n4\r\nbarb\r\n0\r\n";
        let mut decoded = Vec::new();
        ChunkedReader::new(&wire[..])
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, b"foobarb");
    }

    #[test]
    fn decode_stops_at_zero_chunk() {
        let wire = b"3\r\nfoo\r\n0\r\nTrailer: x\r\n\r\n";
        let mut reader = ChunkedReader::new(&wire[..]);
        let mut decoded = Vec::new();
        reader.read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, b"foo");
    }

    #[test]
    fn decode_truncated() {
        let wire = b"5\r\nhel";
        let mut decoded = Vec::new();
        let err = ChunkedReader::new(&wire[..])
            .read_to_end(&mut decoded)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
