/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

//! The binary traffic-log frame format, big-endian lengths throughout:
//!
//! ```text
//! FrameType(1) MessageType(1) ID(8, ascii)
//!   header frame: NameLen(4) ValueLen(4) Name Value
//!   data frame:   Index(4) Terminal(1) DataLen(4) Data
//! ```

use std::io::{self, Read};

pub const FRAME_ID_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Header,
    Data,
}

impl FrameType {
    fn as_u8(self) -> u8 {
        match self {
            FrameType::Header => 0x1,
            FrameType::Data => 0x2,
        }
    }

    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x1 => Some(FrameType::Header),
            0x2 => Some(FrameType::Data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Unknown,
    Request,
    Response,
}

impl MessageType {
    fn as_u8(self) -> u8 {
        match self {
            MessageType::Unknown => 0x0,
            MessageType::Request => 0x1,
            MessageType::Response => 0x2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0x1 => MessageType::Request,
            0x2 => MessageType::Response,
            _ => MessageType::Unknown,
        }
    }
}

/// The exchange id carried in every frame: the first 8 ascii bytes of the
/// context id, zero-padded if shorter.
pub fn frame_id(id: &str) -> [u8; FRAME_ID_LEN] {
    let mut out = [b'0'; FRAME_ID_LEN];
    for (dst, src) in out.iter_mut().zip(id.bytes()) {
        *dst = src;
    }
    out
}

pub fn encode_header_frame(
    id: [u8; FRAME_ID_LEN],
    mt: MessageType,
    name: &str,
    value: &str,
) -> Vec<u8> {
    let mut f = Vec::with_capacity(2 + FRAME_ID_LEN + 8 + name.len() + value.len());
    f.push(FrameType::Header.as_u8());
    f.push(mt.as_u8());
    f.extend_from_slice(&id);
    f.extend_from_slice(&(name.len() as u32).to_be_bytes());
    f.extend_from_slice(&(value.len() as u32).to_be_bytes());
    f.extend_from_slice(name.as_bytes());
    f.extend_from_slice(value.as_bytes());
    f
}

pub fn encode_data_frame(
    id: [u8; FRAME_ID_LEN],
    mt: MessageType,
    index: u32,
    terminal: bool,
    data: &[u8],
) -> Vec<u8> {
    let mut f = Vec::with_capacity(2 + FRAME_ID_LEN + 9 + data.len());
    f.push(FrameType::Data.as_u8());
    f.push(mt.as_u8());
    f.extend_from_slice(&id);
    f.extend_from_slice(&index.to_be_bytes());
    f.push(terminal as u8);
    f.extend_from_slice(&(data.len() as u32).to_be_bytes());
    f.extend_from_slice(data);
    f
}

/// A decoded traffic-log frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Header {
        id: [u8; FRAME_ID_LEN],
        message_type: MessageType,
        name: String,
        value: String,
    },
    Data {
        id: [u8; FRAME_ID_LEN],
        message_type: MessageType,
        index: u32,
        terminal: bool,
        data: Vec<u8>,
    },
}

/// Decodes a stream of frames, for viewers and tests.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        FrameReader { inner }
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    /// The next frame, or `None` on a clean end of stream.
    pub fn next_frame(&mut self) -> io::Result<Option<Frame>> {
        let mut first = [0u8; 1];
        if self.inner.read(&mut first)? == 0 {
            return Ok(None);
        }
        let frame_type = FrameType::from_u8(first[0]).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "unknown frame type")
        })?;

        let mut mt = [0u8; 1];
        self.inner.read_exact(&mut mt)?;
        let message_type = MessageType::from_u8(mt[0]);

        let mut id = [0u8; FRAME_ID_LEN];
        self.inner.read_exact(&mut id)?;

        match frame_type {
            FrameType::Header => {
                let name_len = self.read_u32()? as usize;
                let value_len = self.read_u32()? as usize;
                let mut name = vec![0u8; name_len];
                self.inner.read_exact(&mut name)?;
                let mut value = vec![0u8; value_len];
                self.inner.read_exact(&mut value)?;
                Ok(Some(Frame::Header {
                    id,
                    message_type,
                    name: String::from_utf8_lossy(&name).into_owned(),
                    value: String::from_utf8_lossy(&value).into_owned(),
                }))
            }
            FrameType::Data => {
                let index = self.read_u32()?;
                let mut terminal = [0u8; 1];
                self.inner.read_exact(&mut terminal)?;
                let data_len = self.read_u32()? as usize;
                let mut data = vec![0u8; data_len];
                self.inner.read_exact(&mut data)?;
                Ok(Some(Frame::Data {
                    id,
                    message_type,
                    index,
                    terminal: terminal[0] != 0,
                    data,
                }))
            }
        }
    }
}
