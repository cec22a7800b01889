/*
   Append-only zip64 archive engine, in pure Rust.
   Copyright (C) 2023 Matheus Xavier <mxavier@neonimp.com>

   This program is free software: you can redistribute it and/or modify
   it under the terms of the GNU Lesser General Public License as published by
   the Free Software Foundation, either version 3 of the License, or
   (at your option) any later version.

   This program is distributed in the hope that it will be useful,
   but WITHOUT ANY WARRANTY; without even the implied warranty of
   MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
   GNU General Public License for more details.

   You should have received a copy of the GNU Lesser General Public License
   along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::{Result, ZipError};

/// The zip CRC-32: reflected polynomial 0xEDB88320, initial value and final
/// xor 0xFFFFFFFF, taken over the uncompressed payload bytes.
const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// How an appended entry's payload is laid down. These are the only two
/// methods the engine writes; anything else in a source entry is rejected
/// at the point the entry's data is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Payload bytes written as-is, method 0.
    Stored,
    /// Method 8 on the wire, but the payload is only framed as raw
    /// ("stored") deflate blocks. Decoders that expect deflate data inflate
    /// it transparently; no actual compression happens.
    Deflate,
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(CompressionMethod::Stored),
            8 => Some(CompressionMethod::Deflate),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
        }
    }
}

/// A raw deflate block holds at most 65535 literal bytes.
const STORED_BLOCK_MAX: usize = 0xffff;

/// Frame `input` as a sequence of raw deflate blocks: per chunk a final-block
/// flag, the 16-bit chunk length, its one's complement, then the chunk bytes.
/// Empty input still produces one final empty block so the result is always
/// a complete deflate stream.
///
/// `limit` is engine policy (see [`crate::Limits`]), not a format bound.
pub fn frame_stored(input: &[u8], limit: usize) -> Result<Vec<u8>> {
    if input.len() > limit {
        return Err(ZipError::OverLimit {
            subject: "framed payload",
            actual: input.len() as u64,
            limit: limit as u64,
        });
    }
    let blocks = (input.len() / STORED_BLOCK_MAX) + 1;
    let mut out = Vec::with_capacity(input.len() + blocks * 5);
    let mut rest = input;
    loop {
        let take = rest.len().min(STORED_BLOCK_MAX);
        let (chunk, tail) = rest.split_at(take);
        rest = tail;
        out.push(u8::from(rest.is_empty()));
        out.extend_from_slice(&(take as u16).to_le_bytes());
        out.extend_from_slice(&(!(take as u16)).to_le_bytes());
        out.extend_from_slice(chunk);
        if rest.is_empty() {
            return Ok(out);
        }
    }
}
