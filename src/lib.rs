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

//! Loads an existing zip64 archive, appends new entries to it without
//! touching any existing entry data, and streams the result to a new
//! destination. Meant for trusted, programmatic archive augmentation
//! (injecting a manifest or signature file), not as a general archive
//! library: existing entries are never decompressed, and anything the
//! engine cannot prove well-formed is rejected outright.

use thiserror::Error;

pub mod compression;
pub mod reader;
pub mod structures;
pub mod writer;

pub use compression::CompressionMethod;
pub use reader::Entries;
pub use structures::{Entry, Eocd64Record};

pub const EOCD_SIG: u32 = 0x06054b50;
pub const EOCD64_SIG: u32 = 0x06064b50;
pub const EOCD64_LOCATOR_SIG: u32 = 0x07064b50;
pub const CD_SIG: u32 = 0x02014b50;
pub const LFH_SIG: u32 = 0x04034b50;

#[derive(Debug, Error)]
pub enum ZipError {
    #[error("IO exception: {0}")]
    Io(#[from] std::io::Error),
    #[error("bad {record} signature: {found:#010x}")]
    BadSignature { record: &'static str, found: u32 },
    #[error("malformed archive: {0}")]
    Malformed(&'static str),
    #[error("unsupported archive feature: {0}")]
    Unsupported(&'static str),
    #[error("{subject} is {actual} bytes, over the {limit} byte cap")]
    OverLimit {
        subject: &'static str,
        actual: u64,
        limit: u64,
    },
}

pub type Result<T> = std::result::Result<T, ZipError>;

/// Engine policy caps. These bound what the engine is willing to hold in
/// memory, not what the zip format allows.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Largest central directory the loader will read into memory.
    pub max_central_directory: u64,
    /// Largest input the stored-payload framer accepts.
    pub max_framed_input: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_central_directory: 16 << 20,
            max_framed_input: 100_000,
        }
    }
}

/// An archive opened for appending.
///
/// The handle owns the central directory, the zip64 end-of-central-directory
/// record, and the appended-entry images; the source file itself stays with
/// the caller and must remain open until [`ZipArchive::write_to`] has run.
/// Entries already in the archive can be inspected but never removed or
/// modified.
pub struct ZipArchive {
    /// All central directory records, original entries first, appended
    /// entries after them in append order.
    pub(crate) central_directory: Vec<u8>,
    /// Offset at which the central directory will start in the output.
    pub(crate) cd_offset: u64,
    pub(crate) eocd64: Eocd64Record,
    /// Local header + payload images for appended entries, contiguous.
    pub(crate) appended: Vec<u8>,
    pub(crate) entry_count: u64,
    pub(crate) archive_size: u64,
    pub(crate) limits: Limits,
}

impl ZipArchive {
    /// Total number of entries, original and appended.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Offset of the central directory in the eventual output archive.
    pub fn central_directory_offset(&self) -> u64 {
        self.cd_offset
    }

    pub fn central_directory_size(&self) -> u64 {
        self.central_directory.len() as u64
    }

    /// Bytes of appended local headers and payloads so far.
    pub fn appended_size(&self) -> u64 {
        self.appended.len() as u64
    }

    /// Running size of the eventual output archive. Advisory; the rewriter
    /// is authoritative.
    pub fn archive_size(&self) -> u64 {
        self.archive_size
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Hand-crafted zip64 archive images for the module tests.

    use crate::compression::crc32;
    use crate::{CD_SIG, EOCD64_LOCATOR_SIG, EOCD64_SIG, EOCD_SIG, LFH_SIG};

    pub(crate) const DATETIME: u32 = 0x5739_8c64;

    /// Build a minimal commentless zip64 archive with the given stored
    /// entries, laid out the way this engine expects to find them.
    pub(crate) fn build_zip64(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cd = Vec::new();
        for (name, data) in entries {
            let header_offset = out.len() as u32;
            let crc = crc32(data);
            out.extend_from_slice(&LFH_SIG.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&DATETIME.to_le_bytes());
            out.extend_from_slice(&crc.to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(data.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(data);

            cd.extend_from_slice(&CD_SIG.to_le_bytes());
            cd.extend_from_slice(&45u16.to_le_bytes());
            cd.extend_from_slice(&20u16.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&DATETIME.to_le_bytes());
            cd.extend_from_slice(&crc.to_le_bytes());
            cd.extend_from_slice(&(data.len() as u32).to_le_bytes());
            cd.extend_from_slice(&(data.len() as u32).to_le_bytes());
            cd.extend_from_slice(&(name.len() as u16).to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&0u16.to_le_bytes());
            cd.extend_from_slice(&0u32.to_le_bytes());
            cd.extend_from_slice(&header_offset.to_le_bytes());
            cd.extend_from_slice(name.as_bytes());
        }
        let cd_offset = out.len() as u64;
        out.extend_from_slice(&cd);
        let eocd64_offset = out.len() as u64;

        out.extend_from_slice(&EOCD64_SIG.to_le_bytes());
        out.extend_from_slice(&44u64.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&45u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        out.extend_from_slice(&(cd.len() as u64).to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());

        out.extend_from_slice(&EOCD64_LOCATOR_SIG.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&eocd64_offset.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());

        out.extend_from_slice(&EOCD_SIG.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0xffffu16.to_le_bytes());
        out.extend_from_slice(&0xffffu16.to_le_bytes());
        out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        out.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }
}
