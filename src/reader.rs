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

use std::io::{Read, Seek, SeekFrom};

use byteorder::{ByteOrder, LittleEndian};

use crate::compression::CompressionMethod;
use crate::structures::{ArchiveTail, Entry, Eocd64Record, LocalFileHeader, ESCAPE32};
use crate::{Limits, Result, ZipArchive, ZipError, CD_SIG};

/// The zip64 end-of-central-directory record has no hard upper bound in the
/// format; anything this far past the minimum 56 bytes is treated as garbage.
const EOCD64_SANITY_BOUND: u64 = 0x10000;

impl ZipArchive {
    /// Load an archive from an open, seekable source with default limits.
    pub fn load<R: Read + Seek>(src: &mut R) -> Result<Self> {
        Self::load_with_limits(src, Limits::default())
    }

    /// Load an archive, reading the whole central directory into memory.
    ///
    /// The source must be a commentless, single-disk zip64 archive: the
    /// classic end-of-central-directory record at the very end has to carry
    /// the zip64 escape sentinels in all four count/size fields, with the
    /// zip64 locator directly in front of it. Anything else fails here
    /// rather than producing a partially loaded handle.
    pub fn load_with_limits<R: Read + Seek>(src: &mut R, limits: Limits) -> Result<Self> {
        let tail_pos = src.seek(SeekFrom::End(-(ArchiveTail::LEN as i64)))?;
        let size = tail_pos + ArchiveTail::LEN as u64;
        let mut tail = [0u8; ArchiveTail::LEN];
        src.read_exact(&mut tail)?;
        let tail = ArchiveTail::parse(&tail)?;

        let eocd64_offset = tail.eocd64_offset;
        if eocd64_offset >= tail_pos {
            return Err(ZipError::Malformed(
                "zip64 end of central directory offset points into the archive tail",
            ));
        }
        let eocd64_len = tail_pos - eocd64_offset;
        if eocd64_len < Eocd64Record::MIN_LEN as u64 || eocd64_len >= EOCD64_SANITY_BOUND {
            return Err(ZipError::Malformed(
                "implausible zip64 end of central directory record size",
            ));
        }
        src.seek(SeekFrom::Start(eocd64_offset))?;
        let mut raw = vec![0u8; eocd64_len as usize];
        src.read_exact(&mut raw)?;
        let eocd64 = Eocd64Record::parse(&raw)?;

        if eocd64.cd_offset > eocd64_offset {
            return Err(ZipError::Malformed(
                "central directory offset past its end record",
            ));
        }
        let cd_size = eocd64_offset - eocd64.cd_offset;
        if cd_size != eocd64.cd_size {
            return Err(ZipError::Malformed("central directory size mismatch"));
        }
        if cd_size > limits.max_central_directory {
            return Err(ZipError::OverLimit {
                subject: "central directory",
                actual: cd_size,
                limit: limits.max_central_directory,
            });
        }
        src.seek(SeekFrom::Start(eocd64.cd_offset))?;
        let mut central_directory = vec![0u8; cd_size as usize];
        src.read_exact(&mut central_directory)?;

        let entry_count = scan_directory(&central_directory)?;
        if entry_count != eocd64.entries_this_disk || entry_count != eocd64.entries_total {
            return Err(ZipError::Malformed(
                "central directory entry count mismatch",
            ));
        }

        Ok(ZipArchive {
            cd_offset: eocd64.cd_offset,
            central_directory,
            eocd64,
            appended: Vec::new(),
            entry_count,
            archive_size: size,
            limits,
        })
    }

    /// Iterate over every entry, original and appended, in directory order.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            rest: &self.central_directory,
        }
    }

    /// Find an entry by exact name. The comparison is byte-for-byte over the
    /// stored name: no normalization, no case folding.
    pub fn find(&self, name: impl AsRef<[u8]>) -> Option<Entry<'_>> {
        let name = name.as_ref();
        self.entries().find(|entry| entry.name() == name)
    }

    /// Resolve an entry to the absolute offset and length of its raw payload
    /// in the source archive, leaving `src` positioned at the payload.
    ///
    /// Only entries stored without compression can be resolved; their bytes
    /// are the payload, so the rewriter can stream them verbatim. The local
    /// file header is re-read and cross-checked so a directory record cannot
    /// point the engine at the central directory or at appended data.
    pub fn locate_data<R: Read + Seek>(&self, src: &mut R, entry: &Entry<'_>) -> Result<(u64, u64)> {
        let header_pos = entry.local_header_offset()?;
        // boundary between the original data region and the directory
        let data_end = self.cd_offset - self.appended.len() as u64;
        if header_pos >= data_end {
            return Err(ZipError::Malformed(
                "local file header inside the central directory",
            ));
        }
        src.seek(SeekFrom::Start(header_pos))?;
        let mut buf = [0u8; LocalFileHeader::LEN];
        src.read_exact(&mut buf)?;
        let header = LocalFileHeader::parse(&buf)?;
        if header.compression != CompressionMethod::Stored.as_u16() {
            return Err(ZipError::Unsupported(
                "compressed source entries cannot be streamed raw",
            ));
        }
        if header.compressed_size == ESCAPE32 {
            return Err(ZipError::Unsupported(
                "zip64 local header sizes (extra field is not parsed)",
            ));
        }
        let data_pos =
            header_pos + (LocalFileHeader::LEN + header.name_len as usize + header.extra_len as usize) as u64;
        let len = header.compressed_size as u64;
        if data_pos + len > data_end {
            return Err(ZipError::Malformed(
                "entry data overlaps the central directory",
            ));
        }
        src.seek(SeekFrom::Start(data_pos))?;
        Ok((data_pos, len))
    }
}

/// Verify every record in the directory image and count them.
fn scan_directory(cd: &[u8]) -> Result<u64> {
    let mut rest = cd;
    let mut count = 0u64;
    while !rest.is_empty() {
        if rest.len() < Entry::FIXED_LEN {
            return Err(ZipError::Malformed("truncated central directory record"));
        }
        let sig = LittleEndian::read_u32(&rest[0..4]);
        if sig != CD_SIG {
            return Err(ZipError::BadSignature {
                record: "central directory record",
                found: sig,
            });
        }
        let entry = Entry::new(rest);
        if entry.name_len() == 0 {
            return Err(ZipError::Malformed(
                "central directory record with an empty file name",
            ));
        }
        if rest.len() < entry.record_len() {
            return Err(ZipError::Malformed(
                "central directory record overruns the directory",
            ));
        }
        rest = &rest[entry.record_len()..];
        count += 1;
    }
    Ok(count)
}

/// Lazy walk over the central directory buffer. Restart by calling
/// [`ZipArchive::entries`] again.
pub struct Entries<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Entries<'a> {
    type Item = Entry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let len = Entry::new(self.rest).record_len();
        let (record, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(Entry::new(record))
    }
}
