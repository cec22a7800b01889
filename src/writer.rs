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

use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::compression::{crc32, frame_stored, CompressionMethod};
use crate::structures::{ArchiveTail, Entry, EntryMeta, LocalFileHeader};
use crate::{Result, ZipArchive, ZipError};

const MAX_NAME_LEN: usize = 0xfffe;
const MAX_ENTRY_SIZE: u64 = 0xffff_fffe;

impl ZipArchive {
    /// Append one entry to the archive.
    ///
    /// `dos_datetime` is the raw DOS modification stamp, time in the low
    /// half. With [`CompressionMethod::Deflate`] the payload goes through
    /// the stored-block framer; no real compression ever happens.
    ///
    /// Every precondition is checked before any buffer grows, so a failed
    /// append leaves the handle exactly as it was. Appended entries cannot
    /// be modified or removed again.
    pub fn append_file(
        &mut self,
        name: impl AsRef<[u8]>,
        data: &[u8],
        method: CompressionMethod,
        dos_datetime: u32,
    ) -> Result<()> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(ZipError::Malformed("empty file name"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ZipError::OverLimit {
                subject: "file name",
                actual: name.len() as u64,
                limit: MAX_NAME_LEN as u64,
            });
        }
        if data.len() as u64 > MAX_ENTRY_SIZE {
            return Err(ZipError::Unsupported("zip64 sizes for appended entries"));
        }
        // the new local header lands where the directory currently starts
        let header_pos = self.cd_offset;
        if header_pos > MAX_ENTRY_SIZE {
            return Err(ZipError::Unsupported("zip64 offsets for appended entries"));
        }
        let crc32 = crc32(data);
        let payload: Cow<'_, [u8]> = match method {
            CompressionMethod::Stored => Cow::Borrowed(data),
            CompressionMethod::Deflate => {
                Cow::Owned(frame_stored(data, self.limits.max_framed_input)?)
            }
        };

        let meta = EntryMeta {
            method: method.as_u16(),
            dos_datetime,
            crc32,
            stored_size: payload.len() as u32,
            real_size: data.len() as u32,
        };
        meta.encode_local_header(&mut self.appended, name);
        self.appended.extend_from_slice(&payload);
        meta.encode_central_record(&mut self.central_directory, name, header_pos as u32);

        let added = (LocalFileHeader::LEN + name.len() + payload.len()) as u64;
        self.entry_count += 1;
        self.cd_offset += added;
        self.archive_size += added + (Entry::FIXED_LEN + name.len()) as u64;

        self.eocd64.entries_this_disk = self.entry_count;
        self.eocd64.entries_total = self.entry_count;
        self.eocd64.cd_size = self.central_directory.len() as u64;
        self.eocd64.cd_offset = self.cd_offset;
        Ok(())
    }

    /// Stream the finished archive to `dst`.
    ///
    /// One linear pass: the original data region copied verbatim from
    /// `src`, the appended local headers and payloads, the central
    /// directory, the zip64 end-of-central-directory record, and a rebuilt
    /// 42-byte tail. Nothing already written is ever re-read.
    ///
    /// Consumes the handle; the archive state is not meaningful once it has
    /// been written out.
    pub fn write_to<R: Read + Seek, W: Write>(self, src: &mut R, dst: &mut W) -> Result<()> {
        let original_data = self.cd_offset - self.appended.len() as u64;
        src.seek(SeekFrom::Start(0))?;
        copy_exact(src, dst, original_data)?;
        dst.write_all(&self.appended)?;
        dst.write_all(&self.central_directory)?;
        dst.write_all(&self.eocd64.encode())?;
        let eocd64_offset = self.cd_offset + self.central_directory.len() as u64;
        dst.write_all(&ArchiveTail::encode(eocd64_offset))?;
        Ok(())
    }
}

/// Copy exactly `len` bytes; anything short is an error, not a result.
fn copy_exact<R: Read, W: Write>(src: &mut R, dst: &mut W, len: u64) -> Result<()> {
    let mut limited = src.take(len);
    let copied = io::copy(&mut limited, dst)?;
    if copied != len {
        return Err(ZipError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "source archive ended early",
        )));
    }
    Ok(())
}
