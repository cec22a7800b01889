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

//! On-disk record layouts. All integers are little-endian; every offset
//! below is relative to the start of its record.

use byteorder::{ByteOrder, LittleEndian};

use crate::{Result, ZipError, CD_SIG, EOCD64_LOCATOR_SIG, EOCD64_SIG, EOCD_SIG, LFH_SIG};

/// Reserved all-ones field values meaning "see the zip64 extension".
pub(crate) const ESCAPE16: u16 = 0xffff;
pub(crate) const ESCAPE32: u32 = 0xffff_ffff;

pub(crate) const VERSION_MADE_BY: u16 = 45;
pub(crate) const VERSION_NEEDED: u16 = 20;

/// The fixed 42-byte archive tail: a 20-byte zip64 end-of-central-directory
/// locator immediately followed by a 22-byte classic end-of-central-directory
/// record. In the archives this engine supports, every variable field of the
/// classic record is pinned: no comment, single disk, and all four count/size
/// fields escaped to their zip64 sentinels.
pub struct ArchiveTail {
    pub eocd64_offset: u64,
}

impl ArchiveTail {
    pub const LEN: usize = 20 + 22;

    pub fn parse(buf: &[u8; Self::LEN]) -> Result<Self> {
        let (locator, eocd) = buf.split_at(20);

        let sig = LittleEndian::read_u32(&eocd[0..4]);
        if sig != EOCD_SIG {
            return Err(ZipError::BadSignature {
                record: "end of central directory",
                found: sig,
            });
        }
        if LittleEndian::read_u16(&eocd[20..22]) != 0 {
            return Err(ZipError::Unsupported("archive comment"));
        }
        if LittleEndian::read_u16(&eocd[4..6]) != 0 || LittleEndian::read_u16(&eocd[6..8]) != 0 {
            return Err(ZipError::Unsupported("multi-disk archive"));
        }
        if LittleEndian::read_u16(&eocd[8..10]) != ESCAPE16
            || LittleEndian::read_u16(&eocd[10..12]) != ESCAPE16
            || LittleEndian::read_u32(&eocd[12..16]) != ESCAPE32
            || LittleEndian::read_u32(&eocd[16..20]) != ESCAPE32
        {
            return Err(ZipError::Unsupported("classic (non-zip64) archive"));
        }

        let sig = LittleEndian::read_u32(&locator[0..4]);
        if sig != EOCD64_LOCATOR_SIG {
            return Err(ZipError::BadSignature {
                record: "zip64 end of central directory locator",
                found: sig,
            });
        }
        if LittleEndian::read_u32(&locator[4..8]) != 0 {
            return Err(ZipError::Unsupported("multi-disk archive"));
        }

        Ok(ArchiveTail {
            eocd64_offset: LittleEndian::read_u64(&locator[8..16]),
        })
    }

    /// Rebuild the tail for a single-disk archive whose zip64
    /// end-of-central-directory record starts at `eocd64_offset`.
    pub(crate) fn encode(eocd64_offset: u64) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        LittleEndian::write_u32(&mut buf[0..4], EOCD64_LOCATOR_SIG);
        LittleEndian::write_u32(&mut buf[4..8], 0);
        LittleEndian::write_u64(&mut buf[8..16], eocd64_offset);
        LittleEndian::write_u32(&mut buf[16..20], 1);

        LittleEndian::write_u32(&mut buf[20..24], EOCD_SIG);
        LittleEndian::write_u16(&mut buf[24..26], 0);
        LittleEndian::write_u16(&mut buf[26..28], 0);
        LittleEndian::write_u16(&mut buf[28..30], ESCAPE16);
        LittleEndian::write_u16(&mut buf[30..32], ESCAPE16);
        LittleEndian::write_u32(&mut buf[32..36], ESCAPE32);
        LittleEndian::write_u32(&mut buf[36..40], ESCAPE32);
        LittleEndian::write_u16(&mut buf[40..42], 0);
        buf
    }
}

/// Zip64 end-of-central-directory record: a typed 56-byte core plus whatever
/// extensible data followed it in the source archive, preserved verbatim and
/// never interpreted. Only the counts, size, and offset are rewritten when
/// entries are appended.
#[derive(Debug, Clone)]
pub struct Eocd64Record {
    pub record_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub cd_start_disk: u32,
    pub entries_this_disk: u64,
    pub entries_total: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
    pub extensible_data: Vec<u8>,
}

impl Eocd64Record {
    pub const MIN_LEN: usize = 56;

    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::MIN_LEN {
            return Err(ZipError::Malformed(
                "zip64 end of central directory record shorter than 56 bytes",
            ));
        }
        let sig = LittleEndian::read_u32(&buf[0..4]);
        if sig != EOCD64_SIG {
            return Err(ZipError::BadSignature {
                record: "zip64 end of central directory",
                found: sig,
            });
        }
        let disk_number = LittleEndian::read_u32(&buf[16..20]);
        let cd_start_disk = LittleEndian::read_u32(&buf[20..24]);
        if disk_number != 0 || cd_start_disk != 0 {
            return Err(ZipError::Unsupported("multi-disk archive"));
        }
        Ok(Eocd64Record {
            record_size: LittleEndian::read_u64(&buf[4..12]),
            version_made_by: LittleEndian::read_u16(&buf[12..14]),
            version_needed: LittleEndian::read_u16(&buf[14..16]),
            disk_number,
            cd_start_disk,
            entries_this_disk: LittleEndian::read_u64(&buf[24..32]),
            entries_total: LittleEndian::read_u64(&buf[32..40]),
            cd_size: LittleEndian::read_u64(&buf[40..48]),
            cd_offset: LittleEndian::read_u64(&buf[48..56]),
            extensible_data: buf[56..].to_vec(),
        })
    }

    pub fn encoded_len(&self) -> usize {
        Self::MIN_LEN + self.extensible_data.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::MIN_LEN];
        LittleEndian::write_u32(&mut buf[0..4], EOCD64_SIG);
        LittleEndian::write_u64(&mut buf[4..12], self.record_size);
        LittleEndian::write_u16(&mut buf[12..14], self.version_made_by);
        LittleEndian::write_u16(&mut buf[14..16], self.version_needed);
        LittleEndian::write_u32(&mut buf[16..20], self.disk_number);
        LittleEndian::write_u32(&mut buf[20..24], self.cd_start_disk);
        LittleEndian::write_u64(&mut buf[24..32], self.entries_this_disk);
        LittleEndian::write_u64(&mut buf[32..40], self.entries_total);
        LittleEndian::write_u64(&mut buf[40..48], self.cd_size);
        LittleEndian::write_u64(&mut buf[48..56], self.cd_offset);
        buf.extend_from_slice(&self.extensible_data);
        buf
    }
}

/// Fixed part of a local file header.
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub compression: u16,
    pub dos_datetime: u32,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    pub const LEN: usize = 30;

    pub fn parse(buf: &[u8; Self::LEN]) -> Result<Self> {
        let sig = LittleEndian::read_u32(&buf[0..4]);
        if sig != LFH_SIG {
            return Err(ZipError::BadSignature {
                record: "local file header",
                found: sig,
            });
        }
        Ok(LocalFileHeader {
            version_needed: LittleEndian::read_u16(&buf[4..6]),
            flags: LittleEndian::read_u16(&buf[6..8]),
            compression: LittleEndian::read_u16(&buf[8..10]),
            dos_datetime: LittleEndian::read_u32(&buf[10..14]),
            crc32: LittleEndian::read_u32(&buf[14..18]),
            compressed_size: LittleEndian::read_u32(&buf[18..22]),
            uncompressed_size: LittleEndian::read_u32(&buf[22..26]),
            name_len: LittleEndian::read_u16(&buf[26..28]),
            extra_len: LittleEndian::read_u16(&buf[28..30]),
        })
    }
}

/// One entry's worth of metadata, shared by the local-header and
/// central-record encoders when a new entry is appended.
pub(crate) struct EntryMeta {
    pub method: u16,
    pub dos_datetime: u32,
    pub crc32: u32,
    /// Payload bytes as they will sit in the archive.
    pub stored_size: u32,
    /// Payload bytes before any framing.
    pub real_size: u32,
}

impl EntryMeta {
    pub(crate) fn encode_local_header(&self, out: &mut Vec<u8>, name: &[u8]) {
        out.reserve(LocalFileHeader::LEN + name.len());
        out.extend_from_slice(&LFH_SIG.to_le_bytes());
        out.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.dos_datetime.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.stored_size.to_le_bytes());
        out.extend_from_slice(&self.real_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(name);
    }

    pub(crate) fn encode_central_record(&self, out: &mut Vec<u8>, name: &[u8], header_offset: u32) {
        out.reserve(Entry::FIXED_LEN + name.len());
        out.extend_from_slice(&CD_SIG.to_le_bytes());
        out.extend_from_slice(&VERSION_MADE_BY.to_le_bytes());
        out.extend_from_slice(&VERSION_NEEDED.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&self.method.to_le_bytes());
        out.extend_from_slice(&self.dos_datetime.to_le_bytes());
        out.extend_from_slice(&self.crc32.to_le_bytes());
        out.extend_from_slice(&self.stored_size.to_le_bytes());
        out.extend_from_slice(&self.real_size.to_le_bytes());
        out.extend_from_slice(&(name.len() as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&header_offset.to_le_bytes());
        out.extend_from_slice(name);
    }
}

/// A single central directory record, viewed in place.
///
/// Entries borrow their bytes from the archive's central directory buffer;
/// no per-entry allocation happens. The loader has already verified that
/// every record carries the right signature, a non-empty file name, and
/// variable-length fields that stay inside the buffer, so the accessors
/// index without re-checking.
#[derive(Debug, Clone, Copy)]
pub struct Entry<'a> {
    record: &'a [u8],
}

impl<'a> Entry<'a> {
    pub(crate) const FIXED_LEN: usize = 46;

    pub(crate) fn new(record: &'a [u8]) -> Self {
        Entry { record }
    }

    /// Raw file name, exactly as stored. No encoding is assumed.
    pub fn name(&self) -> &'a [u8] {
        &self.record[Self::FIXED_LEN..Self::FIXED_LEN + self.name_len()]
    }

    pub fn compression_method(&self) -> u16 {
        LittleEndian::read_u16(&self.record[10..12])
    }

    /// Modification stamp in raw DOS date/time form, time in the low half.
    pub fn dos_datetime(&self) -> u32 {
        LittleEndian::read_u32(&self.record[12..16])
    }

    pub fn crc32(&self) -> u32 {
        LittleEndian::read_u32(&self.record[16..20])
    }

    pub fn compressed_size(&self) -> u32 {
        LittleEndian::read_u32(&self.record[20..24])
    }

    pub fn uncompressed_size(&self) -> u32 {
        LittleEndian::read_u32(&self.record[24..28])
    }

    /// Offset of this entry's local file header in the source archive.
    ///
    /// The 32-bit escape value means the real offset lives in a zip64 extra
    /// field, which this engine does not parse; that is reported as
    /// unsupported rather than guessed at.
    pub fn local_header_offset(&self) -> Result<u64> {
        let offset = LittleEndian::read_u32(&self.record[42..46]);
        if offset == ESCAPE32 {
            return Err(ZipError::Unsupported(
                "zip64 local header offset (extra field is not parsed)",
            ));
        }
        Ok(offset as u64)
    }

    pub(crate) fn name_len(&self) -> usize {
        LittleEndian::read_u16(&self.record[28..30]) as usize
    }

    pub(crate) fn extra_len(&self) -> usize {
        LittleEndian::read_u16(&self.record[30..32]) as usize
    }

    pub(crate) fn comment_len(&self) -> usize {
        LittleEndian::read_u16(&self.record[32..34]) as usize
    }

    pub(crate) fn record_len(&self) -> usize {
        Self::FIXED_LEN + self.name_len() + self.extra_len() + self.comment_len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_tail(eocd64_offset: u64) -> [u8; ArchiveTail::LEN] {
        ArchiveTail::encode(eocd64_offset)
    }

    #[test]
    fn tail_round_trips() {
        let tail = ArchiveTail::parse(&valid_tail(0x1122_3344_5566)).unwrap();
        assert_eq!(tail.eocd64_offset, 0x1122_3344_5566);
    }

    #[test]
    fn tail_rejects_bad_eocd_signature() {
        let mut buf = valid_tail(64);
        buf[20] = b'Q';
        assert!(matches!(
            ArchiveTail::parse(&buf),
            Err(ZipError::BadSignature { .. })
        ));
    }

    #[test]
    fn tail_rejects_comment() {
        let mut buf = valid_tail(64);
        buf[40] = 7;
        assert!(matches!(
            ArchiveTail::parse(&buf),
            Err(ZipError::Unsupported("archive comment"))
        ));
    }

    #[test]
    fn tail_rejects_multi_disk() {
        let mut buf = valid_tail(64);
        buf[24] = 1;
        assert!(matches!(
            ArchiveTail::parse(&buf),
            Err(ZipError::Unsupported("multi-disk archive"))
        ));
    }

    #[test]
    fn tail_requires_zip64_sentinels() {
        let mut buf = valid_tail(64);
        // a real (non-escaped) entry count marks a classic archive
        buf[28] = 0x2c;
        buf[29] = 0x00;
        assert!(matches!(
            ArchiveTail::parse(&buf),
            Err(ZipError::Unsupported("classic (non-zip64) archive"))
        ));
    }

    #[test]
    fn tail_rejects_bad_locator_signature() {
        let mut buf = valid_tail(64);
        buf[0] = 0;
        assert!(matches!(
            ArchiveTail::parse(&buf),
            Err(ZipError::BadSignature { .. })
        ));
    }

    #[test]
    fn eocd64_round_trips_with_extensible_data() {
        let record = Eocd64Record {
            record_size: 44 + 3,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            cd_start_disk: 0,
            entries_this_disk: 9,
            entries_total: 9,
            cd_size: 414,
            cd_offset: 0x1_0000_0000,
            extensible_data: vec![0xaa, 0xbb, 0xcc],
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), record.encoded_len());
        let parsed = Eocd64Record::parse(&encoded).unwrap();
        assert_eq!(parsed.entries_total, 9);
        assert_eq!(parsed.cd_size, 414);
        assert_eq!(parsed.cd_offset, 0x1_0000_0000);
        assert_eq!(parsed.extensible_data, [0xaa, 0xbb, 0xcc]);
        // opaque bytes survive a re-encode untouched
        assert_eq!(parsed.encode(), encoded);
    }

    #[test]
    fn eocd64_rejects_short_buffer() {
        assert!(matches!(
            Eocd64Record::parse(&[0u8; 40]),
            Err(ZipError::Malformed(_))
        ));
    }

    #[test]
    fn eocd64_rejects_multi_disk() {
        let mut encoded = Eocd64Record {
            record_size: 44,
            version_made_by: 45,
            version_needed: 45,
            disk_number: 0,
            cd_start_disk: 0,
            entries_this_disk: 1,
            entries_total: 1,
            cd_size: 46,
            cd_offset: 0,
            extensible_data: Vec::new(),
        }
        .encode();
        encoded[16] = 2;
        assert!(matches!(
            Eocd64Record::parse(&encoded),
            Err(ZipError::Unsupported("multi-disk archive"))
        ));
    }

    #[test]
    fn local_header_rejects_bad_signature() {
        let buf = [0u8; LocalFileHeader::LEN];
        assert!(matches!(
            LocalFileHeader::parse(&buf),
            Err(ZipError::BadSignature { .. })
        ));
    }

    #[test]
    fn entry_view_reads_encoded_record() {
        let meta = EntryMeta {
            method: 8,
            dos_datetime: 0x1234_5678,
            crc32: 0xdead_beef,
            stored_size: 105,
            real_size: 100,
        };
        let mut buf = Vec::new();
        meta.encode_central_record(&mut buf, b"sig/manifest.json", 0x0042);

        let entry = Entry::new(&buf);
        assert_eq!(entry.name(), b"sig/manifest.json");
        assert_eq!(entry.compression_method(), 8);
        assert_eq!(entry.dos_datetime(), 0x1234_5678);
        assert_eq!(entry.crc32(), 0xdead_beef);
        assert_eq!(entry.compressed_size(), 105);
        assert_eq!(entry.uncompressed_size(), 100);
        assert_eq!(entry.local_header_offset().unwrap(), 0x42);
        assert_eq!(entry.record_len(), buf.len());
    }

    #[test]
    fn entry_escaped_offset_is_unsupported() {
        let meta = EntryMeta {
            method: 0,
            dos_datetime: 0,
            crc32: 0,
            stored_size: 0,
            real_size: 0,
        };
        let mut buf = Vec::new();
        meta.encode_central_record(&mut buf, b"x", ESCAPE32);
        assert!(matches!(
            Entry::new(&buf).local_header_offset(),
            Err(ZipError::Unsupported(_))
        ));
    }
}
