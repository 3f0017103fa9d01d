//! Byte-exact serialization of ZIP records.
//!
//! Every record is encoded little-endian per the ZIP application note,
//! version 4.5, with the ZIP64 extensions emitted unconditionally. Local
//! headers use the streaming form: sizes and CRC live in the data
//! descriptor that follows each payload, and the central directory always
//! carries the real values in a Zip64 extended-information extra field.

use byteorder::{LittleEndian, WriteBytesExt};
use chrono::{DateTime, Datelike, Timelike, Utc};
use std::io::Result;

use super::EntryInfo;
use crate::manifest::{Attributes, Entry};

/// Local File Header - "PK\x03\x04"
pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4B50;
/// Data Descriptor - "PK\x07\x08"
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;
/// Central Directory File Header - "PK\x01\x02"
pub const CENTRAL_FILE_HEADER_SIGNATURE: u32 = 0x0201_4B50;
/// ZIP64 End of Central Directory Record - "PK\x06\x06"
pub const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;
/// ZIP64 End of Central Directory Locator - "PK\x06\x07"
pub const ZIP64_EOCD_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
/// End of Central Directory Record - "PK\x05\x06"
pub const EOCD_SIGNATURE: u32 = 0x0605_4B50;

/// ZIP 4.5 (ZIP64) is required to read these archives.
const VERSION_NEEDED: u16 = 45;
/// Spec 4.5, host 3 (UNIX).
const VERSION_MADE_BY: u16 = (3 << 8) | 45;
/// Bit 3: sizes deferred to the data descriptor. Bit 11: UTF-8 names.
const GP_FLAGS: u16 = 0x0808;

const EXTRA_ZIP64: u16 = 0x0001;
const EXTRA_EXTENDED_TIMESTAMP: u16 = 0x5455;
const EXTRA_UNIX_UID_GID: u16 = 0x7875;

const S_IFREG: u32 = 0o100000;

/// The legacy DOS time/date pair for a UTC timestamp.
///
/// The wall-clock fields are used directly with no zone conversion, at
/// 2-second resolution. Timestamps before 1980 (including the default
/// epoch) clamp to the DOS epoch, 1980-01-01 00:00:00.
pub fn dos_date_time(ts: &DateTime<Utc>) -> (u16, u16) {
    if ts.year() < 1980 {
        return (0, (1 << 5) | 1);
    }
    let time = (ts.hour() as u16) << 11 | (ts.minute() as u16) << 5 | (ts.second() as u16) / 2;
    let date =
        ((ts.year() - 1980) as u16) << 9 | (ts.month() as u16) << 5 | ts.day() as u16;
    (time, date)
}

/// External attribute bits: a regular file with the entry's permission and
/// special bits, in the upper half of the field.
pub fn external_attributes(attrs: &Attributes) -> u32 {
    let mut mode = S_IFREG | (attrs.mode & 0o777);
    if attrs.setuid {
        mode |= 0o4000;
    }
    if attrs.setgid {
        mode |= 0o2000;
    }
    if attrs.sticky {
        mode |= 0o1000;
    }
    mode << 16
}

/// Extended Timestamp extra field (0x5455): unix mtime only.
fn extended_timestamp_extra(ts: &DateTime<Utc>) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(9);
    buf.write_u16::<LittleEndian>(EXTRA_EXTENDED_TIMESTAMP)?;
    buf.write_u16::<LittleEndian>(5)?;
    buf.write_u8(0x01)?; // modification time present
    buf.write_i32::<LittleEndian>(ts.timestamp() as i32)?;
    Ok(buf)
}

/// Zip64 extended information for the local header: zero-valued sizes,
/// announcing that the data descriptor carries 8-byte fields.
fn zip64_extra_local() -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(20);
    buf.write_u16::<LittleEndian>(EXTRA_ZIP64)?;
    buf.write_u16::<LittleEndian>(16)?;
    buf.write_u64::<LittleEndian>(0)?; // uncompressed size
    buf.write_u64::<LittleEndian>(0)?; // compressed size
    Ok(buf)
}

/// Zip64 extended information for the central directory: the true values
/// behind every masked legacy field, in mandated order.
fn zip64_extra_central(info: &EntryInfo) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(32);
    buf.write_u16::<LittleEndian>(EXTRA_ZIP64)?;
    buf.write_u16::<LittleEndian>(28)?;
    buf.write_u64::<LittleEndian>(info.size)?;
    buf.write_u64::<LittleEndian>(info.size_compressed)?;
    buf.write_u64::<LittleEndian>(info.offset)?;
    buf.write_u32::<LittleEndian>(0)?; // disk start
    Ok(buf)
}

/// Info-ZIP New Unix extra field (0x7875), emitted only when both ids are
/// present on the entry.
fn unix_uid_gid_extra(uid: u32, gid: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(15);
    buf.write_u16::<LittleEndian>(EXTRA_UNIX_UID_GID)?;
    buf.write_u16::<LittleEndian>(11)?;
    buf.write_u8(1)?; // version
    buf.write_u8(4)?; // uid width
    buf.write_u32::<LittleEndian>(uid)?;
    buf.write_u8(4)?; // gid width
    buf.write_u32::<LittleEndian>(gid)?;
    Ok(buf)
}

/// The streaming Local File Header for `entry`.
///
/// CRC and both size fields are zero placeholders; the real values follow
/// the payload in the data descriptor.
pub fn local_file_header(entry: &Entry) -> Result<Vec<u8>> {
    let name = entry.path.as_bytes();
    let (time, date) = dos_date_time(&entry.timestamp);

    let mut extra = extended_timestamp_extra(&entry.timestamp)?;
    extra.extend(zip64_extra_local()?);

    let mut buf = Vec::with_capacity(30 + name.len() + extra.len());
    buf.write_u32::<LittleEndian>(LOCAL_FILE_HEADER_SIGNATURE)?;
    buf.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    buf.write_u16::<LittleEndian>(GP_FLAGS)?;
    buf.write_u16::<LittleEndian>(entry.method.as_u16())?;
    buf.write_u16::<LittleEndian>(time)?;
    buf.write_u16::<LittleEndian>(date)?;
    buf.write_u32::<LittleEndian>(0)?; // crc-32
    buf.write_u32::<LittleEndian>(0)?; // compressed size
    buf.write_u32::<LittleEndian>(0)?; // uncompressed size
    buf.write_u16::<LittleEndian>(name.len() as u16)?;
    buf.write_u16::<LittleEndian>(extra.len() as u16)?;
    buf.extend_from_slice(name);
    buf.extend_from_slice(&extra);
    Ok(buf)
}

/// The ZIP64-wide data descriptor trailing one entry's payload.
pub fn data_descriptor(info: &EntryInfo) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(24);
    buf.write_u32::<LittleEndian>(DATA_DESCRIPTOR_SIGNATURE)?;
    buf.write_u32::<LittleEndian>(info.checksum)?;
    buf.write_u64::<LittleEndian>(info.size_compressed)?;
    buf.write_u64::<LittleEndian>(info.size)?;
    Ok(buf)
}

/// One Central Directory File Header.
///
/// The legacy size, offset, and disk fields are always masked
/// (0xFFFFFFFF / 0xFFFF); readers take the true values from the Zip64
/// extended information.
pub fn central_file_header(entry: &Entry, info: &EntryInfo) -> Result<Vec<u8>> {
    let name = entry.path.as_bytes();
    let (time, date) = dos_date_time(&entry.timestamp);

    let mut extra = extended_timestamp_extra(&entry.timestamp)?;
    extra.extend(zip64_extra_central(info)?);
    if let (Some(uid), Some(gid)) = (entry.attributes.uid, entry.attributes.gid) {
        extra.extend(unix_uid_gid_extra(uid, gid)?);
    }

    let mut buf = Vec::with_capacity(46 + name.len() + extra.len());
    buf.write_u32::<LittleEndian>(CENTRAL_FILE_HEADER_SIGNATURE)?;
    buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
    buf.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    buf.write_u16::<LittleEndian>(GP_FLAGS)?;
    buf.write_u16::<LittleEndian>(entry.method.as_u16())?;
    buf.write_u16::<LittleEndian>(time)?;
    buf.write_u16::<LittleEndian>(date)?;
    buf.write_u32::<LittleEndian>(info.checksum)?;
    buf.write_u32::<LittleEndian>(0xFFFF_FFFF)?; // compressed size
    buf.write_u32::<LittleEndian>(0xFFFF_FFFF)?; // uncompressed size
    buf.write_u16::<LittleEndian>(name.len() as u16)?;
    buf.write_u16::<LittleEndian>(extra.len() as u16)?;
    buf.write_u16::<LittleEndian>(0)?; // comment length
    buf.write_u16::<LittleEndian>(0xFFFF)?; // disk number start
    buf.write_u16::<LittleEndian>(0)?; // internal attributes
    buf.write_u32::<LittleEndian>(external_attributes(&entry.attributes))?;
    buf.write_u32::<LittleEndian>(0xFFFF_FFFF)?; // local header offset
    buf.extend_from_slice(name);
    buf.extend_from_slice(&extra);
    Ok(buf)
}

/// The ZIP64 End of Central Directory Record (56 bytes).
pub fn zip64_eocd_record(entry_count: u64, cd_size: u64, cd_offset: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(56);
    buf.write_u32::<LittleEndian>(ZIP64_EOCD_SIGNATURE)?;
    buf.write_u64::<LittleEndian>(44)?; // record size, excluding sig + this field
    buf.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
    buf.write_u16::<LittleEndian>(VERSION_NEEDED)?;
    buf.write_u32::<LittleEndian>(0)?; // this disk
    buf.write_u32::<LittleEndian>(0)?; // disk with central directory
    buf.write_u64::<LittleEndian>(entry_count)?; // entries on this disk
    buf.write_u64::<LittleEndian>(entry_count)?; // entries total
    buf.write_u64::<LittleEndian>(cd_size)?;
    buf.write_u64::<LittleEndian>(cd_offset)?;
    Ok(buf)
}

/// The ZIP64 End of Central Directory Locator (20 bytes), pointing at the
/// ZIP64 EOCD record by absolute offset.
pub fn zip64_eocd_locator(zip64_eocd_offset: u64) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(20);
    buf.write_u32::<LittleEndian>(ZIP64_EOCD_LOCATOR_SIGNATURE)?;
    buf.write_u32::<LittleEndian>(0)?; // disk with the zip64 eocd
    buf.write_u64::<LittleEndian>(zip64_eocd_offset)?;
    buf.write_u32::<LittleEndian>(1)?; // total disks
    Ok(buf)
}

/// The legacy End of Central Directory Record (22 bytes).
///
/// Unlike the central file headers, fields here carry their real values
/// and are masked individually, only when they overflow the legacy width;
/// readers follow the ZIP64 locator for the rest.
pub fn eocd_record(entry_count: u64, cd_size: u64, cd_offset: u64) -> Result<Vec<u8>> {
    let entries = if entry_count <= 0xFFFE {
        entry_count as u16
    } else {
        0xFFFF
    };
    let size = if cd_size < 0xFFFF_FFFF {
        cd_size as u32
    } else {
        0xFFFF_FFFF
    };
    let offset = if cd_offset < 0xFFFF_FFFF {
        cd_offset as u32
    } else {
        0xFFFF_FFFF
    };

    let mut buf = Vec::with_capacity(22);
    buf.write_u32::<LittleEndian>(EOCD_SIGNATURE)?;
    buf.write_u16::<LittleEndian>(0)?; // this disk
    buf.write_u16::<LittleEndian>(0)?; // disk with central directory
    buf.write_u16::<LittleEndian>(entries)?; // entries on this disk
    buf.write_u16::<LittleEndian>(entries)?; // entries total
    buf.write_u32::<LittleEndian>(size)?; // central directory size
    buf.write_u32::<LittleEndian>(offset)?; // central directory offset
    buf.write_u16::<LittleEndian>(0)?; // comment length
    Ok(buf)
}
