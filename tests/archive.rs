//! End-to-end archive tests.
//!
//! Archives are produced in memory, then parsed back structurally: central
//! directory first (the way any conformant reader works), then each local
//! header, payload, and data descriptor. Payloads are inflated and compared
//! byte for byte against the original sources.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{TimeZone, Utc};
use flate2::read::DeflateDecoder;
use std::io::{Cursor, Read, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

use zipflow::{
    Attributes, CompressionLevel, DeflateOptions, EncodeOptions, EntrySpec, Error, ErrorPolicy,
    Event, ManifestBuilder, Method, SourceSpec, ZipStream,
};

const LFH_SIGNATURE: u32 = 0x0403_4B50;
const DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;
const CDFH_SIGNATURE: u32 = 0x0201_4B50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4B50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
const EOCD_SIGNATURE: u32 = 0x0605_4B50;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug)]
struct ParsedEntry {
    name: String,
    method: u16,
    flags: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    lfh_offset: u64,
    external_attrs: u32,
    dos_time: u16,
    dos_date: u16,
    unix_ids: Option<(u32, u32)>,
    payload: Vec<u8>,
}

/// Walk the archive the way a reader does: legacy EOCD, ZIP64 locator and
/// record, central directory, then every local header and payload.
fn parse_archive(bytes: &[u8]) -> Result<Vec<ParsedEntry>> {
    if bytes.len() < 22 + 20 + 56 {
        bail!("archive too short for the mandatory trailer records");
    }

    // Legacy EOCD: real values when they fit, 0xFFFF sentinels otherwise.
    let mut eocd = Cursor::new(&bytes[bytes.len() - 22..]);
    if eocd.read_u32::<LittleEndian>()? != EOCD_SIGNATURE {
        bail!("missing end-of-central-directory record");
    }
    eocd.set_position(8);
    let legacy_entries = eocd.read_u16::<LittleEndian>()?;

    // ZIP64 EOCD locator sits immediately before the EOCD.
    let mut locator = Cursor::new(&bytes[bytes.len() - 42..bytes.len() - 22]);
    if locator.read_u32::<LittleEndian>()? != ZIP64_LOCATOR_SIGNATURE {
        bail!("missing zip64 locator");
    }
    let _disk = locator.read_u32::<LittleEndian>()?;
    let zip64_offset = locator.read_u64::<LittleEndian>()? as usize;

    // ZIP64 EOCD record.
    let mut record = Cursor::new(&bytes[zip64_offset..]);
    if record.read_u32::<LittleEndian>()? != ZIP64_EOCD_SIGNATURE {
        bail!("zip64 locator points past the record");
    }
    record.set_position(32);
    let total_entries = record.read_u64::<LittleEndian>()?;
    let cd_size = record.read_u64::<LittleEndian>()?;
    let cd_offset = record.read_u64::<LittleEndian>()?;
    if cd_offset + cd_size != zip64_offset as u64 {
        bail!("central directory does not abut the zip64 record");
    }
    if legacy_entries != 0xFFFF && u64::from(legacy_entries) != total_entries {
        bail!("legacy entry count disagrees with the zip64 record");
    }

    // Central directory.
    let mut entries = Vec::with_capacity(total_entries as usize);
    let mut cursor = Cursor::new(&bytes[cd_offset as usize..zip64_offset]);
    for _ in 0..total_entries {
        entries.push(parse_cdfh_and_payload(&mut cursor, bytes)?);
    }
    if cursor.position() != cd_size {
        bail!("central directory size mismatch");
    }
    Ok(entries)
}

fn parse_cdfh_and_payload(cursor: &mut Cursor<&[u8]>, archive: &[u8]) -> Result<ParsedEntry> {
    if cursor.read_u32::<LittleEndian>()? != CDFH_SIGNATURE {
        bail!("bad central file header signature");
    }
    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let method = cursor.read_u16::<LittleEndian>()?;
    let dos_time = cursor.read_u16::<LittleEndian>()?;
    let dos_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let legacy_compressed = cursor.read_u32::<LittleEndian>()?;
    let legacy_uncompressed = cursor.read_u32::<LittleEndian>()?;
    let name_len = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
    let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
    let disk_start = cursor.read_u16::<LittleEndian>()?;
    let _internal = cursor.read_u16::<LittleEndian>()?;
    let external_attrs = cursor.read_u32::<LittleEndian>()?;
    let legacy_offset = cursor.read_u32::<LittleEndian>()?;

    if legacy_compressed != 0xFFFF_FFFF
        || legacy_uncompressed != 0xFFFF_FFFF
        || legacy_offset != 0xFFFF_FFFF
        || disk_start != 0xFFFF
    {
        bail!("legacy fields must defer to the zip64 extra");
    }

    let mut name = vec![0u8; name_len];
    cursor.read_exact(&mut name)?;
    let name = String::from_utf8(name).context("entry names are UTF-8")?;

    // Extra fields: zip64 carries the real sizes, 0x7875 the unix ids.
    let mut compressed_size = None;
    let mut uncompressed_size = None;
    let mut lfh_offset = None;
    let mut unix_ids = None;
    let extra_end = cursor.position() + extra_len as u64;
    while cursor.position() + 4 <= extra_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()? as u64;
        let field_end = cursor.position() + field_size;
        match header_id {
            0x0001 => {
                uncompressed_size = Some(cursor.read_u64::<LittleEndian>()?);
                compressed_size = Some(cursor.read_u64::<LittleEndian>()?);
                lfh_offset = Some(cursor.read_u64::<LittleEndian>()?);
            }
            0x7875 => {
                let _version = cursor.read_u8()?;
                let _uid_len = cursor.read_u8()?;
                let uid = cursor.read_u32::<LittleEndian>()?;
                let _gid_len = cursor.read_u8()?;
                let gid = cursor.read_u32::<LittleEndian>()?;
                unix_ids = Some((uid, gid));
            }
            _ => {}
        }
        cursor.set_position(field_end);
    }
    cursor.set_position(extra_end + comment_len as u64);

    let compressed_size = compressed_size.context("zip64 extra missing compressed size")?;
    let uncompressed_size = uncompressed_size.context("zip64 extra missing uncompressed size")?;
    let lfh_offset = lfh_offset.context("zip64 extra missing offset")?;

    // Local header, payload, data descriptor.
    let mut lfh = Cursor::new(&archive[lfh_offset as usize..]);
    if lfh.read_u32::<LittleEndian>()? != LFH_SIGNATURE {
        bail!("central directory offset does not hit a local header");
    }
    lfh.set_position(26);
    let lfh_name_len = lfh.read_u16::<LittleEndian>()? as u64;
    let lfh_extra_len = lfh.read_u16::<LittleEndian>()? as u64;
    let data_offset = lfh_offset + 30 + lfh_name_len + lfh_extra_len;

    let data =
        &archive[data_offset as usize..(data_offset + compressed_size) as usize];
    let payload = match method {
        0 => data.to_vec(),
        8 => {
            let mut decoder = DeflateDecoder::new(data);
            let mut out = Vec::with_capacity(uncompressed_size as usize);
            decoder.read_to_end(&mut out).context("raw deflate payload")?;
            out
        }
        other => bail!("unexpected method {}", other),
    };

    let mut descriptor =
        Cursor::new(&archive[(data_offset + compressed_size) as usize..]);
    if descriptor.read_u32::<LittleEndian>()? != DESCRIPTOR_SIGNATURE {
        bail!("missing data descriptor after payload");
    }
    if descriptor.read_u32::<LittleEndian>()? != crc32 {
        bail!("descriptor crc disagrees with central directory");
    }
    if descriptor.read_u64::<LittleEndian>()? != compressed_size {
        bail!("descriptor compressed size disagrees");
    }
    if descriptor.read_u64::<LittleEndian>()? != uncompressed_size {
        bail!("descriptor uncompressed size disagrees");
    }

    Ok(ParsedEntry {
        name,
        method,
        flags,
        crc32,
        compressed_size,
        uncompressed_size,
        lfh_offset,
        external_attrs,
        dos_time,
        dos_date,
        unix_ids,
        payload,
    })
}

fn entry(path: &str, source: SourceSpec, method: Method) -> EntrySpec {
    EntrySpec {
        source: Some(source),
        path: Some(path.to_string()),
        method,
        ..EntrySpec::default()
    }
}

fn deflate(level: CompressionLevel) -> Method {
    Method::Deflate(DeflateOptions {
        level,
        ..DeflateOptions::default()
    })
}

async fn collect(manifest: zipflow::Manifest, options: EncodeOptions) -> Result<Vec<u8>> {
    let mut stream = ZipStream::new(manifest, options);
    Ok(stream.collect().await?)
}

/// Serve one canned HTTP response, then close the connection.
async fn one_shot_server(response: Vec<u8>) -> SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = socket.read(&mut request).await;
        let _ = socket.write_all(&response).await;
        let _ = socket.shutdown().await;
    });
    addr
}

fn http_200(body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

#[tokio::test]
async fn mixed_methods_roundtrip() -> Result<()> {
    init_logging();

    let payloads: Vec<Vec<u8>> = (0..3)
        .map(|i| {
            // Compressible but not trivial content.
            (0..512 * 1024).map(|j| ((j / 7 + i * 31) % 251) as u8).collect()
        })
        .collect();

    let mut files = Vec::new();
    for payload in &payloads {
        let mut tmp = tempfile::NamedTempFile::new()?;
        tmp.write_all(payload)?;
        files.push(tmp);
    }

    let manifest = ManifestBuilder::new()
        .append(entry(
            "one.bin",
            SourceSpec::file(files[0].path()),
            deflate(CompressionLevel::Default),
        ))
        .append(entry("two.bin", SourceSpec::file(files[1].path()), Method::Store))
        .append(entry(
            "three.bin",
            SourceSpec::file(files[2].path()),
            deflate(CompressionLevel::BestCompression),
        ))
        .build();

    let archive = collect(manifest, EncodeOptions::default()).await?;
    let entries = parse_archive(&archive)?;

    assert_eq!(entries.len(), 3);
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["one.bin", "two.bin", "three.bin"]);

    for (parsed, payload) in entries.iter().zip(&payloads) {
        assert_eq!(parsed.flags, 0x0808);
        assert_eq!(parsed.payload, *payload);
        assert_eq!(parsed.uncompressed_size, payload.len() as u64);
        assert_eq!(parsed.crc32, crc32fast::hash(payload));
    }
    assert_eq!(entries[0].method, 8);
    assert_eq!(entries[1].method, 0);
    assert_eq!(entries[2].method, 8);
    // Store copies the payload verbatim.
    assert_eq!(entries[1].compressed_size, entries[1].uncompressed_size);
    // The first entry starts at offset zero.
    assert_eq!(entries[0].lfh_offset, 0);
    Ok(())
}

#[tokio::test]
async fn skipped_entries_leave_no_trace_in_the_directory() -> Result<()> {
    init_logging();

    let body = b"available right now".to_vec();
    let addr = one_shot_server(http_200(&body)).await;
    let url = format!("http://{}/now.txt", addr);

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let manifest = ManifestBuilder::new()
        .append(entry(
            "now.txt",
            SourceSpec::dynamic(move || Ok(SourceSpec::url(url.clone()))),
            Method::Store,
        ))
        .append(entry(
            "later.txt",
            SourceSpec::dynamic(|| Err("not_found".to_string())),
            Method::Store,
        ))
        .build();

    let options = EncodeOptions {
        on_error: ErrorPolicy::Skip,
        on_event: Some(Box::new(move |event| {
            if let Event::EntryFailed { entry, reason } = &event {
                sink.lock()
                    .unwrap()
                    .push((entry.path.clone(), reason.to_string()));
            }
        })),
    };

    let archive = collect(manifest, options).await?;
    let entries = parse_archive(&archive)?;

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "now.txt");
    assert_eq!(entries[0].payload, body);

    let failures = events.lock().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "later.txt");
    assert!(failures[0].1.contains("not_found"));
    Ok(())
}

#[tokio::test]
async fn halt_on_a_404_truncates_the_stream() -> Result<()> {
    init_logging();

    let addr =
        one_shot_server(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\n\r\n".to_vec()).await;

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    let manifest = ManifestBuilder::new()
        .append(entry(
            "missing.bin",
            SourceSpec::url(format!("http://{}/missing.bin", addr)),
            Method::Store,
        ))
        .build();

    let options = EncodeOptions {
        on_error: ErrorPolicy::Halt,
        on_event: Some(Box::new(move |event| {
            let name = match event {
                Event::EntryFailed { .. } => "entry_failed",
                Event::StreamEnded { .. } => "stream_ended",
                _ => return,
            };
            sink.lock().unwrap().push(name);
        })),
    };

    let mut stream = ZipStream::new(manifest, options);
    let mut emitted = Vec::new();
    let mut error = None;
    while let Some(chunk) = stream.next_chunk().await {
        match chunk {
            Ok(bytes) => emitted.extend(bytes),
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    match error {
        Some(Error::HttpStatus(404)) => {}
        other => bail!("expected a 404 failure, got {:?}", other),
    }
    // The local header went out before the failure; the trailer never did.
    assert!(parse_archive(&emitted).is_err());
    assert_eq!(*events.lock().unwrap(), vec!["entry_failed", "stream_ended"]);
    Ok(())
}

#[tokio::test]
async fn url_payload_streams_into_the_archive() -> Result<()> {
    init_logging();

    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 256) as u8).collect();
    let addr = one_shot_server(http_200(&body)).await;

    let manifest = ManifestBuilder::new()
        .append(entry(
            "download.bin",
            SourceSpec::url(format!("http://{}/download.bin", addr)),
            deflate(CompressionLevel::Default),
        ))
        .build();

    let archive = collect(manifest, EncodeOptions::default()).await?;
    let entries = parse_archive(&archive)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].payload, body);
    Ok(())
}

#[tokio::test]
async fn attributes_and_ids_roundtrip() -> Result<()> {
    init_logging();

    let with_attrs = |mode: u32, ids: Option<(u32, u32)>| {
        let mut spec = entry("x", SourceSpec::random(16), Method::Store);
        spec.attributes = Attributes {
            mode,
            uid: ids.map(|(uid, _)| uid),
            gid: ids.map(|(_, gid)| gid),
            ..Attributes::default()
        };
        spec
    };

    let manifest = ManifestBuilder::new()
        .append({
            let mut spec = with_attrs(0o644, None);
            spec.path = Some("default.bin".to_string());
            spec
        })
        .append({
            let mut spec = with_attrs(0o123, None);
            spec.path = Some("odd.bin".to_string());
            spec
        })
        .append({
            let mut spec = with_attrs(0o456, Some((1000, 1000)));
            spec.path = Some("owned.bin".to_string());
            spec
        })
        .build();

    let archive = collect(manifest, EncodeOptions::default()).await?;
    let entries = parse_archive(&archive)?;

    let modes: Vec<u32> = entries
        .iter()
        .map(|e| (e.external_attrs >> 16) & 0o777)
        .collect();
    assert_eq!(modes, vec![0o644, 0o123, 0o456]);
    for parsed in &entries {
        assert_eq!((parsed.external_attrs >> 16) & 0o170000, 0o100000); // regular file
    }
    assert_eq!(entries[0].unix_ids, None);
    assert_eq!(entries[1].unix_ids, None);
    assert_eq!(entries[2].unix_ids, Some((1000, 1000)));
    Ok(())
}

#[tokio::test]
async fn empty_manifest_emits_nothing() {
    init_logging();

    let manifest = ManifestBuilder::new().build();
    let mut stream = ZipStream::new(manifest, EncodeOptions::default());
    match stream.next_chunk().await {
        Some(Err(Error::InvalidManifest { .. })) => {}
        other => panic!("expected invalid manifest, got {:?}", other.map(|r| r.is_ok())),
    }
    assert_eq!(stream.bytes_emitted(), 0);
}

#[tokio::test]
async fn identical_manifests_produce_identical_archives() -> Result<()> {
    init_logging();

    let mut tmp = tempfile::NamedTempFile::new()?;
    tmp.write_all(&vec![42u8; 100_000])?;
    let ts = Utc.with_ymd_and_hms(2021, 6, 15, 12, 0, 0).unwrap();

    let build = || {
        let mut spec = entry(
            "data.bin",
            SourceSpec::file(tmp.path()),
            deflate(CompressionLevel::Default),
        );
        spec.timestamp = Some(ts);
        ManifestBuilder::new().append(spec).build()
    };

    let first = collect(build(), EncodeOptions::default()).await?;
    let second = collect(build(), EncodeOptions::default()).await?;
    assert_eq!(first, second);
    Ok(())
}

#[tokio::test]
async fn dos_timestamps_keep_minute_resolution() -> Result<()> {
    init_logging();

    let ts = Utc.with_ymd_and_hms(2022, 3, 4, 5, 6, 7).unwrap();
    let mut spec = entry("t.bin", SourceSpec::random(8), Method::Store);
    spec.timestamp = Some(ts);
    let manifest = ManifestBuilder::new().append(spec).build();

    let archive = collect(manifest, EncodeOptions::default()).await?;
    let entries = parse_archive(&archive)?;
    let parsed = &entries[0];

    let day = (parsed.dos_date & 0x1F) as u32;
    let month = ((parsed.dos_date >> 5) & 0x0F) as u32;
    let year = ((parsed.dos_date >> 9) & 0x7F) as i32 + 1980;
    let second = ((parsed.dos_time & 0x1F) * 2) as u32;
    let minute = ((parsed.dos_time >> 5) & 0x3F) as u32;
    let hour = ((parsed.dos_time >> 11) & 0x1F) as u32;

    let decoded = Utc
        .with_ymd_and_hms(year, month, day, hour, minute, second)
        .unwrap();
    let drift = (decoded - ts).num_seconds().abs();
    assert!(drift < 60, "dos timestamp drifted {}s", drift);
    Ok(())
}

#[tokio::test]
async fn multi_chunk_entries_account_every_byte() -> Result<()> {
    init_logging();

    // Larger than one source chunk, so the entry spans several steps.
    let manifest = ManifestBuilder::new()
        .append(entry(
            "big.bin",
            SourceSpec::random(300_000),
            Method::Store,
        ))
        .build();

    let mut stream = ZipStream::new(manifest, EncodeOptions::default());
    let mut archive = Vec::new();
    while let Some(chunk) = stream.next_chunk().await {
        archive.extend(chunk?);
        assert_eq!(stream.bytes_emitted(), archive.len() as u64);
    }

    let entries = parse_archive(&archive)?;
    assert_eq!(entries[0].uncompressed_size, 300_000);
    assert_eq!(entries[0].crc32, crc32fast::hash(&entries[0].payload));
    Ok(())
}
