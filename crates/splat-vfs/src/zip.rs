use std::io::Read;

use crate::{ReadSource, VfsError};

const EOCD_SIG: u32 = 0x0605_4b50;
const CDR_SIG: u32 = 0x0201_4b50;
const LOCAL_SIG: u32 = 0x0403_4b50;

const EOCD_MIN_LEN: usize = 22;
const LOCAL_HEADER_LEN: u64 = 30;
const METHOD_STORE: u16 = 0;
const METHOD_DEFLATE: u16 = 8;

fn le_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn le_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[derive(Debug, Clone)]
struct ZipEntry {
    name: String,
    method: u16,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
}

/// Central-directory view of a zip archive over any seekable [`ReadSource`].
///
/// Handles stored and deflated entries; Zip64 is rejected.
pub struct ZipArchive {
    source: ReadSource,
    entries: Vec<ZipEntry>,
}

impl ZipArchive {
    pub async fn open(source: ReadSource) -> Result<Self, VfsError> {
        let size = source.size().ok_or(VfsError::ZipBadMagic)?;
        if size < EOCD_MIN_LEN as u64 {
            return Err(VfsError::ZipBadMagic);
        }

        // The EOCD sits in the last 64 KiB + 22 bytes (comment can pad it).
        let tail_len = size.min(64 * 1024 + EOCD_MIN_LEN as u64);
        let mut stream = source.read(Some(size - tail_len..size)).await?;
        let tail = stream.read_all().await?;

        let eocd = (0..=tail.len() - EOCD_MIN_LEN)
            .rev()
            .find(|&i| le_u32(&tail, i) == EOCD_SIG)
            .ok_or(VfsError::ZipBadMagic)?;
        let eocd = &tail[eocd..];

        let num_entries = le_u16(eocd, 10);
        let cd_size = le_u32(eocd, 12);
        let cd_offset = le_u32(eocd, 16);
        if num_entries == 0xffff || cd_size == 0xffff_ffff || cd_offset == 0xffff_ffff {
            return Err(VfsError::Zip64Unsupported);
        }

        let mut stream = source
            .read(Some(cd_offset as u64..cd_offset as u64 + cd_size as u64))
            .await?;
        let directory = stream.read_all().await?;

        let mut entries = Vec::with_capacity(num_entries as usize);
        let mut pos = 0usize;
        for _ in 0..num_entries {
            if pos + 46 > directory.len() || le_u32(&directory, pos) != CDR_SIG {
                return Err(VfsError::ZipBadMagic);
            }
            let method = le_u16(&directory, pos + 10);
            let compressed_size = le_u32(&directory, pos + 20);
            let uncompressed_size = le_u32(&directory, pos + 24);
            let name_len = le_u16(&directory, pos + 28) as usize;
            let extra_len = le_u16(&directory, pos + 30) as usize;
            let comment_len = le_u16(&directory, pos + 32) as usize;
            let local_header_offset = le_u32(&directory, pos + 42);

            if compressed_size == 0xffff_ffff
                || uncompressed_size == 0xffff_ffff
                || local_header_offset == 0xffff_ffff
            {
                return Err(VfsError::Zip64Unsupported);
            }

            let name =
                String::from_utf8_lossy(&directory[pos + 46..pos + 46 + name_len]).into_owned();
            entries.push(ZipEntry {
                name,
                method,
                compressed_size: compressed_size as u64,
                uncompressed_size: uncompressed_size as u64,
                local_header_offset: local_header_offset as u64,
            });
            pos += 46 + name_len + extra_len + comment_len;
        }

        Ok(Self { source, entries })
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// Reads and (if deflated) inflates one entry into memory.
    pub async fn read_entry(&self, name: &str) -> Result<Vec<u8>, VfsError> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| VfsError::NotFound(name.to_owned()))?;

        // The central directory sizes are authoritative; the local header is
        // only consulted for the variable-length name/extra fields.
        let mut stream = self
            .source
            .read(Some(
                entry.local_header_offset..entry.local_header_offset + LOCAL_HEADER_LEN,
            ))
            .await?;
        let header = stream.read_all().await?;
        if header.len() < LOCAL_HEADER_LEN as usize || le_u32(&header, 0) != LOCAL_SIG {
            return Err(VfsError::ZipCorruptEntry(name.to_owned()));
        }
        let name_len = le_u16(&header, 26) as u64;
        let extra_len = le_u16(&header, 28) as u64;

        let data_start = entry.local_header_offset + LOCAL_HEADER_LEN + name_len + extra_len;
        let mut stream = self
            .source
            .read(Some(data_start..data_start + entry.compressed_size))
            .await?;
        let compressed = stream.read_all().await?;
        if compressed.len() as u64 != entry.compressed_size {
            return Err(VfsError::ZipCorruptEntry(name.to_owned()));
        }

        match entry.method {
            METHOD_STORE => Ok(compressed),
            METHOD_DEFLATE => {
                let mut inflated = Vec::with_capacity(entry.uncompressed_size as usize);
                flate2::read::DeflateDecoder::new(compressed.as_slice())
                    .read_to_end(&mut inflated)
                    .map_err(|_| VfsError::ZipCorruptEntry(name.to_owned()))?;
                if inflated.len() as u64 != entry.uncompressed_size {
                    return Err(VfsError::ZipCorruptEntry(name.to_owned()));
                }
                Ok(inflated)
            }
            other => Err(VfsError::ZipMethod(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A one-entry stored archive: "test.txt" containing "hello world".
    const TEST_ZIP: &[u8] = &[
        0x50, 0x4b, 0x03, 0x04, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x5d,
        0x41, 0x52, 0x5a, 0x0b, 0x00, 0x00, 0x00, 0x0b, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00,
        0x74, 0x65, 0x73, 0x74, 0x2e, 0x74, 0x78, 0x74, 0x68, 0x65, 0x6c, 0x6c, 0x6f, 0x20, 0x77,
        0x6f, 0x72, 0x6c, 0x64, 0x50, 0x4b, 0x01, 0x02, 0x14, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00, 0x00, 0x5d, 0x41, 0x52, 0x5a, 0x0b, 0x00, 0x00, 0x00, 0x0b, 0x00,
        0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80,
        0x01, 0x00, 0x00, 0x00, 0x00, 0x74, 0x65, 0x73, 0x74, 0x2e, 0x74, 0x78, 0x74, 0x50, 0x4b,
        0x05, 0x06, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x36, 0x00, 0x00, 0x00, 0x31,
        0x00, 0x00, 0x00, 0x00, 0x00,
    ];

    #[tokio::test]
    async fn stored_entry_roundtrip() {
        let source = ReadSource::from_bytes("test.zip", TEST_ZIP.to_vec());
        let archive = ZipArchive::open(source).await.unwrap();

        assert_eq!(archive.entry_names().collect::<Vec<_>>(), ["test.txt"]);
        assert!(archive.contains("test.txt"));

        let bytes = archive.read_entry("test.txt").await.unwrap();
        assert_eq!(bytes, b"hello world");

        assert!(matches!(
            archive.read_entry("missing.txt").await,
            Err(VfsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let source = ReadSource::from_bytes("bad.zip", vec![0u8; 100]);
        assert!(matches!(
            ZipArchive::open(source).await,
            Err(VfsError::ZipBadMagic)
        ));
    }
}
