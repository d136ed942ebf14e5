//! Synthetic EWF v1 segment files for tests

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use md5::{Digest, Md5};

use super::checksum::adler32;

pub const TEST_BYTES_PER_SECTOR: u32 = 512;
pub const TEST_SECTORS_PER_CHUNK: u32 = 64;
pub const TEST_CHUNK_SIZE: u32 = TEST_BYTES_PER_SECTOR * TEST_SECTORS_PER_CHUNK;

const SIGNATURE: &[u8; 8] = b"EVF\x09\x0d\x0a\xff\x00";
const DESCRIPTOR_SIZE: usize = 76;
const VOLUME_DATA_SIZE: usize = 1052;

/// A written image plus the media bytes it should decode to
pub struct TestImage {
    pub paths: Vec<PathBuf>,
    pub media: Vec<u8>,
    pub number_of_sectors: u64,
}

impl TestImage {
    pub fn chunk(&self, chunk_index: u64) -> &[u8] {
        let start = (chunk_index * TEST_CHUNK_SIZE as u64) as usize;
        let end = (start + TEST_CHUNK_SIZE as usize).min(self.media.len());
        &self.media[start..end]
    }
}

pub struct ImageBuilder {
    number_of_chunks: u64,
    number_of_sectors: Option<u64>,
    chunks_per_segment: u64,
    compress_every: Option<u64>,
    corrupt_checksums: Vec<u64>,
    corrupt_streams: Vec<u64>,
    corrupt_table_entries: bool,
    declared_extra_chunks: u32,
    base_name: String,
}

impl ImageBuilder {
    pub fn new(number_of_chunks: u64) -> Self {
        Self {
            number_of_chunks,
            number_of_sectors: None,
            chunks_per_segment: u64::MAX,
            compress_every: None,
            corrupt_checksums: Vec::new(),
            corrupt_streams: Vec::new(),
            corrupt_table_entries: false,
            declared_extra_chunks: 0,
            base_name: "image".to_string(),
        }
    }

    /// Total sector count; the last chunk is short when it is not a multiple
    /// of the sectors per chunk
    pub fn sectors(mut self, number_of_sectors: u64) -> Self {
        self.number_of_sectors = Some(number_of_sectors);
        self
    }

    pub fn chunks_per_segment(mut self, chunks: u64) -> Self {
        self.chunks_per_segment = chunks.max(1);
        self
    }

    /// Store every `n`th chunk (starting with chunk 0) zlib-compressed
    pub fn compress_every(mut self, n: u64) -> Self {
        self.compress_every = Some(n.max(1));
        self
    }

    /// Flip the stored Adler-32 of a chunk: the trailing checksum of an
    /// uncompressed chunk or the zlib trailer of a compressed one
    pub fn corrupt_checksum(mut self, chunk_index: u64) -> Self {
        self.corrupt_checksums.push(chunk_index);
        self
    }

    /// Replace a compressed chunk with an invalid zlib stream
    pub fn corrupt_stream(mut self, chunk_index: u64) -> Self {
        self.corrupt_streams.push(chunk_index);
        self
    }

    /// Damage the entries checksum of every primary table (table2 stays intact)
    pub fn corrupt_table_entries(mut self) -> Self {
        self.corrupt_table_entries = true;
        self
    }

    /// Announce more chunks in the volume section than the tables store
    pub fn declare_extra_chunks(mut self, extra: u32) -> Self {
        self.declared_extra_chunks = extra;
        self
    }

    pub fn base_name(mut self, name: &str) -> Self {
        self.base_name = name.to_string();
        self
    }

    fn is_compressed(&self, chunk_index: u64) -> bool {
        self.corrupt_streams.contains(&chunk_index)
            || self.compress_every.is_some_and(|n| chunk_index % n == 0)
    }

    pub fn build(&self, dir: &Path) -> io::Result<TestImage> {
        let stored_sectors = self
            .number_of_sectors
            .unwrap_or(self.number_of_chunks * TEST_SECTORS_PER_CHUNK as u64);
        let media_size = (stored_sectors * TEST_BYTES_PER_SECTOR as u64) as usize;
        let media: Vec<u8> = (0..media_size)
            .map(|offset| {
                let chunk = (offset / TEST_CHUNK_SIZE as usize) as u8;
                chunk.wrapping_mul(37) ^ (offset % 251) as u8
            })
            .collect();

        let declared_chunks = self.number_of_chunks + self.declared_extra_chunks as u64;
        let declared_sectors = stored_sectors + self.declared_extra_chunks as u64 * TEST_SECTORS_PER_CHUNK as u64;
        let media_hash = Md5::digest(&media);

        let mut paths = Vec::new();
        let mut chunk_index = 0u64;
        let mut segment_number = 1u16;

        while chunk_index < self.number_of_chunks || segment_number == 1 {
            let last_chunk = self.number_of_chunks.min(chunk_index.saturating_add(self.chunks_per_segment));
            let is_last_segment = last_chunk >= self.number_of_chunks;

            let mut file = Vec::new();
            file.extend_from_slice(SIGNATURE);
            file.push(1);
            file.extend_from_slice(&segment_number.to_le_bytes());
            file.extend_from_slice(&0u16.to_le_bytes());

            if segment_number == 1 {
                let mut volume = vec![0u8; VOLUME_DATA_SIZE];
                volume[0] = 1;
                volume[4..8].copy_from_slice(&(declared_chunks as u32).to_le_bytes());
                volume[8..12].copy_from_slice(&TEST_SECTORS_PER_CHUNK.to_le_bytes());
                volume[12..16].copy_from_slice(&TEST_BYTES_PER_SECTOR.to_le_bytes());
                volume[16..24].copy_from_slice(&declared_sectors.to_le_bytes());
                let checksum = adler32(&volume[..VOLUME_DATA_SIZE - 4]);
                volume[VOLUME_DATA_SIZE - 4..].copy_from_slice(&checksum.to_le_bytes());
                push_section(&mut file, "volume", &volume);
            }

            // Sectors section: stored chunks back to back
            let sectors_start = file.len();
            let mut sectors = Vec::new();
            let mut entries = Vec::new();
            for index in chunk_index..last_chunk {
                let start = (index * TEST_CHUNK_SIZE as u64) as usize;
                let end = (start + TEST_CHUNK_SIZE as usize).min(media.len());
                let chunk = &media[start..end];
                let offset = (sectors_start + DESCRIPTOR_SIZE + sectors.len()) as u32;

                if self.is_compressed(index) {
                    entries.push(offset | 0x8000_0000);
                    if self.corrupt_streams.contains(&index) {
                        sectors.extend_from_slice(&[0x78, 0x9c, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00]);
                    } else {
                        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
                        encoder.write_all(chunk)?;
                        let mut compressed = encoder.finish()?;
                        if self.corrupt_checksums.contains(&index) {
                            if let Some(last) = compressed.last_mut() {
                                *last ^= 0xff;
                            }
                        }
                        sectors.extend_from_slice(&compressed);
                    }
                } else {
                    entries.push(offset);
                    let mut checksum = adler32(chunk);
                    if self.corrupt_checksums.contains(&index) {
                        checksum ^= 0xdead_beef;
                    }
                    sectors.extend_from_slice(chunk);
                    sectors.extend_from_slice(&checksum.to_le_bytes());
                }
            }
            push_section(&mut file, "sectors", &sectors);

            if !entries.is_empty() {
                let table = table_data(&entries, false);
                let primary = table_data(&entries, self.corrupt_table_entries);
                push_section(&mut file, "table", &primary);
                push_section(&mut file, "table2", &table);
            }

            if is_last_segment {
                let mut hash = vec![0u8; 36];
                hash[..16].copy_from_slice(&media_hash);
                let checksum = adler32(&hash[..32]);
                hash[32..].copy_from_slice(&checksum.to_le_bytes());
                push_section(&mut file, "hash", &hash);
                push_terminator(&mut file, "done");
            } else {
                push_terminator(&mut file, "next");
            }

            let path = dir.join(format!("{}.E{:02}", self.base_name, segment_number));
            std::fs::write(&path, &file)?;
            paths.push(path);

            chunk_index = last_chunk;
            segment_number += 1;
            if is_last_segment {
                break;
            }
        }

        Ok(TestImage { paths, media, number_of_sectors: declared_sectors })
    }
}

fn table_data(entries: &[u32], corrupt_footer: bool) -> Vec<u8> {
    let mut data = vec![0u8; 24];
    data[0..4].copy_from_slice(&(entries.len() as u32).to_le_bytes());
    let checksum = adler32(&data[..20]);
    data[20..24].copy_from_slice(&checksum.to_le_bytes());

    let start = data.len();
    for entry in entries {
        data.extend_from_slice(&entry.to_le_bytes());
    }
    let mut footer = adler32(&data[start..]);
    if corrupt_footer {
        footer ^= 1;
    }
    data.extend_from_slice(&footer.to_le_bytes());
    data
}

fn descriptor(type_name: &str, next_offset: u64, size: u64) -> [u8; DESCRIPTOR_SIZE] {
    let mut descriptor = [0u8; DESCRIPTOR_SIZE];
    descriptor[..type_name.len()].copy_from_slice(type_name.as_bytes());
    descriptor[16..24].copy_from_slice(&next_offset.to_le_bytes());
    descriptor[24..32].copy_from_slice(&size.to_le_bytes());
    let checksum = adler32(&descriptor[..72]);
    descriptor[72..76].copy_from_slice(&checksum.to_le_bytes());
    descriptor
}

fn push_section(file: &mut Vec<u8>, type_name: &str, data: &[u8]) {
    let size = (DESCRIPTOR_SIZE + data.len()) as u64;
    let next_offset = file.len() as u64 + size;
    file.extend_from_slice(&descriptor(type_name, next_offset, size));
    file.extend_from_slice(data);
}

fn push_terminator(file: &mut Vec<u8>, type_name: &str) {
    let offset = file.len() as u64;
    file.extend_from_slice(&descriptor(type_name, offset, 0));
}
