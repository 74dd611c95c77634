use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::{eof, DecodeError};
use crate::cache::Cachable;
use crate::CoordVec;

const CHUNK_ID_ENCODER_VERSION: u8 = 1;

/// Length of a chunk name: the fixed-width base-36 form of a 128-bit id.
pub const CHUNK_NAME_LEN: usize = 25;

const CHUNK_NAME_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Textual name of a chunk id. Pure; filesystem-safe; zero-padded so all
/// names have the same width.
pub fn name_from_id(id: u128) -> String {
    let mut buf = [CHUNK_NAME_ALPHABET[0]; CHUNK_NAME_LEN];
    let mut v = id;
    let mut i = CHUNK_NAME_LEN;
    while v > 0 {
        i -= 1;
        buf[i] = CHUNK_NAME_ALPHABET[(v % 36) as usize];
        v /= 36;
    }
    String::from_utf8(buf.to_vec()).expect("alphabet is ascii")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkIdRow {
    id: u128,
    /// Global index of the last sample covered by this chunk; -1 while a
    /// freshly generated chunk holds none.
    last_index: i64,
    /// Continuation of the previous row's final sample.
    connected: bool,
}

/// Maps global sample index → the chunk id(s) holding that sample.
///
/// Rows are ordered by `last_index`, which strictly increases except on
/// `connected` continuation rows, so a binary search finds the chunk
/// holding any sample's head.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkIdEncoder {
    rows: Vec<ChunkIdRow>,
}

impl ChunkIdEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_chunks(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn num_samples(&self) -> u64 {
        self.rows
            .last()
            .map(|r| (r.last_index + 1) as u64)
            .unwrap_or(0)
    }

    /// Open a new chunk. It initially covers no samples.
    pub fn generate_chunk_id(&mut self) -> u128 {
        let id = rand::random::<u128>();
        self.rows.push(ChunkIdRow {
            id,
            last_index: self.num_samples() as i64 - 1,
            connected: false,
        });
        id
    }

    /// Count `n` more samples against the most recently generated chunk.
    pub fn register_samples_to_last_chunk_id(&mut self, n: u64) {
        let row = self.rows.last_mut().expect("no chunk ids generated yet");
        row.last_index += n as i64;
    }

    /// Mark the most recent chunk as continuing the previous chunk's final
    /// sample.
    pub fn register_connection_to_last_chunk_id(&mut self) {
        let row = self.rows.last_mut().expect("no chunk ids generated yet");
        row.connected = true;
    }

    /// Name of the chunk in row `i`; negative indices count from the end.
    pub fn get_name_for_chunk(&self, i: isize) -> Option<String> {
        let idx = if i < 0 {
            self.rows.len().checked_sub(i.unsigned_abs())?
        } else {
            i as usize
        };
        self.rows.get(idx).map(|r| name_from_id(r.id))
    }

    /// Ordered ids of the chunks a sample lives in: the head chunk, then
    /// any connected continuations.
    pub fn chunk_ids(&self, g: u64) -> Option<CoordVec<u128>> {
        let mut j = self.head_row(g)?;
        let mut ids: CoordVec<u128> = CoordVec::new();
        ids.push(self.rows[j].id);
        while j + 1 < self.rows.len()
            && self.rows[j + 1].connected
            && self.rows[j].last_index == g as i64
        {
            j += 1;
            ids.push(self.rows[j].id);
        }
        Some(ids)
    }

    /// Offset of the sample within its head chunk.
    pub fn get_local_sample_index(&self, g: u64) -> Option<u64> {
        let row = self.head_row(g)?;
        let first = if row == 0 {
            0
        } else {
            self.rows[row - 1].last_index + 1
        };
        Some((g as i64 - first) as u64)
    }

    fn head_row(&self, g: u64) -> Option<usize> {
        if g >= self.num_samples() {
            return None;
        }
        Some(self.rows.partition_point(|r| r.last_index < g as i64))
    }
}

impl Cachable for ChunkIdEncoder {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.nbytes());
        buf.push(CHUNK_ID_ENCODER_VERSION);
        buf.write_u32::<LittleEndian>(self.rows.len() as u32)
            .expect("write to vec");
        for row in &self.rows {
            buf.write_u128::<LittleEndian>(row.id).expect("write to vec");
            buf.write_i64::<LittleEndian>(row.last_index)
                .expect("write to vec");
            buf.push(row.connected as u8);
        }
        buf
    }

    fn from_bytes(mut bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = &mut bytes;
        let version = r.read_u8().map_err(eof)?;
        if version != CHUNK_ID_ENCODER_VERSION {
            return Err(DecodeError::Version(version));
        }
        let num_rows = r.read_u32::<LittleEndian>().map_err(eof)? as usize;
        let mut rows = Vec::with_capacity(num_rows);
        for _ in 0..num_rows {
            rows.push(ChunkIdRow {
                id: r.read_u128::<LittleEndian>().map_err(eof)?,
                last_index: r.read_i64::<LittleEndian>().map_err(eof)?,
                connected: r.read_u8().map_err(eof)? != 0,
            });
        }
        Ok(Self { rows })
    }

    fn nbytes(&self) -> usize {
        // version byte, row count, then 16 + 8 + 1 bytes per row
        1 + 4 + self.rows.len() * 25
    }
}
