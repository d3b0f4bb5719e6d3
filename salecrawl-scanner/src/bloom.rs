//! File-backed Bloom filter used to remember which URLs a crawl has already
//! scheduled.
//!
//! The filter is sized from an expected capacity `n` and a target
//! false-positive rate `p`:
//!
//! - bits:   `m = ceil(-n * ln(p) / ln(2)^2)`
//! - hashes: `k = round(m / n * ln(2))`, at least one
//!
//! Bit positions come from double hashing two seeded 64-bit mixes,
//! `h1 + i * h2 (mod m)`. Membership never yields a false negative; it may
//! report an unseen URL as seen with roughly probability `p` once the filter
//! holds `n` items.
//!
//! On disk the state is a small little-endian header followed by the bit words:
//!
//! ```text
//! "SCBF" | version u8 | k u32 | m u64 | items u64 | capacity u64 | p f64 | words[u64]
//! ```

use crate::error::{Result, ScanError};
use std::f64::consts::LN_2;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const MAGIC: &[u8; 4] = b"SCBF";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 4 + 1 + 4 + 8 + 8 + 8 + 8;

const BLOOM_HASH_SEEDS: [u64; 2] = [0x517c_c1b7_2722_0a95, 0x9e37_79b1_85eb_ca87];

/// What to do with a filter file that already exists for the handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FilterMode {
    /// Discard any previous state and start empty.
    #[default]
    Fresh,
    /// Load previous state so URLs seen by earlier runs stay excluded.
    Reuse,
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub capacity: usize,
    pub false_positive_rate: f64,
    pub path: PathBuf,
    pub mode: FilterMode,
}

pub struct MembershipFilter {
    words: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    items: u64,
    capacity: u64,
    false_positive_rate: f64,
    path: Option<PathBuf>,
}

impl MembershipFilter {
    /// In-memory filter with no backing file.
    pub fn with_capacity(capacity: usize, false_positive_rate: f64) -> Result<Self> {
        let (num_bits, num_hashes) = optimal_parameters(capacity, false_positive_rate)?;
        Ok(Self {
            words: vec![0u64; num_bits.div_ceil(64) as usize],
            num_bits,
            num_hashes,
            items: 0,
            capacity: capacity as u64,
            false_positive_rate,
            path: None,
        })
    }

    /// Create or open the filter described by `config`.
    pub fn open(config: &FilterConfig) -> Result<Self> {
        let mut filter = Self::with_capacity(config.capacity, config.false_positive_rate)?;
        let path = config.path.clone();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        match config.mode {
            FilterMode::Fresh => {
                if path.exists() {
                    debug!("Discarding previous filter state at {}", path.display());
                    fs::remove_file(&path)?;
                }
            }
            FilterMode::Reuse => {
                if path.exists() {
                    let loaded = Self::load(&path)?;
                    if loaded.num_bits != filter.num_bits || loaded.num_hashes != filter.num_hashes
                    {
                        return Err(ScanError::Filter(format!(
                            "{} was sized for {} bits / {} hashes, expected {} / {}",
                            path.display(),
                            loaded.num_bits,
                            loaded.num_hashes,
                            filter.num_bits,
                            filter.num_hashes
                        )));
                    }
                    info!(
                        "Reusing filter state at {} ({} items)",
                        path.display(),
                        loaded.items
                    );
                    filter = loaded;
                }
            }
        }

        filter.path = Some(path);
        Ok(filter)
    }

    /// Read a persisted filter.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let corrupt = |what: &str| ScanError::Filter(format!("{}: {}", path.display(), what));

        if bytes.len() < HEADER_LEN || &bytes[0..4] != MAGIC {
            return Err(corrupt("not a filter file"));
        }
        if bytes[4] != FORMAT_VERSION {
            return Err(corrupt("unsupported format version"));
        }

        let num_hashes = u32::from_le_bytes(read_array(&bytes, 5));
        let num_bits = u64::from_le_bytes(read_array(&bytes, 9));
        let items = u64::from_le_bytes(read_array(&bytes, 17));
        let capacity = u64::from_le_bytes(read_array(&bytes, 25));
        let false_positive_rate = f64::from_le_bytes(read_array(&bytes, 33));

        let word_count = num_bits.div_ceil(64) as usize;
        let body = &bytes[HEADER_LEN..];
        if num_bits == 0 || num_hashes == 0 || body.len() != word_count * 8 {
            return Err(corrupt("truncated bit array"));
        }

        let words = body
            .chunks_exact(8)
            .map(|chunk| u64::from_le_bytes(read_array(chunk, 0)))
            .collect();

        Ok(Self {
            words,
            num_bits,
            num_hashes,
            items,
            capacity,
            false_positive_rate,
            path: Some(path.to_path_buf()),
        })
    }

    /// Delete the persisted state at `path`, if any.
    pub fn delete(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Mark `item` as seen. Returns `false` when every bit was already set,
    /// i.e. the item was (probably) present before.
    pub fn insert(&mut self, item: &str) -> bool {
        let mut inserted = false;
        for idx in bit_indexes(item.as_bytes(), self.num_bits, self.num_hashes) {
            let word = (idx / 64) as usize;
            let mask = 1u64 << (idx % 64);
            if self.words[word] & mask == 0 {
                inserted = true;
                self.words[word] |= mask;
            }
        }
        if inserted {
            self.items += 1;
        }
        inserted
    }

    pub fn add_all<I, S>(&mut self, items: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in items {
            self.insert(item.as_ref());
        }
    }

    pub fn contains(&self, item: &str) -> bool {
        bit_indexes(item.as_bytes(), self.num_bits, self.num_hashes).all(|idx| {
            let word = (idx / 64) as usize;
            self.words[word] & (1u64 << (idx % 64)) != 0
        })
    }

    /// Approximate number of distinct items added.
    pub fn len(&self) -> u64 {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn false_positive_rate(&self) -> f64 {
        self.false_positive_rate
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Expected false-positive rate at the current fill level.
    pub fn estimated_fp_rate(&self) -> f64 {
        let k = self.num_hashes as f64;
        let fill = 1.0 - (-k * self.items as f64 / self.num_bits as f64).exp();
        fill.powf(k)
    }

    /// Write the current state to the backing file. No-op for in-memory filters.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + self.words.len() * 8);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        buf.extend_from_slice(&self.num_hashes.to_le_bytes());
        buf.extend_from_slice(&self.num_bits.to_le_bytes());
        buf.extend_from_slice(&self.items.to_le_bytes());
        buf.extend_from_slice(&self.capacity.to_le_bytes());
        buf.extend_from_slice(&self.false_positive_rate.to_le_bytes());
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }

        // Write next to the target and rename so a crash never leaves a torn file.
        let tmp = path.with_extension("bloom.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        debug!("Flushed filter ({} items) to {}", self.items, path.display());
        Ok(())
    }

    /// Flush and release the filter.
    pub fn close(self) -> Result<()> {
        self.flush()
    }
}

/// Double-hashed bit positions `h1 + i * h2 (mod m)` for `i in 0..k`.
fn bit_indexes(data: &[u8], num_bits: u64, num_hashes: u32) -> impl Iterator<Item = u64> + use<> {
    let h1 = bloom_hash(data, BLOOM_HASH_SEEDS[0]);
    let h2 = bloom_hash(data, BLOOM_HASH_SEEDS[1]) | 1;
    (0..num_hashes as u64).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % num_bits)
}

fn optimal_parameters(capacity: usize, false_positive_rate: f64) -> Result<(u64, u32)> {
    if capacity == 0 {
        return Err(ScanError::Filter("capacity must be positive".to_string()));
    }
    if !(false_positive_rate > 0.0 && false_positive_rate < 1.0) {
        return Err(ScanError::Filter(format!(
            "false positive rate must be in (0, 1), got {}",
            false_positive_rate
        )));
    }

    let n = capacity as f64;
    let bits = (-n * false_positive_rate.ln() / (LN_2 * LN_2)).ceil().max(64.0);
    let hashes = ((bits / n) * LN_2).round().max(1.0);
    Ok((bits as u64, hashes as u32))
}

fn bloom_hash(data: &[u8], seed: u64) -> u64 {
    let mut hash = seed ^ data.len() as u64;
    for &byte in data {
        hash ^= (byte as u64).wrapping_mul(0x1000_0000_01b3);
        hash = hash.rotate_left(13).wrapping_mul(0xff51_afd7_ed55_8ccd);
    }
    // murmur3 fmix64 so trailing bytes reach the low bits
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xff51_afd7_ed55_8ccd);
    hash ^= hash >> 33;
    hash = hash.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    hash ^ (hash >> 33)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}
