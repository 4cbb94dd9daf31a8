use super::Pattern;
use crate::{DriveError, DriveResult};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// Random passes are derived independently per block of this size, so any
/// byte range can be regenerated without replaying the stream from offset zero.
pub const RANDOM_BLOCK_SIZE: u64 = 64 * 1024;

/// Produces the exact bytes a pass writes at any offset.
///
/// The same filler is used for writing and for read-back verification, and a
/// complement pass wraps the filler of the pass before it.
#[derive(Clone)]
pub struct PatternFiller {
    source: Source,
}

#[derive(Clone)]
enum Source {
    Constant(u8),
    Repeating(Vec<u8>),
    Random { seed: [u8; 32] },
    Complement(Box<PatternFiller>),
    Hardware,
}

impl std::fmt::Debug for PatternFiller {
    // Never print the pass seed
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            Source::Constant(b) => format!("Constant(0x{:02X})", b),
            Source::Repeating(p) => format!("Repeating({} bytes)", p.len()),
            Source::Random { .. } => "Random".to_string(),
            Source::Complement(_) => "Complement".to_string(),
            Source::Hardware => "Hardware".to_string(),
        };
        f.debug_struct("PatternFiller").field("source", &kind).finish()
    }
}

impl PatternFiller {
    /// Build the filler for one pass.
    ///
    /// `previous` is the filler of the pass immediately before; it is required
    /// for [`Pattern::Complement`].
    pub fn for_pass(
        pattern: &Pattern,
        previous: Option<&PatternFiller>,
        rng: &SystemRandom,
    ) -> DriveResult<Self> {
        let source = match pattern {
            Pattern::Zero => Source::Constant(0x00),
            Pattern::One => Source::Constant(0xFF),
            Pattern::Fixed(bytes) if bytes.is_empty() => {
                return Err(DriveError::InvalidMethod(
                    "fixed pattern must not be empty".to_string(),
                ))
            }
            Pattern::Fixed(bytes) if bytes.iter().all(|&b| b == bytes[0]) => {
                Source::Constant(bytes[0])
            }
            Pattern::Fixed(bytes) => Source::Repeating(bytes.clone()),
            Pattern::Random => {
                let mut seed = [0u8; 32];
                rng.fill(&mut seed).map_err(|_| {
                    DriveError::IoError(std::io::Error::other("system RNG unavailable"))
                })?;
                Source::Random { seed }
            }
            Pattern::Complement => {
                let previous = previous.ok_or_else(|| {
                    DriveError::InvalidMethod(
                        "complement pass has no previous pass".to_string(),
                    )
                })?;
                if previous.is_hardware() {
                    return Err(DriveError::InvalidMethod(
                        "cannot complement a hardware erase pass".to_string(),
                    ));
                }
                Source::Complement(Box::new(previous.clone()))
            }
            Pattern::Hardware => Source::Hardware,
        };

        Ok(Self { source })
    }

    /// Filler with a caller-chosen seed for random passes
    pub fn random_with_seed(seed: [u8; 32]) -> Self {
        Self {
            source: Source::Random { seed },
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self.source, Source::Hardware)
    }

    /// Write the pass content for `[offset, offset + buf.len())` into `buf`
    pub fn fill(&self, offset: u64, buf: &mut [u8]) {
        match &self.source {
            Source::Constant(byte) => buf.fill(*byte),
            Source::Repeating(pattern) => {
                let len = pattern.len() as u64;
                let mut phase = (offset % len) as usize;
                for b in buf.iter_mut() {
                    *b = pattern[phase];
                    phase += 1;
                    if phase == pattern.len() {
                        phase = 0;
                    }
                }
            }
            Source::Random { seed } => Self::fill_random(seed, offset, buf),
            Source::Complement(previous) => {
                previous.fill(offset, buf);
                for b in buf.iter_mut() {
                    *b = !*b;
                }
            }
            // Content after a native erase is vendor-defined
            Source::Hardware => {}
        }
    }

    /// Compare `actual` against what the pass wrote at `offset`.
    /// Returns the index of the first differing byte.
    pub fn first_mismatch(&self, offset: u64, actual: &[u8]) -> Option<usize> {
        if let Source::Constant(byte) = self.source {
            return actual.iter().position(|&b| b != byte);
        }

        let mut expected = vec![0u8; actual.len()];
        self.fill(offset, &mut expected);
        expected
            .iter()
            .zip(actual.iter())
            .position(|(e, a)| e != a)
    }

    fn fill_random(seed: &[u8; 32], offset: u64, buf: &mut [u8]) {
        let mut pos = offset;
        let mut written = 0usize;
        let mut scratch = Vec::new();

        while written < buf.len() {
            let block = pos / RANDOM_BLOCK_SIZE;
            let in_block = (pos % RANDOM_BLOCK_SIZE) as usize;
            let take = ((RANDOM_BLOCK_SIZE as usize) - in_block).min(buf.len() - written);

            let mut rng = StdRng::from_seed(Self::block_key(seed, block));
            let out = &mut buf[written..written + take];
            if in_block == 0 {
                rng.fill_bytes(out);
            } else {
                // Generate from the block start and keep the tail
                scratch.resize(in_block + take, 0);
                rng.fill_bytes(&mut scratch);
                out.copy_from_slice(&scratch[in_block..]);
            }

            written += take;
            pos += take as u64;
        }
    }

    fn block_key(seed: &[u8; 32], block: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(block.to_le_bytes());
        hasher.finalize().into()
    }
}
