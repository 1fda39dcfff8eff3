//! Bitsets with fast rank
//!
//! `Bitset` is a plain word-array bitset used for plane overflow flags.
//! `RankBitset` layers a two-level rank cache on top: one u32 cumulative
//! popcount per 2048-bit superblock plus one u16 intra-superblock offset per
//! 64-bit word, for O(1) `rank` at roughly 3% space overhead. The cache is
//! built once after the bits are final; the structure is read-only from then
//! on.

/// Number of bits per rank superblock.
const SUPERBLOCK_BITS: usize = 2048;

/// Words per superblock.
const WORDS_PER_SUPERBLOCK: usize = SUPERBLOCK_BITS / 64;

/// Plain fixed-size bitset.
#[derive(Debug, Clone, Default)]
pub struct Bitset {
    words: Vec<u64>,
    len: usize,
}

impl Bitset {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)],
            len,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.len);
        self.words[index >> 6] |= 1u64 << (index & 63);
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        debug_assert!(index < self.len);
        self.words[index >> 6] & (1u64 << (index & 63)) != 0
    }

    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// Popcount over the bit range `[from, to)`.
    pub fn count_range(&self, from: usize, to: usize) -> usize {
        debug_assert!(from <= to && to <= self.len);
        if from == to {
            return 0;
        }
        let first_word = from >> 6;
        let last_word = (to - 1) >> 6;
        // Bits at or above from%64 in the first word.
        let from_mask = !low_mask_exclusive(from & 63);
        // Bits up to and including (to-1)%64 in the last word.
        let last_bit = (to - 1) & 63;
        let to_mask = if last_bit == 63 {
            u64::MAX
        } else {
            low_mask_exclusive(last_bit + 1)
        };
        if first_word == last_word {
            return (self.words[first_word] & from_mask & to_mask).count_ones() as usize;
        }
        let mut count = (self.words[first_word] & from_mask).count_ones() as usize;
        for word in &self.words[first_word + 1..last_word] {
            count += word.count_ones() as usize;
        }
        count += (self.words[last_word] & to_mask).count_ones() as usize;
        count
    }

    #[inline]
    fn word(&self, word_index: usize) -> u64 {
        self.words[word_index]
    }
}

/// Bitset with O(1) rank after a one-time cache build.
#[derive(Debug, Clone, Default)]
pub struct RankBitset {
    bits: Bitset,
    /// Cumulative popcount at the start of each superblock.
    superblocks: Vec<u32>,
    /// Popcount from the superblock start to each word start.
    blocks: Vec<u16>,
    built: bool,
}

impl RankBitset {
    pub fn new(len: usize) -> Self {
        Self {
            bits: Bitset::new(len),
            superblocks: Vec::new(),
            blocks: Vec::new(),
            built: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Set a bit. Must not be called once the rank cache is built.
    #[inline]
    pub fn set(&mut self, index: usize) {
        assert!(!self.built, "RankBitset mutated after rank cache build");
        self.bits.set(index);
    }

    #[inline]
    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index)
    }

    /// Precompute the superblock/block rank cache. Call exactly once, after
    /// the last `set`.
    pub fn build_rank_cache(&mut self) {
        assert!(!self.built, "rank cache already built");
        let num_words = self.bits.words.len();
        self.superblocks = Vec::with_capacity(num_words.div_ceil(WORDS_PER_SUPERBLOCK));
        self.blocks = Vec::with_capacity(num_words);
        let mut total: u32 = 0;
        let mut in_superblock: u16 = 0;
        for (w, &word) in self.bits.words.iter().enumerate() {
            if w % WORDS_PER_SUPERBLOCK == 0 {
                total += in_superblock as u32;
                self.superblocks.push(total);
                in_superblock = 0;
            }
            self.blocks.push(in_superblock);
            in_superblock += word.count_ones() as u16;
        }
        self.built = true;
    }

    /// Number of set bits in `[0, index)`. Requires the cache to be built.
    #[inline]
    pub fn rank(&self, index: usize) -> usize {
        debug_assert!(self.built, "rank called before rank cache build");
        debug_assert!(index <= self.bits.len());
        if index == 0 {
            return 0;
        }
        let word_index = index >> 6;
        // A rank exactly at the end of the bitset may land on a word index
        // one past the cache; fold it into the preceding word.
        if word_index == self.blocks.len() {
            let prev = word_index - 1;
            return self.superblocks[prev / WORDS_PER_SUPERBLOCK] as usize
                + self.blocks[prev] as usize
                + self.bits.word(prev).count_ones() as usize;
        }
        let superblock = self.superblocks[word_index / WORDS_PER_SUPERBLOCK] as usize;
        let block = self.blocks[word_index] as usize;
        let in_word = (self.bits.word(word_index) & low_mask_exclusive(index & 63)).count_ones();
        superblock + block + in_word as usize
    }
}

/// Low-bit mask where `n == 0` genuinely means zero bits.
#[inline]
fn low_mask_exclusive(n: usize) -> u64 {
    (1u64 << n) - 1
}
