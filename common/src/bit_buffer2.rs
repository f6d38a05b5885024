//! Bit-packed 2-D boolean mask.
//!
//! Rows are padded to a whole number of 64-bit words so that row-wise
//! operations (dilation, OR of two masks) work on aligned words.

/// Number of bits per storage word.
const BITS_PER_WORD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer2 {
    words: Vec<u64>,
    width: usize,
    height: usize,
    words_per_row: usize,
}

impl BitBuffer2 {
    pub fn new_filled(width: usize, height: usize, value: bool) -> Self {
        let words_per_row = width.div_ceil(BITS_PER_WORD);
        let mut buf = Self {
            words: vec![0; words_per_row * height],
            width,
            height,
            words_per_row,
        };
        buf.fill(value);
        buf
    }

    #[inline]
    pub fn new_default(width: usize, height: usize) -> Self {
        Self::new_filled(width, height, false)
    }

    /// Build from a row-major predicate.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut buf = Self::new_default(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    buf.set_xy(x, y, true);
                }
            }
        }
        buf
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of addressable bits (width * height).
    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn words_per_row(&self) -> usize {
        self.words_per_row
    }

    #[inline]
    pub fn get_xy(&self, x: usize, y: usize) -> bool {
        debug_assert!(x < self.width && y < self.height);
        let word = self.words[y * self.words_per_row + x / BITS_PER_WORD];
        (word >> (x % BITS_PER_WORD)) & 1 != 0
    }

    #[inline]
    pub fn set_xy(&mut self, x: usize, y: usize, value: bool) {
        debug_assert!(x < self.width && y < self.height);
        let word = &mut self.words[y * self.words_per_row + x / BITS_PER_WORD];
        let bit = 1u64 << (x % BITS_PER_WORD);
        if value {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    /// Set every bit; padding bits past `width` stay clear.
    pub fn fill(&mut self, value: bool) {
        if !value {
            self.words.fill(0);
            return;
        }
        let tail_bits = self.width % BITS_PER_WORD;
        for row in self.words.chunks_exact_mut(self.words_per_row.max(1)) {
            row.fill(!0);
            if tail_bits != 0 {
                if let Some(last) = row.last_mut() {
                    *last = (1u64 << tail_bits) - 1;
                }
            }
        }
    }

    #[inline]
    pub fn row_words(&self, y: usize) -> &[u64] {
        let start = y * self.words_per_row;
        &self.words[start..start + self.words_per_row]
    }

    #[inline]
    pub fn row_words_mut(&mut self, y: usize) -> &mut [u64] {
        let start = y * self.words_per_row;
        &mut self.words[start..start + self.words_per_row]
    }

    #[inline]
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// OR another mask of the same shape into this one.
    pub fn union_with(&mut self, other: &Self) {
        assert_eq!(self.width, other.width, "width mismatch");
        assert_eq!(self.height, other.height, "height mismatch");
        for (dst, src) in self.words.iter_mut().zip(other.words.iter()) {
            *dst |= *src;
        }
    }

    #[inline]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate `(x, y)` of every set bit in row-major order.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.height).flat_map(move |y| {
            self.row_words(y)
                .iter()
                .enumerate()
                .flat_map(move |(word_idx, &word)| {
                    let mut bits = word;
                    std::iter::from_fn(move || {
                        if bits == 0 {
                            return None;
                        }
                        let bit = bits.trailing_zeros() as usize;
                        bits &= bits - 1;
                        Some((word_idx * BITS_PER_WORD + bit, y))
                    })
                })
        })
    }
}
