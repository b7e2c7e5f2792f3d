//! Block FIR convolution over 8-bit unsigned samples.

/// Samples produced per iteration of the stream loop.
pub const BLOCK_SIZE: usize = 1024;

/// Working buffer of `2 * n` raw samples.
///
/// The first half is history (the fresh half of the previous iteration),
/// the second half receives this iteration's samples. [`convolve`] slides
/// the fresh half over the history once the output is computed, which is
/// what keeps the filter memory continuous across blocks.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    data: Vec<u8>,
    n: usize,
}

impl SampleBlock {
    pub fn new(n: usize) -> Self {
        Self {
            data: vec![128; 2 * n],
            n,
        }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn history_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.n]
    }

    pub fn fresh(&self) -> &[u8] {
        &self.data[self.n..]
    }

    pub fn fresh_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.n..]
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Copy the fresh half over the history half.
    pub fn slide(&mut self) {
        self.data.copy_within(self.n.., 0);
    }
}

/// Filter `block` with `coeffs`, writing `block.len()` clamped samples into
/// `out`, then slide the block for the next call.
///
/// Output index `j` is `sum_k block[j + M - 1 - k] * coeffs[k]`, truncated
/// toward zero after clamping to `[0, 255]`. Requires
/// `coeffs.len() <= block.len() + 1` and `out.len() == block.len()`.
pub fn convolve(block: &mut SampleBlock, coeffs: &[f64], out: &mut [u8]) {
    let n = block.len();
    let m = coeffs.len();
    debug_assert!(m >= 1 && m <= n + 1);
    debug_assert_eq!(out.len(), n);

    let data = block.as_slice();
    for (j, slot) in out.iter_mut().enumerate() {
        let end = j + m - 1;
        let mut sum = 0.0;
        for (k, &c) in coeffs.iter().enumerate() {
            sum += f64::from(data[end - k]) * c;
        }
        *slot = sum.clamp(0.0, 255.0) as u8;
    }

    block.slide();
}
