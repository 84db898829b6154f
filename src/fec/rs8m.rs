//! Reed-Solomon erasure codec over GF(2^8)
//!
//! Systematic MDS code: `m` repair symbols are Cauchy-matrix
//! combinations of the `k` source symbols, so any `k` surviving symbols
//! of the block reconstruct every source. Block sizes are limited to
//! `k + m <= 256`.

use std::sync::OnceLock;

use super::{BlockCodec, FecError};

/// Largest supported `k + m`.
pub const MAX_BLOCK: usize = 256;

struct GfTables {
    exp: [u8; 512],
    log: [u8; 256],
    inv: [u8; 256],
}

fn tables() -> &'static GfTables {
    static TABLES: OnceLock<GfTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];

        // Generator 2, primitive polynomial x^8+x^4+x^3+x^2+1 (0x11d).
        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11d;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }

        let mut inv = [0u8; 256];
        for a in 1..256 {
            inv[a] = exp[255 - usize::from(log[a])];
        }

        GfTables { exp, log, inv }
    })
}

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = tables();
    t.exp[usize::from(t.log[usize::from(a)]) + usize::from(t.log[usize::from(b)])]
}

fn gf_inv(a: u8) -> u8 {
    debug_assert!(a != 0, "inverse of zero");
    tables().inv[usize::from(a)]
}

/// Cauchy coefficient for repair row `j`, source column `i`.
///
/// Rows are indexed by `x_j = j`, columns by `y_i = m + i`; with
/// `k + m <= 256` the denominators never vanish and every square
/// submatrix of `[I; C]` is invertible.
fn cauchy(j: usize, i: usize, m: usize) -> u8 {
    #[allow(clippy::cast_possible_truncation, reason = "indices bounded by MAX_BLOCK")]
    gf_inv((j as u8) ^ ((m + i) as u8))
}

/// Multiply-accumulate `dst ^= coeff * src` over a whole symbol.
fn addmul(dst: &mut [u8], src: &[u8], coeff: u8) {
    if coeff == 0 {
        return;
    }
    for (d, &s) in dst.iter_mut().zip(src) {
        *d ^= gf_mul(coeff, s);
    }
}

/// Reed-Solomon block codec.
#[derive(Debug, Default)]
pub struct Rs8mCodec;

impl Rs8mCodec {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BlockCodec for Rs8mCodec {
    fn encode(&mut self, sources: &[Vec<u8>], m: usize, _seed: u16) -> Vec<Vec<u8>> {
        let k = sources.len();
        assert!(k > 0 && k + m <= MAX_BLOCK, "block size out of range");
        let symbol_size = sources[0].len();
        assert!(
            sources.iter().all(|s| s.len() == symbol_size),
            "uneven source symbols"
        );

        (0..m)
            .map(|j| {
                let mut repair = vec![0u8; symbol_size];
                for (i, source) in sources.iter().enumerate() {
                    addmul(&mut repair, source, cauchy(j, i, m));
                }
                repair
            })
            .collect()
    }

    fn decode(
        &mut self,
        symbols: &mut [Option<Vec<u8>>],
        k: usize,
        m: usize,
        _seed: u16,
    ) -> Result<(), FecError> {
        assert_eq!(symbols.len(), k + m, "symbol slot count");
        assert!(k > 0 && k + m <= MAX_BLOCK, "block size out of range");

        if symbols[..k].iter().all(Option::is_some) {
            return Ok(());
        }

        // Pick the first k present symbols; fewer means unrecoverable.
        let present: Vec<usize> = symbols
            .iter()
            .enumerate()
            .filter_map(|(idx, s)| s.as_ref().map(|_| idx))
            .take(k)
            .collect();
        if present.len() < k {
            return Err(FecError::ReconstructionFailed);
        }

        let symbol_size = symbols[present[0]]
            .as_ref()
            .map(Vec::len)
            .unwrap_or_default();

        // Rows of [I; C] for the chosen symbols, solved against their
        // contents by Gauss-Jordan elimination.
        let mut matrix: Vec<Vec<u8>> = present
            .iter()
            .map(|&idx| {
                let mut row = vec![0u8; k];
                if idx < k {
                    row[idx] = 1;
                } else {
                    for (i, cell) in row.iter_mut().enumerate() {
                        *cell = cauchy(idx - k, i, m);
                    }
                }
                row
            })
            .collect();
        let mut data: Vec<Vec<u8>> = present
            .iter()
            .map(|&idx| symbols[idx].clone().expect("present symbol"))
            .collect();

        for col in 0..k {
            let pivot = (col..k)
                .find(|&r| matrix[r][col] != 0)
                .expect("Cauchy extension is nonsingular");
            matrix.swap(col, pivot);
            data.swap(col, pivot);

            let inv = gf_inv(matrix[col][col]);
            for cell in &mut matrix[col] {
                *cell = gf_mul(*cell, inv);
            }
            for b in &mut data[col] {
                *b = gf_mul(*b, inv);
            }

            for row in 0..k {
                if row == col || matrix[row][col] == 0 {
                    continue;
                }
                let factor = matrix[row][col];
                let pivot_row = matrix[col].clone();
                for (cell, p) in matrix[row].iter_mut().zip(&pivot_row) {
                    *cell ^= gf_mul(factor, *p);
                }
                let pivot_data = data[col].clone();
                addmul(&mut data[row], &pivot_data, factor);
            }
        }

        for i in 0..k {
            if symbols[i].is_none() {
                debug_assert_eq!(data[i].len(), symbol_size);
                symbols[i] = Some(std::mem::take(&mut data[i]));
            }
        }

        Ok(())
    }
}
