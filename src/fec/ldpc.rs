//! LDPC-Staircase erasure codec
//!
//! Parity equations over XOR: the left part of the parity-check matrix
//! gives every source symbol degree 3 across the `m` equations (rows
//! drawn from a seeded PRNG both endpoints reproduce), the right part is
//! the staircase: equation `j` contains repair `j` and repair `j - 1`.
//! Decoding is iterative: any equation with exactly one unknown symbol
//! solves it. Recovery is probabilistic slightly above the `k` threshold,
//! unlike Reed-Solomon.

use super::{BlockCodec, FecError};

/// Source-symbol degree in the left part of the matrix.
const SOURCE_DEGREE: usize = 3;

/// Park-Miller minimal standard generator; deterministic across
/// endpoints for a given block seed.
struct Prng {
    state: u32,
}

impl Prng {
    fn new(seed: u16) -> Self {
        Self {
            state: u32::from(seed).max(1),
        }
    }

    fn next(&mut self) -> u32 {
        self.state = ((u64::from(self.state) * 16807) % 2_147_483_647) as u32;
        self.state
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() as usize) % bound
    }
}

/// Source-index lists per parity equation, identical on both endpoints.
fn build_equations(k: usize, m: usize, seed: u16) -> Vec<Vec<usize>> {
    let mut prng = Prng::new(seed);
    let mut rows: Vec<Vec<usize>> = vec![Vec::new(); m];

    for source in 0..k {
        let degree = SOURCE_DEGREE.min(m);
        let mut chosen = [usize::MAX; SOURCE_DEGREE];
        for slot in 0..degree {
            loop {
                let row = prng.below(m);
                if !chosen[..slot].contains(&row) {
                    chosen[slot] = row;
                    rows[row].push(source);
                    break;
                }
            }
        }
    }

    // An equation with no sources would make its repair useless; give it
    // one.
    for row in &mut rows {
        if row.is_empty() {
            row.push(prng.below(k));
        }
    }

    rows
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d ^= s;
    }
}

/// LDPC-Staircase block codec.
#[derive(Debug, Default)]
pub struct LdpcCodec;

impl LdpcCodec {
    /// Create the codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl BlockCodec for LdpcCodec {
    fn encode(&mut self, sources: &[Vec<u8>], m: usize, seed: u16) -> Vec<Vec<u8>> {
        let k = sources.len();
        assert!(k > 0 && m > 0, "block size out of range");
        let symbol_size = sources[0].len();
        assert!(
            sources.iter().all(|s| s.len() == symbol_size),
            "uneven source symbols"
        );

        let equations = build_equations(k, m, seed);
        let mut repairs: Vec<Vec<u8>> = Vec::with_capacity(m);

        for (j, equation) in equations.iter().enumerate() {
            let mut repair = vec![0u8; symbol_size];
            for &i in equation {
                xor_into(&mut repair, &sources[i]);
            }
            if j > 0 {
                xor_into(&mut repair, &repairs[j - 1]);
            }
            repairs.push(repair);
        }

        repairs
    }

    fn decode(
        &mut self,
        symbols: &mut [Option<Vec<u8>>],
        k: usize,
        m: usize,
        seed: u16,
    ) -> Result<(), FecError> {
        assert_eq!(symbols.len(), k + m, "symbol slot count");

        if symbols[..k].iter().all(Option::is_some) {
            return Ok(());
        }

        let equations = build_equations(k, m, seed);

        // Equation j: XOR of its sources, repair j, and repair j-1 is
        // zero. Solve any equation with a single unknown; repeat to a
        // fixed point.
        let mut progress = true;
        while progress {
            progress = false;

            for (j, equation) in equations.iter().enumerate() {
                let mut members: Vec<usize> = equation.clone();
                members.push(k + j);
                if j > 0 {
                    members.push(k + j - 1);
                }

                let mut unknown = None;
                let mut multiple = false;
                for &idx in &members {
                    if symbols[idx].is_none() {
                        if unknown.is_some() {
                            multiple = true;
                            break;
                        }
                        unknown = Some(idx);
                    }
                }

                let Some(target) = unknown else { continue };
                if multiple {
                    continue;
                }

                let size = members
                    .iter()
                    .find_map(|&idx| symbols[idx].as_ref().map(Vec::len))
                    .expect("equation has known members");
                let mut solved = vec![0u8; size];
                for &idx in &members {
                    if idx != target {
                        xor_into(&mut solved, symbols[idx].as_ref().expect("known member"));
                    }
                }
                symbols[target] = Some(solved);
                progress = true;
            }

            if symbols[..k].iter().all(Option::is_some) {
                return Ok(());
            }
        }

        Err(FecError::ReconstructionFailed)
    }
}
