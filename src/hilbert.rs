//! Hilbert curve index computation
//!
//! Maps an envelope center to a position on an N-dimensional Hilbert curve
//! of a given order (bits per axis). The result is a fixed-width `u128`
//! holding `dimensions * order` significant bits, so two entries with close
//! values tend to be spatially close. It is a pure function of its inputs:
//! there are no configured world bounds, coordinates go through a monotone
//! bit-level transform instead.
//!
//! The curve itself uses the transpose formulation (Gray-code walk with
//! per-step axis exchange/inversion), the same family as the iterative 2D
//! rotate-and-interleave loop but valid for any dimensionality.

use crate::types::Envelope;

/// Hilbert index of the envelope's center point.
pub fn envelope_value(env: &Envelope, order: u32) -> u128 {
    point_value(&env.center(), order)
}

/// Hilbert index of a point at the given curve order.
///
/// `order` must be in `1..=64`; [`crate::TreeConfig::validate`] enforces
/// this for orders reaching the tree.
pub fn point_value(point: &[f64], order: u32) -> u128 {
    debug_assert!((1..=64).contains(&order), "curve order {} out of 1..=64", order);
    let coords: Vec<u64> = point
        .iter()
        .map(|&c| sortable_bits(c) >> (64 - order))
        .collect();
    grid_value(&coords, order)
}

/// Hilbert index of an integer grid cell. Each coordinate must fit in
/// `order` bits and `point.len() * order` must not exceed 128.
pub fn grid_value(coords: &[u64], order: u32) -> u128 {
    let mut x = coords.to_vec();
    axes_to_transpose(&mut x, order);

    // Interleave transposed axes MSB-first into a single index.
    let mut h: u128 = 0;
    for q in (0..order).rev() {
        for xi in &x {
            h = (h << 1) | (((xi >> q) & 1) as u128);
        }
    }
    h
}

/// Monotone map from f64 to u64: preserves total order over finite values
/// (negatives below positives), so truncating to the top `order` bits yields
/// a consistent grid coordinate without any configured world extent.
fn sortable_bits(x: f64) -> u64 {
    let b = x.to_bits();
    if b >> 63 == 1 {
        !b
    } else {
        b ^ (1 << 63)
    }
}

/// In-place conversion of axis coordinates to the transposed Hilbert form.
fn axes_to_transpose(x: &mut [u64], order: u32) {
    let n = x.len();
    let m = 1u64 << (order - 1);

    // Inverse undo
    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..n {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    // Gray encode
    for i in 1..n {
        x[i] ^= x[i - 1];
    }
    let mut t = 0;
    q = m;
    while q > 1 {
        if x[n - 1] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for xi in x.iter_mut() {
        *xi ^= t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let p = [12.5, -3.25];
        assert_eq!(point_value(&p, 16), point_value(&p, 16));
        let e = Envelope::rect(10.0, -5.0, 15.0, -1.5).unwrap();
        assert_eq!(envelope_value(&e, 16), point_value(&e.center(), 16));
    }

    #[test]
    #[should_panic(expected = "curve order")]
    fn test_rejects_zero_order() {
        point_value(&[1.0, 2.0], 0);
    }

    #[test]
    fn test_sortable_bits_monotone() {
        let samples = [-1.0e9, -42.5, -1.0, -0.0, 0.0, 1.0e-12, 1.0, 42.5, 1.0e9];
        for w in samples.windows(2) {
            assert!(sortable_bits(w[0]) <= sortable_bits(w[1]));
        }
        assert!(sortable_bits(-1.0) < sortable_bits(1.0));
    }

    #[test]
    fn test_grid_bijective_2d() {
        let order = 3;
        let side = 1u64 << order;
        let mut seen = std::collections::HashSet::new();
        for x in 0..side {
            for y in 0..side {
                let h = grid_value(&[x, y], order);
                assert!(h < (side * side) as u128);
                assert!(seen.insert(h), "duplicate hilbert value {}", h);
            }
        }
        assert_eq!(seen.len(), (side * side) as usize);
    }

    #[test]
    fn test_grid_bijective_3d() {
        let order = 2;
        let side = 1u64 << order;
        let mut seen = std::collections::HashSet::new();
        for x in 0..side {
            for y in 0..side {
                for z in 0..side {
                    assert!(seen.insert(grid_value(&[x, y, z], order)));
                }
            }
        }
        assert_eq!(seen.len(), (side * side * side) as usize);
    }

    #[test]
    fn test_consecutive_cells_adjacent_2d() {
        // A true Hilbert curve moves one grid step per index increment.
        let order = 4;
        let side = 1u64 << order;
        let mut by_index = vec![(0u64, 0u64); (side * side) as usize];
        for x in 0..side {
            for y in 0..side {
                by_index[grid_value(&[x, y], order) as usize] = (x, y);
            }
        }
        for w in by_index.windows(2) {
            let dx = w[0].0.abs_diff(w[1].0);
            let dy = w[0].1.abs_diff(w[1].1);
            assert_eq!(dx + dy, 1, "cells {:?} and {:?} not adjacent", w[0], w[1]);
        }
    }

    #[test]
    fn test_consecutive_cells_adjacent_3d() {
        let order = 2;
        let side = 1u64 << order;
        let mut by_index = vec![[0u64; 3]; (side * side * side) as usize];
        for x in 0..side {
            for y in 0..side {
                for z in 0..side {
                    by_index[grid_value(&[x, y, z], order) as usize] = [x, y, z];
                }
            }
        }
        for w in by_index.windows(2) {
            let dist: u64 = (0..3).map(|d| w[0][d].abs_diff(w[1][d])).sum();
            assert_eq!(dist, 1);
        }
    }
}
