//! Lim-Lee simultaneous multi-exponentiation.
//!
//! Computes `sum(exponent[i] * point[i])` with one shared left-to-right
//! pass: points are partitioned into windows, every subset sum inside a
//! window is precomputed, and each bit position then costs one doubling
//! plus one table addition per window. Generic over [`CurvePoint`], so
//! prime-field and binary-field curve backends differ only in which
//! arithmetic impl is plugged in.

use crate::group::{CurvePoint, FieldElement};

/// Window width as a function of the largest exponent's bit length; larger
/// exponents amortize a larger precomputation table.
fn window_width(max_exp_bits: usize) -> usize {
    match max_exp_bits {
        0..=10 => 2,
        11..=24 => 3,
        25..=60 => 4,
        61..=144 => 5,
        145..=342 => 6,
        343..=797 => 7,
        798..=1828 => 8,
        _ => 9,
    }
}

/// Computes `sum(k * p)` over all `(p, k)` pairs. Empty input and all-zero
/// exponents both yield the identity element.
pub fn simultaneous_multi_exp<P: CurvePoint>(pairs: &[(P, P::Scalar)]) -> P {
    // Bit matrix: bits[i][j] is bit j (from the LSB) of exponent i.
    let bits: Vec<Vec<bool>> = pairs
        .iter()
        .map(|(_, k)| {
            let mut be = k.to_bits_be();
            be.reverse();
            be
        })
        .collect();

    let t = bits
        .iter()
        .map(|b| b.iter().rposition(|&x| x).map_or(0, |p| p + 1))
        .max()
        .unwrap_or(0);
    if t == 0 {
        return P::identity();
    }

    let n = pairs.len();
    let w = window_width(t);
    let h = n.div_ceil(w);

    // Subset-sum table per window: entry e holds the sum of the window's
    // points selected by the bits of e; entry 0 is the identity.
    let mut tables: Vec<Vec<P>> = Vec::with_capacity(h);
    for k in 0..h {
        let group = &pairs[k * w..usize::min(k * w + w, n)];
        let mut table = vec![P::identity(); 1 << group.len()];
        for e in 1..table.len() {
            let low = e & e.wrapping_neg();
            if e == low {
                table[e] = group[low.trailing_zeros() as usize].0.clone();
            } else {
                table[e] = table[e ^ low].add(&table[low]);
            }
        }
        tables.push(table);
    }

    let mut result = P::identity();
    for j in (0..t).rev() {
        if j != t - 1 {
            result = result.double();
        }
        for (k, table) in tables.iter().enumerate() {
            let mut selector = 0usize;
            for i in 0..usize::min(w, n - k * w) {
                if *bits[k * w + i].get(j).unwrap_or(&false) {
                    selector |= 1 << i;
                }
            }
            if selector != 0 {
                result = result.add(&table[selector]);
            }
        }
    }
    result
}
