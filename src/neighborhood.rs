//! Grid-cell neighborhood enumeration.
//!
//! Given a query cell and a radius expressed in whole cells, produce the cell
//! offsets to visit around it. Purely combinatorial; the dimension is a const
//! generic so 1D/2D/3D grids share one implementation, and an unsupported
//! dimension is a precondition violation rather than a recoverable error.
//!
//! Offsets come out in a fixed lexicographic order, so a grid traversal built
//! on top of them is stable for a fixed build.

/// Walk all offsets within `ring` cells (Chebyshev distance) of the center
/// cell, in lexicographic order per axis, without materializing them.
///
/// `f` is called once per offset; returning `true` stops the walk, and the
/// function reports whether it was stopped. This is the allocation-free form
/// used on query hot paths.
pub fn visit_ring_offsets<const D: usize>(ring: i32, f: &mut impl FnMut([i32; D]) -> bool) -> bool {
    debug_assert!((1..=3).contains(&D), "grids are 1-, 2- or 3-dimensional");
    debug_assert!(ring >= 0, "ring radius must be non-negative");
    let mut cur = [0i32; D];
    visit(ring.max(0), 0, &mut cur, f)
}

/// All offsets within `ring` cells of the center cell, collected.
///
/// `ring = 0` yields just the center, `ring = 1` the one-ring (3^D cells),
/// and so on. Offsets are ordered lexicographically per axis.
pub fn ring_offsets<const D: usize>(ring: i32) -> Vec<[i32; D]> {
    let width = (2 * ring.max(0) + 1) as usize;
    let mut out = Vec::with_capacity(width.pow(D as u32));
    visit_ring_offsets::<D>(ring, &mut |off| {
        out.push(off);
        false
    });
    out
}

/// The immediate neighborhood of a cell, itself included: 3^D offsets.
pub fn one_ring<const D: usize>() -> Vec<[i32; D]> {
    ring_offsets::<D>(1)
}

fn visit<const D: usize>(
    ring: i32,
    dim: usize,
    cur: &mut [i32; D],
    f: &mut impl FnMut([i32; D]) -> bool,
) -> bool {
    if dim == D {
        return f(*cur);
    }
    for v in -ring..=ring {
        cur[dim] = v;
        if visit(ring, dim + 1, cur, f) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_ring_counts_per_dimension() {
        assert_eq!(one_ring::<1>().len(), 3);
        assert_eq!(one_ring::<2>().len(), 9);
        assert_eq!(one_ring::<3>().len(), 27);
    }

    #[test]
    fn ring_zero_is_center_only() {
        assert_eq!(ring_offsets::<3>(0), vec![[0, 0, 0]]);
    }

    #[test]
    fn ring_two_in_2d() {
        let offsets = ring_offsets::<2>(2);
        assert_eq!(offsets.len(), 25);
        // Lexicographic: first and last corners.
        assert_eq!(offsets[0], [-2, -2]);
        assert_eq!(offsets[24], [2, 2]);
        // No duplicates.
        let mut sorted = offsets.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 25);
    }

    #[test]
    fn offsets_are_stable_between_calls() {
        assert_eq!(ring_offsets::<3>(1), ring_offsets::<3>(1));
    }

    #[test]
    fn visitor_stops_on_request() {
        let mut seen = 0;
        let stopped = visit_ring_offsets::<3>(2, &mut |_| {
            seen += 1;
            seen == 5
        });
        assert!(stopped);
        assert_eq!(seen, 5);

        let mut all = 0;
        let stopped = visit_ring_offsets::<3>(1, &mut |_| {
            all += 1;
            false
        });
        assert!(!stopped);
        assert_eq!(all, 27);
    }
}
