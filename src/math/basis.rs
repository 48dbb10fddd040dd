//! B-spline basis functions on clamped knot vectors.
//!
//! A clamped knot vector of degree `k` repeats each boundary knot `k + 1` times:
//!
//! ```text
//! [a, a, a, a, t_1, t_2, ..., t_m, b, b, b, b]     (k = 3)
//! ```
//!
//! which gives `m + k + 1` basis functions. At any `x` only `k + 1` of them are
//! non-zero, so evaluation returns those values plus the index of the first one
//! (the design matrix of a regression spline is banded).
//!
//! Evaluation follows the Cox–de Boor triangular scheme (Piegl & Tiller, A2.2).

/// Largest supported spline degree. Evaluation uses fixed-size scratch arrays.
pub const MAX_DEGREE: usize = 5;

/// Build the clamped knot vector for `[start, end]` with the given interior knots.
pub fn clamped_knots(start: f64, end: f64, interior: &[f64], degree: usize) -> Vec<f64> {
    let mut knots = Vec::with_capacity(interior.len() + 2 * (degree + 1));
    knots.extend(std::iter::repeat_n(start, degree + 1));
    knots.extend_from_slice(interior);
    knots.extend(std::iter::repeat_n(end, degree + 1));
    knots
}

/// Number of basis functions (= coefficients) for a knot vector.
pub fn basis_len(knot_count: usize, degree: usize) -> usize {
    knot_count.saturating_sub(degree + 1)
}

/// Index `mu` of the knot span with `knots[mu] <= x < knots[mu + 1]`.
///
/// Values outside the knot range are clamped to the first/last non-empty span, so
/// `x == b` belongs to the last span.
pub fn find_span(x: f64, degree: usize, knots: &[f64]) -> usize {
    let n_basis = basis_len(knots.len(), degree);
    if x >= knots[n_basis] {
        return n_basis - 1;
    }
    if x < knots[degree] {
        return degree;
    }
    // Number of knots in knots[degree..=n_basis] that are <= x (at least 1 here).
    let below = knots[degree..=n_basis].partition_point(|&k| k <= x);
    (degree + below - 1).min(n_basis - 1)
}

/// Evaluate the `degree + 1` non-zero basis functions at `x`.
///
/// Writes them into `values[..=degree]` and returns the index of the first one.
///
/// # Panics
/// Panics if `degree > MAX_DEGREE` or `values` is shorter than `degree + 1`.
pub fn nonzero_basis(x: f64, degree: usize, knots: &[f64], values: &mut [f64]) -> usize {
    assert!(degree <= MAX_DEGREE, "spline degree {degree} exceeds {MAX_DEGREE}");
    let mu = find_span(x, degree, knots);

    let mut left = [0.0; MAX_DEGREE + 1];
    let mut right = [0.0; MAX_DEGREE + 1];
    let mut n = [0.0; MAX_DEGREE + 1];
    n[0] = 1.0;

    for d in 1..=degree {
        left[d] = x - knots[mu + 1 - d];
        right[d] = knots[mu + d] - x;
        let mut saved = 0.0;
        for r in 0..d {
            let den = right[r + 1] + left[d - r];
            let temp = if den.abs() > 1e-12 { n[r] / den } else { 0.0 };
            n[r] = saved + right[r + 1] * temp;
            saved = left[d - r] * temp;
        }
        n[d] = saved;
    }

    values[..=degree].copy_from_slice(&n[..=degree]);
    mu - degree
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_vector_repeats_boundaries() {
        let knots = clamped_knots(0.0, 10.0, &[3.0, 6.0], 3);
        assert_eq!(knots, vec![0.0, 0.0, 0.0, 0.0, 3.0, 6.0, 10.0, 10.0, 10.0, 10.0]);
        assert_eq!(basis_len(knots.len(), 3), 6);
    }

    #[test]
    fn basis_is_a_partition_of_unity() {
        let knots = clamped_knots(0.0, 10.0, &[1.5, 4.0, 4.5, 8.0], 3);
        let mut values = [0.0; 4];
        for i in 0..=100 {
            let x = i as f64 * 0.1;
            let first = nonzero_basis(x, 3, &knots, &mut values);
            let sum: f64 = values.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "sum at {x} = {sum}");
            assert!(values.iter().all(|v| *v >= -1e-15));
            assert!(first + 3 < basis_len(knots.len(), 3));
        }
    }

    #[test]
    fn span_lookup_handles_the_right_boundary() {
        let knots = clamped_knots(0.0, 10.0, &[5.0], 3);
        assert_eq!(find_span(0.0, 3, &knots), 3);
        assert_eq!(find_span(4.999, 3, &knots), 3);
        assert_eq!(find_span(5.0, 3, &knots), 4);
        assert_eq!(find_span(10.0, 3, &knots), 4);
        assert_eq!(find_span(42.0, 3, &knots), 4);
    }

    #[test]
    fn endpoints_interpolate_first_and_last_coefficient() {
        let knots = clamped_knots(0.0, 1.0, &[0.5], 3);
        let mut values = [0.0; 4];
        let first = nonzero_basis(0.0, 3, &knots, &mut values);
        assert_eq!(first, 0);
        assert!((values[0] - 1.0).abs() < 1e-12);
        let first = nonzero_basis(1.0, 3, &knots, &mut values);
        assert_eq!(first, 1);
        assert!((values[3] - 1.0).abs() < 1e-12);
    }
}
