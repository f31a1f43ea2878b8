use crate::types::TransitionMat;

/// Truncated Taylor expansion of the per-channel sampling interval.
///
/// `F[i, j] = dt^(j-i) / (j-i)!` for `j >= i`, zero below the diagonal,
/// with `dt = 1 / sampling_rate`. The caller guarantees `sampling_rate > 0`.
pub fn taylor_transition(sampling_rate: usize, channels: usize) -> TransitionMat {
    let dt = 1.0 / sampling_rate as f64;

    // coeffs[k] = dt^k / k!
    let mut coeffs = Vec::with_capacity(channels);
    let mut term = 1.0;
    for k in 0..channels {
        if k > 0 {
            term *= dt / k as f64;
        }
        coeffs.push(term);
    }

    TransitionMat::from_fn(channels, channels, |i, j| {
        if j >= i {
            coeffs[j - i]
        } else {
            0.0
        }
    })
}

/// Fresh copy of `f` with its diagonal replaced.
///
/// Banks that freeze part of the state overwrite the diagonal with the
/// significance mask (or its complement); the source matrix is never touched.
pub fn with_diagonal(f: &TransitionMat, diagonal: &[f64]) -> TransitionMat {
    let mut out = f.clone();
    for (i, &value) in diagonal.iter().enumerate().take(out.nrows().min(out.ncols())) {
        out[(i, i)] = value;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_upper_triangular_unit_diagonal() {
        let f = taylor_transition(128, 14);
        for i in 0..14 {
            assert_eq!(f[(i, i)], 1.0);
            for j in 0..i {
                assert_eq!(f[(i, j)], 0.0);
            }
        }
    }

    #[test]
    fn test_taylor_coefficients() {
        let fs = 128;
        let f = taylor_transition(fs, 14);
        let dt = 1.0 / fs as f64;
        let mut factorial = 1.0;
        for k in 1..14 {
            factorial *= k as f64;
            let expected = dt.powi(k as i32) / factorial;
            for i in 0..(14 - k) {
                assert_relative_eq!(f[(i, i + k)], expected, max_relative = 1e-12);
            }
        }
    }

    #[test]
    fn test_small_sampling_rate() {
        let f = taylor_transition(1, 4);
        assert_relative_eq!(f[(0, 1)], 1.0);
        assert_relative_eq!(f[(0, 2)], 0.5);
        assert_relative_eq!(f[(0, 3)], 1.0 / 6.0);
    }

    #[test]
    fn test_with_diagonal_does_not_alias() {
        let f = taylor_transition(128, 5);
        let mask = [0.0, 1.0, 0.0, 1.0, 1.0];
        let g = with_diagonal(&f, &mask);
        for i in 0..5 {
            assert_eq!(g[(i, i)], mask[i]);
            assert_eq!(f[(i, i)], 1.0);
        }
        assert_eq!(g[(0, 1)], f[(0, 1)]);
    }
}
