use nalgebra::{DMatrix, DVector};

use crate::error::{EnsembleError, EnsembleResult};
use crate::types::{all_finite, symmetrize, SessionBlock, SqrtFactor, StateMat};

/// LDLᵀ decomposition without pivoting.
///
/// Returns unit lower-triangular `L` and the diagonal `D`. Every pivot below
/// `epsilon` is raised to `epsilon` before it is used as a divisor, which keeps
/// semidefinite and mildly indefinite inputs factorizable. Only non-finite
/// input or output is reported as a numerical failure.
pub fn ldl_decompose(p: &StateMat, epsilon: f64) -> EnsembleResult<(DMatrix<f64>, DVector<f64>)> {
    let n = p.nrows();
    if n != p.ncols() {
        return Err(EnsembleError::numerical(format!(
            "LDL requires a square matrix, got {}x{}",
            n,
            p.ncols()
        )));
    }
    if !all_finite(p) {
        return Err(EnsembleError::numerical("LDL input contains non-finite entries"));
    }

    let mut l = DMatrix::<f64>::identity(n, n);
    let mut d = DVector::<f64>::zeros(n);

    for j in 0..n {
        let mut pivot = p[(j, j)];
        for k in 0..j {
            pivot -= l[(j, k)] * l[(j, k)] * d[k];
        }
        if !pivot.is_finite() {
            return Err(EnsembleError::numerical(format!("LDL pivot {} is not finite", j)));
        }
        d[j] = pivot.max(epsilon);

        for i in (j + 1)..n {
            let mut acc = p[(i, j)];
            for k in 0..j {
                acc -= l[(i, k)] * l[(j, k)] * d[k];
            }
            l[(i, j)] = acc / d[j];
        }
    }

    if !all_finite(&l) {
        return Err(EnsembleError::numerical("LDL factor diverged"));
    }
    Ok((l, d))
}

/// Seed square-root factor: symmetrize, LDLᵀ, clamp D, return `L·D^½`.
pub fn initial_factor(p: &StateMat, epsilon: f64) -> EnsembleResult<SqrtFactor> {
    let sym = symmetrize(p);
    let (l, d) = ldl_decompose(&sym, epsilon)?;
    let sqrt_d = DMatrix::from_diagonal(&d.map(f64::sqrt));
    Ok(l * sqrt_d)
}

/// Lower Cholesky factor of `p`; fails if `p` is not positive definite.
pub fn cholesky_factor(p: &StateMat) -> EnsembleResult<SqrtFactor> {
    if !all_finite(p) {
        return Err(EnsembleError::numerical("Cholesky input contains non-finite entries"));
    }
    symmetrize(p)
        .cholesky()
        .map(|chol| chol.l())
        .ok_or_else(|| EnsembleError::numerical("Cholesky decomposition failed: matrix is not positive definite"))
}

/// Unbiased sample covariance of a block, channels as variables.
pub fn empirical_covariance(block: &SessionBlock) -> EnsembleResult<StateMat> {
    let channels = block.channels();
    let samples = block.len();
    if samples < 2 {
        return Err(EnsembleError::input(format!(
            "Covariance needs at least two samples, block {} has {}",
            block.index, samples
        )));
    }

    let means: Vec<f64> = (0..channels)
        .map(|c| block.samples.row(c).sum() / samples as f64)
        .collect();

    let mut cov = StateMat::zeros(channels, channels);
    for i in 0..channels {
        for j in i..channels {
            let row_i = block.samples.row(i);
            let row_j = block.samples.row(j);
            let acc: f64 = row_i
                .iter()
                .zip(row_j.iter())
                .map(|(a, b)| (a - means[i]) * (b - means[j]))
                .sum();
            let value = acc / (samples as f64 - 1.0);
            cov[(i, j)] = value;
            cov[(j, i)] = value;
        }
    }
    Ok(cov)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{covariance_from_factor, EPSILON};
    use approx::assert_relative_eq;
    use ndarray::array;

    fn spd_fixture() -> StateMat {
        DMatrix::from_row_slice(
            3,
            3,
            &[4.0, 2.0, 0.6, 2.0, 5.0, 1.5, 0.6, 1.5, 3.0],
        )
    }

    #[test]
    fn test_ldl_reconstructs() {
        let p = spd_fixture();
        let (l, d) = ldl_decompose(&p, EPSILON).unwrap();
        for i in 0..3 {
            assert_eq!(l[(i, i)], 1.0);
            for j in (i + 1)..3 {
                assert_eq!(l[(i, j)], 0.0);
            }
        }
        let rebuilt = &l * DMatrix::from_diagonal(&d) * l.transpose();
        assert_relative_eq!(rebuilt, p, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_factor_reproduces_covariance() {
        let p = spd_fixture();
        let s = initial_factor(&p, EPSILON).unwrap();
        assert_relative_eq!(covariance_from_factor(&s), p, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_factor_symmetrizes() {
        let mut p = spd_fixture();
        p[(0, 1)] += 0.2;
        let s = initial_factor(&p, EPSILON).unwrap();
        assert_relative_eq!(covariance_from_factor(&s), symmetrize(&p), epsilon = 1e-12);
    }

    #[test]
    fn test_semidefinite_is_clamped() {
        // rank one: v·vᵀ
        let v = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let p = &v * v.transpose();
        let s = initial_factor(&p, EPSILON).unwrap();
        assert!(all_finite(&s));
        assert_relative_eq!(covariance_from_factor(&s), p, epsilon = 1e-6);
    }

    #[test]
    fn test_non_finite_is_numerical_failure() {
        let mut p = spd_fixture();
        p[(1, 1)] = f64::NAN;
        let err = initial_factor(&p, EPSILON).unwrap_err();
        assert!(err.is_numerical());
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let p = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert!(cholesky_factor(&p).unwrap_err().is_numerical());
        let s = cholesky_factor(&spd_fixture()).unwrap();
        assert_relative_eq!(covariance_from_factor(&s), spd_fixture(), epsilon = 1e-12);
    }

    #[test]
    fn test_empirical_covariance() {
        let block = SessionBlock::new(0, array![[1.0, 2.0, 3.0, 4.0], [2.0, 4.0, 6.0, 8.0]]);
        let cov = empirical_covariance(&block).unwrap();
        assert_relative_eq!(cov[(0, 0)], 5.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(cov[(0, 1)], 10.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(cov[(1, 1)], 20.0 / 3.0, epsilon = 1e-12);
        assert_eq!(cov[(0, 1)], cov[(1, 0)]);
    }
}
