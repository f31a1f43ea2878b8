//! Sequential square-root measurement update.
//!
//! Every row of H is assimilated as an independent scalar observation, in row
//! order, with its own variance `R[i, i]`. The three algorithms are
//! algebraically equivalent per scalar update; they differ in cost and in how
//! well they hold up under ill-conditioning.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::model::{cholesky_factor, ldl_decompose};
use crate::types::{
    covariance_from_factor, NoiseMat, ObservationMat, SqrtFactor, StateEstimate, StateVec,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssimilatorKind {
    Potter,
    Bierman,
    Carlson,
}

impl AssimilatorKind {
    pub const ALL: [AssimilatorKind; 3] = [
        AssimilatorKind::Potter,
        AssimilatorKind::Bierman,
        AssimilatorKind::Carlson,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AssimilatorKind::Potter => "Potter",
            AssimilatorKind::Bierman => "Bierman",
            AssimilatorKind::Carlson => "Carlson",
        }
    }

    /// Fold the observation `y = H·x + v`, `v ~ N(0, R)`, into `prior`.
    ///
    /// `epsilon` floors the D entries of the Bierman U-D factors.
    pub fn assimilate(
        &self,
        prior: &StateEstimate,
        h: &ObservationMat,
        r: &NoiseMat,
        y: &StateVec,
        epsilon: f64,
    ) -> EnsembleResult<StateEstimate> {
        check_dimensions(prior, h, r, y)?;

        let posterior = match self {
            AssimilatorKind::Potter => potter_update(prior, h, r, y)?,
            AssimilatorKind::Bierman => bierman_update(prior, h, r, y, epsilon)?,
            AssimilatorKind::Carlson => carlson_update(prior, h, r, y)?,
        };

        if !posterior.mean.iter().all(|v| v.is_finite())
            || !posterior.sqrt_cov.iter().all(|v| v.is_finite())
        {
            return Err(EnsembleError::numerical(format!(
                "{} update produced non-finite posterior",
                self.label()
            )));
        }
        Ok(posterior)
    }
}

fn check_dimensions(
    prior: &StateEstimate,
    h: &ObservationMat,
    r: &NoiseMat,
    y: &StateVec,
) -> EnsembleResult<()> {
    let n = prior.dim();
    let m = h.nrows();
    if prior.sqrt_cov.shape() != (n, n) || h.ncols() != n || r.shape() != (m, m) || y.len() != m {
        return Err(EnsembleError::numerical(format!(
            "Assimilator dimension mismatch: x {}, S {:?}, H {:?}, R {:?}, y {}",
            n,
            prior.sqrt_cov.shape(),
            h.shape(),
            r.shape(),
            y.len()
        )));
    }
    Ok(())
}

fn positive_variance(r: &NoiseMat, row: usize) -> EnsembleResult<f64> {
    let variance = r[(row, row)];
    if variance > 0.0 && variance.is_finite() {
        Ok(variance)
    } else {
        Err(EnsembleError::numerical(format!(
            "Measurement variance R[{row}, {row}] = {variance} is not positive"
        )))
    }
}

/// Potter: rank-one correction applied directly to S.
fn potter_update(
    prior: &StateEstimate,
    h: &ObservationMat,
    r: &NoiseMat,
    y: &StateVec,
) -> EnsembleResult<StateEstimate> {
    let mut x = prior.mean.clone();
    let mut s = prior.sqrt_cov.clone();

    for i in 0..h.nrows() {
        let h_i = h.row(i).transpose();
        let r_i = positive_variance(r, i)?;

        let phi = s.tr_mul(&h_i);
        let a = 1.0 / (phi.dot(&phi) + r_i);
        let gamma = 1.0 / (1.0 + (a * r_i).sqrt());

        let s_phi = &s * &phi;
        let innovation = y[i] - h_i.dot(&x);
        x += &s_phi * (a * innovation);

        // S ← S·(I − a·γ·φ·φᵀ)
        s -= &s_phi * phi.transpose() * (a * gamma);
    }

    Ok(StateEstimate::new(x, s))
}

/// Bierman: U-D factors of P = S·Sᵀ, one rank-one update per row, then a
/// Cholesky refactorization of the recombined covariance.
///
/// U is kept unit lower-triangular, so the classic upper-triangular sweep
/// runs from the last state index down to the first.
fn bierman_update(
    prior: &StateEstimate,
    h: &ObservationMat,
    r: &NoiseMat,
    y: &StateVec,
    epsilon: f64,
) -> EnsembleResult<StateEstimate> {
    let n = prior.dim();
    let mut x = prior.mean.clone();
    let (mut u, mut d) = ldl_decompose(&covariance_from_factor(&prior.sqrt_cov), epsilon)?;

    for i in 0..h.nrows() {
        let h_i = h.row(i).transpose();
        let r_i = positive_variance(r, i)?;

        // φ = Hᵢ·U, c = D ⊙ φ
        let phi = u.tr_mul(&h_i);
        let c = d.component_mul(&phi);

        let mut gain = DVector::<f64>::zeros(n);
        let mut alpha_prev = r_i;
        for j in (0..n).rev() {
            let alpha = alpha_prev + phi[j] * c[j];
            let lambda = -phi[j] / alpha_prev;
            d[j] = (d[j] * alpha_prev / alpha).max(epsilon);
            gain[j] = c[j];
            for m in (j + 1)..n {
                let beta = u[(m, j)];
                u[(m, j)] = beta + gain[m] * lambda;
                gain[m] += beta * c[j];
            }
            alpha_prev = alpha;
        }

        let innovation = y[i] - h_i.dot(&x);
        x += gain * (innovation / alpha_prev);
    }

    let p_post = &u * nalgebra::DMatrix::from_diagonal(&d) * u.transpose();
    let s = cholesky_factor(&p_post)?;
    Ok(StateEstimate::new(x, s))
}

/// Carlson: column sweep over S with running scalar d and vector e.
fn carlson_update(
    prior: &StateEstimate,
    h: &ObservationMat,
    r: &NoiseMat,
    y: &StateVec,
) -> EnsembleResult<StateEstimate> {
    let n = prior.dim();
    let mut x = prior.mean.clone();
    let mut s = prior.sqrt_cov.clone();

    for i in 0..h.nrows() {
        let h_i = h.row(i).transpose();
        let phi = s.tr_mul(&h_i);

        let mut d = positive_variance(r, i)?;
        let mut e = DVector::<f64>::zeros(n);
        let mut s_next = SqrtFactor::zeros(n, n);

        for k in 0..n {
            let d_next = d + phi[k] * phi[k];
            let b = (d / d_next).sqrt();
            let c = phi[k] / (d * d_next).sqrt();

            let column = s.column(k);
            let mut out = s_next.column_mut(k);
            out.copy_from(&(column * b - &e * c));
            e += column * phi[k];
            d = d_next;
        }

        let innovation = y[i] - h_i.dot(&x);
        x += &e * (innovation / d);
        s = s_next;
    }

    Ok(StateEstimate::new(x, s))
}
