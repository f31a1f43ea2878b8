//! Square-root time update.
//!
//! All three propagators stack the augmented matrix
//!
//! ```text
//!     U = [ Sᵀ·Fᵀ ]   (n×n)
//!         [ √Qᵀ   ]   (n×n)
//! ```
//!
//! and triangularize it, `U = Q·R`. Since `UᵀU = F·S·Sᵀ·Fᵀ + Q = RᵀR`, the new
//! lower factor is `S' = R[..n, ..n]ᵀ`. The variants differ only in how R is
//! obtained and agree up to the signs of R's rows.

use serde::{Deserialize, Serialize};

use crate::error::{EnsembleError, EnsembleResult};
use crate::model::cholesky_factor;
use crate::types::{all_finite, SqrtFactor, StateMat, TransitionMat};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropagatorKind {
    Givens,
    Householder,
    GramSchmidt,
}

impl PropagatorKind {
    pub const ALL: [PropagatorKind; 3] = [
        PropagatorKind::Givens,
        PropagatorKind::Householder,
        PropagatorKind::GramSchmidt,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            PropagatorKind::Givens => "Givens",
            PropagatorKind::Householder => "Householder",
            PropagatorKind::GramSchmidt => "GramSchmidt",
        }
    }

    /// Advance `s` one step: `S'·S'ᵀ ≈ F·S·Sᵀ·Fᵀ + Q`.
    pub fn propagate(
        &self,
        s: &SqrtFactor,
        f: &TransitionMat,
        q: &StateMat,
    ) -> EnsembleResult<SqrtFactor> {
        let n = s.nrows();
        if s.ncols() != n || f.shape() != (n, n) || q.shape() != (n, n) {
            return Err(EnsembleError::numerical(format!(
                "Propagator dimension mismatch: S {:?}, F {:?}, Q {:?}",
                s.shape(),
                f.shape(),
                q.shape()
            )));
        }

        let u = augmented(s, f, q)?;
        let r = match self {
            PropagatorKind::Givens => givens_triangularize(u),
            PropagatorKind::Householder => householder_triangularize(u),
            PropagatorKind::GramSchmidt => gram_schmidt_triangularize(&u),
        };

        let s_next = r.view((0, 0), (n, n)).transpose();
        if !all_finite(&s_next) {
            return Err(EnsembleError::numerical(format!(
                "{} propagation produced non-finite factor",
                self.label()
            )));
        }
        Ok(s_next)
    }
}

/// `[Sᵀ·Fᵀ ; √Qᵀ]`, 2n×n.
fn augmented(s: &SqrtFactor, f: &TransitionMat, q: &StateMat) -> EnsembleResult<StateMat> {
    let n = s.nrows();
    let top = s.transpose() * f.transpose();
    let q_root = noise_root(q)?;

    let mut u = StateMat::zeros(2 * n, n);
    u.view_mut((0, 0), (n, n)).copy_from(&top);
    u.view_mut((n, 0), (n, n)).copy_from(&q_root.transpose());
    Ok(u)
}

/// Square root of the process noise. Diagonal Q (the usual case, including
/// Q = 0) takes the element-wise root; anything else needs Cholesky.
fn noise_root(q: &StateMat) -> EnsembleResult<StateMat> {
    let n = q.nrows();
    let diagonal = (0..n).all(|i| (0..n).all(|j| i == j || q[(i, j)] == 0.0));
    if diagonal {
        if (0..n).any(|i| q[(i, i)] < 0.0) {
            return Err(EnsembleError::numerical("Process noise has a negative variance"));
        }
        let mut root = StateMat::zeros(n, n);
        for i in 0..n {
            root[(i, i)] = q[(i, i)].sqrt();
        }
        Ok(root)
    } else {
        cholesky_factor(q)
    }
}

/// Plane rotation `(c, s)` such that `[c -s; s c]·[a; b] = [r; 0]`.
fn givens_coefficients(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else if b.abs() > a.abs() {
        let tau = -a / b;
        let s = 1.0 / (1.0 + tau * tau).sqrt();
        (s * tau, s)
    } else {
        let tau = -b / a;
        let c = 1.0 / (1.0 + tau * tau).sqrt();
        (c, c * tau)
    }
}

/// Zero each sub-diagonal entry bottom-up, column by column, rotating
/// adjacent row pairs.
fn givens_triangularize(mut u: StateMat) -> StateMat {
    let (rows, cols) = u.shape();
    for j in 0..cols {
        for i in ((j + 1)..rows).rev() {
            let a = u[(i - 1, j)];
            let b = u[(i, j)];
            if b == 0.0 {
                continue;
            }
            let (c, s) = givens_coefficients(a, b);
            for k in j..cols {
                let upper = u[(i - 1, k)];
                let lower = u[(i, k)];
                u[(i - 1, k)] = c * upper - s * lower;
                u[(i, k)] = s * upper + c * lower;
            }
            u[(i, j)] = 0.0;
        }
    }
    u
}

/// Single Householder QR (nalgebra's reflector-based `qr()`).
fn householder_triangularize(u: StateMat) -> StateMat {
    u.qr().r()
}

/// Modified Gram-Schmidt: R[j, j] = ‖v_j‖, R[j, k] = q_j·v_k with every later
/// column re-orthogonalized against q_j as soon as it is produced.
fn gram_schmidt_triangularize(u: &StateMat) -> StateMat {
    let cols = u.ncols();
    let mut v = u.clone();
    let mut r = StateMat::zeros(cols, cols);

    for j in 0..cols {
        let norm = v.column(j).norm();
        r[(j, j)] = norm;
        if norm <= f64::MIN_POSITIVE {
            // dependent column: contributes nothing to later columns
            continue;
        }
        let q_j = v.column(j) / norm;
        for k in (j + 1)..cols {
            let proj = q_j.dot(&v.column(k));
            r[(j, k)] = proj;
            let mut col_k = v.column_mut(k);
            col_k.axpy(-proj, &q_j, 1.0);
        }
    }
    r
}
