//! Square-root Kalman filter family: three covariance propagators crossed
//! with three sequential measurement assimilators.

pub mod assimilate;
pub mod propagate;

pub use assimilate::AssimilatorKind;
pub use propagate::PropagatorKind;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EnsembleError;

/// One of the nine {propagator, assimilator} pairs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterVariant {
    pub propagator: PropagatorKind,
    pub assimilator: AssimilatorKind,
}

impl FilterVariant {
    pub const fn new(propagator: PropagatorKind, assimilator: AssimilatorKind) -> Self {
        Self {
            propagator,
            assimilator,
        }
    }

    /// All nine combinations, Gram-Schmidt first, Potter/Carlson/Bierman within.
    pub fn all() -> Vec<FilterVariant> {
        let propagators = [
            PropagatorKind::GramSchmidt,
            PropagatorKind::Givens,
            PropagatorKind::Householder,
        ];
        let assimilators = [
            AssimilatorKind::Potter,
            AssimilatorKind::Carlson,
            AssimilatorKind::Bierman,
        ];
        propagators
            .iter()
            .flat_map(|&p| assimilators.iter().map(move |&a| FilterVariant::new(p, a)))
            .collect()
    }

    /// `"Potter_Givens"`-style label used in file names and reports.
    pub fn label(&self) -> String {
        format!("{}_{}", self.assimilator.label(), self.propagator.label())
    }
}

impl fmt::Display for FilterVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn parse_propagator(token: &str) -> Option<PropagatorKind> {
    match token {
        "givens" => Some(PropagatorKind::Givens),
        "householder" => Some(PropagatorKind::Householder),
        "gramschmidt" | "gram" | "gs" => Some(PropagatorKind::GramSchmidt),
        _ => None,
    }
}

fn parse_assimilator(token: &str) -> Option<AssimilatorKind> {
    match token {
        "potter" => Some(AssimilatorKind::Potter),
        "bierman" | "ud" => Some(AssimilatorKind::Bierman),
        "carlson" => Some(AssimilatorKind::Carlson),
        _ => None,
    }
}

impl FromStr for FilterVariant {
    type Err = EnsembleError;

    /// Accepts either order, `_`/`-`/`+` separators, any case:
    /// `Potter_Givens`, `householder-bierman`, `Carlson+GramSchmidt`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace("gram-schmidt", "gramschmidt");
        let tokens: Vec<&str> = normalized
            .split(|c| c == '_' || c == '-' || c == '+')
            .filter(|t| !t.is_empty())
            .collect();

        if let [first, second] = tokens.as_slice() {
            let pair = match (parse_propagator(first), parse_assimilator(second)) {
                (Some(p), Some(a)) => Some((p, a)),
                _ => match (parse_assimilator(first), parse_propagator(second)) {
                    (Some(a), Some(p)) => Some((p, a)),
                    _ => None,
                },
            };
            if let Some((p, a)) = pair {
                return Ok(FilterVariant::new(p, a));
            }
        }
        Err(EnsembleError::config(format!("Unknown filter variant '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{covariance_from_factor, ObservationMat, NoiseMat, StateEstimate, StateMat, TransitionMat, EPSILON};
    use nalgebra::DVector;
    use std::collections::HashSet;

    #[test]
    fn test_nine_distinct_variants() {
        let all = FilterVariant::all();
        assert_eq!(all.len(), 9);
        let unique: HashSet<_> = all.iter().collect();
        assert_eq!(unique.len(), 9);
    }

    #[test]
    fn test_label_round_trips_through_parse() {
        for variant in FilterVariant::all() {
            assert_eq!(variant.label().parse::<FilterVariant>().unwrap(), variant);
        }
    }

    #[test]
    fn test_parse_accepts_loose_spellings() {
        let v: FilterVariant = "householder-bierman".parse().unwrap();
        assert_eq!(v, FilterVariant::new(PropagatorKind::Householder, AssimilatorKind::Bierman));
        let v: FilterVariant = "Carlson+Gram-Schmidt".parse().unwrap();
        assert_eq!(v, FilterVariant::new(PropagatorKind::GramSchmidt, AssimilatorKind::Carlson));
    }

    #[test]
    fn test_unknown_variant_is_configuration_error() {
        let err = "Kalman_Magic".parse::<FilterVariant>().unwrap_err();
        assert!(matches!(err, EnsembleError::Configuration(_)));
        assert!("Potter".parse::<FilterVariant>().is_err());
    }

    #[test]
    fn test_zero_noise_converges_to_constant_state() {
        // Q = 0, R ≈ 0, F = I: a constant state is pinned down almost at once
        let n = 4;
        let truth = DVector::from_vec(vec![1.5, -2.0, 0.25, 3.0]);
        let f = TransitionMat::identity(n, n);
        let q = StateMat::zeros(n, n);
        let h = ObservationMat::identity(n, n);
        let r = NoiseMat::identity(n, n) * 1e-9;

        for variant in FilterVariant::all() {
            let mut estimate = StateEstimate::new(DVector::zeros(n), StateMat::identity(n, n) * 10.0);
            for _ in 0..5 {
                let s = variant.propagator.propagate(&estimate.sqrt_cov, &f, &q).unwrap();
                let predicted = StateEstimate::new(&f * &estimate.mean, s);
                estimate = variant
                    .assimilator
                    .assimilate(&predicted, &h, &r, &truth, EPSILON)
                    .unwrap();
            }
            let err = (&estimate.mean - &truth).amax();
            assert!(err < 1e-6, "{} did not converge: {}", variant, err);
            assert!(covariance_from_factor(&estimate.sqrt_cov).trace() < 1e-6);
        }
    }
}
