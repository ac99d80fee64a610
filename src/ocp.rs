//! The optimal control problem consumed by the solvers.

use crate::Error;

/// A finite-horizon optimal control problem.
///
/// The solvers treat the problem as a black box supplying dimensions, the
/// state equation and the first-order derivatives of the terminal cost and
/// of the Hamiltonian `H = L + lmd' * f`. Implementations typically come
/// from symbolic differentiation of the cost and dynamics.
///
/// The evaluators write into caller-provided slices and must not observe or
/// mutate anything else; [`Ocp::synchronize`] is the single sanctioned
/// mutation point and runs once per solver update, before the residual is
/// evaluated for that sample.
///
/// Slice lengths are fixed by the associated dimensions and are the
/// caller's responsibility; the solvers always pass correctly sized
/// buffers, and the bound arrays are validated once at solver construction
/// rather than at every sample.
pub trait Ocp {
    /// Dimension of the state.
    const NX: usize;
    /// Dimension of the control input.
    const NU: usize;
    /// Dimension of the equality constraints.
    const NC: usize;
    /// Dimension of the smoothed inequality constraints already counted in
    /// `NC`.
    const NH: usize;
    /// Number of control components subject to box bounds.
    const NUB: usize;
    /// Dimension of the concatenation of the control input and the equality
    /// constraint multipliers.
    const NUC: usize = Self::NU + Self::NC;

    /// Control-vector index of each bounded component; length [`Ocp::NUB`].
    fn ubound_indices(&self) -> &[usize];
    /// Lower bounds of the bounded components; length [`Ocp::NUB`].
    fn umin(&self) -> &[f64];
    /// Upper bounds of the bounded components; length [`Ocp::NUB`].
    fn umax(&self) -> &[f64];
    /// Weight of the auxiliary cost on each dummy slack; length
    /// [`Ocp::NUB`].
    fn dummy_weight(&self) -> &[f64];

    /// Refreshes internal parameters from externally held references.
    ///
    /// Called once at the start of every solver update, before the
    /// optimality residual is evaluated for that sample.
    fn synchronize(&mut self) {}

    /// Writes the state equation `dx = f(t, x, u)`; `u` has length
    /// [`Ocp::NU`].
    fn eval_f(&self, t: f64, x: &[f64], u: &[f64], dx: &mut [f64]);

    /// Writes the gradient of the terminal cost, `phix = dphi/dx(t, x)`.
    fn eval_phix(&self, t: f64, x: &[f64], phix: &mut [f64]);

    /// Writes `hx = dH/dx(t, x, uc, lmd)`; `uc` concatenates the control
    /// input and the equality constraint multipliers (length [`Ocp::NUC`]).
    fn eval_hx(&self, t: f64, x: &[f64], uc: &[f64], lmd: &[f64], hx: &mut [f64]);

    /// Writes `hu = dH/duc(t, x, uc, lmd)` of length [`Ocp::NUC`].
    fn eval_hu(&self, t: f64, x: &[f64], uc: &[f64], lmd: &[f64], hu: &mut [f64]);
}

/// Validates the bound data of an OCP once, at solver construction.
pub(crate) fn validate_bounds<O: Ocp>(ocp: &O) -> Result<(), Error> {
    let arrays = [
        ("ubound_indices", ocp.ubound_indices().len()),
        ("umin", ocp.umin().len()),
        ("umax", ocp.umax().len()),
        ("dummy_weight", ocp.dummy_weight().len()),
    ];
    for (what, got) in arrays {
        if got != O::NUB {
            return Err(Error::DimensionMismatch {
                what,
                expected: O::NUB,
                got,
            });
        }
    }
    for (j, &index) in ocp.ubound_indices().iter().enumerate() {
        if index >= O::NU {
            return Err(Error::UboundIndexOutOfRange { index, nu: O::NU });
        }
        if !(ocp.umin()[j] < ocp.umax()[j]) {
            return Err(Error::InvertedBoundInterval { index: j });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Toy {
        indices: Vec<usize>,
        umin: Vec<f64>,
        umax: Vec<f64>,
        weight: Vec<f64>,
    }

    impl Toy {
        fn valid() -> Self {
            Self {
                indices: vec![0, 1],
                umin: vec![-1.0, 0.0],
                umax: vec![1.0, 2.0],
                weight: vec![0.1, 0.1],
            }
        }
    }

    impl Ocp for Toy {
        const NX: usize = 2;
        const NU: usize = 2;
        const NC: usize = 0;
        const NH: usize = 0;
        const NUB: usize = 2;

        fn ubound_indices(&self) -> &[usize] {
            &self.indices
        }
        fn umin(&self) -> &[f64] {
            &self.umin
        }
        fn umax(&self) -> &[f64] {
            &self.umax
        }
        fn dummy_weight(&self) -> &[f64] {
            &self.weight
        }
        fn eval_f(&self, _t: f64, _x: &[f64], u: &[f64], dx: &mut [f64]) {
            dx.copy_from_slice(u);
        }
        fn eval_phix(&self, _t: f64, x: &[f64], phix: &mut [f64]) {
            phix.copy_from_slice(x);
        }
        fn eval_hx(&self, _t: f64, x: &[f64], _uc: &[f64], _lmd: &[f64], hx: &mut [f64]) {
            hx.copy_from_slice(x);
        }
        fn eval_hu(&self, _t: f64, _x: &[f64], uc: &[f64], _lmd: &[f64], hu: &mut [f64]) {
            hu.copy_from_slice(uc);
        }
    }

    #[test]
    fn derived_width_concatenates_controls_and_multipliers() {
        assert_eq!(Toy::NUC, 2);
    }

    #[test]
    fn valid_bounds_pass() {
        assert!(validate_bounds(&Toy::valid()).is_ok());
    }

    #[test]
    fn wrong_length_bound_array_is_rejected() {
        let mut ocp = Toy::valid();
        ocp.umin.pop();
        assert_eq!(
            validate_bounds(&ocp),
            Err(Error::DimensionMismatch {
                what: "umin",
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn out_of_range_bound_index_is_rejected() {
        let mut ocp = Toy::valid();
        ocp.indices[1] = 5;
        assert_eq!(
            validate_bounds(&ocp),
            Err(Error::UboundIndexOutOfRange { index: 5, nu: 2 })
        );
    }

    #[test]
    fn inverted_interval_is_rejected() {
        let mut ocp = Toy::valid();
        ocp.umax[0] = ocp.umin[0];
        assert_eq!(
            validate_bounds(&ocp),
            Err(Error::InvertedBoundInterval { index: 0 })
        );
    }
}
