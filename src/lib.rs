//! Real-time nonlinear model predictive control with the multiple-shooting
//! C/GMRES method.
//!
//! At every sampling instant the solver advances a decision vector `U`
//! (stage inputs, dummy slacks and bound multipliers over an `N`-stage
//! horizon) so that the first-order optimality residual `F(U; t, x)` of the
//! finite-horizon optimal control problem decays exponentially, instead of
//! iterating the problem to convergence from scratch. The linear system of
//! the continuation update is solved matrix-free with a small-subspace
//! GMRES, so one [`MultipleShootingCgmres::update`] costs a fixed number of
//! residual evaluations and no allocation.
//!
//! The optimal control problem itself is supplied by the user as an [`Ocp`]
//! implementation: dimensions, dynamics `f`, terminal-cost gradient `phi_x`
//! and Hamiltonian gradients `H_x`, `H_u`, plus bound data for the
//! constrained input components.
//!
//! ```no_run
//! use cgmres::{Horizon, MultipleShootingCgmres, SolverSettings, ZeroHorizonSolver};
//! # use cgmres::Ocp;
//! # #[derive(Clone)]
//! # struct MyOcp;
//! # impl Ocp for MyOcp {
//! #     const NX: usize = 1; const NU: usize = 1; const NC: usize = 0;
//! #     const NH: usize = 0; const NUB: usize = 0;
//! #     fn ubound_indices(&self) -> &[usize] { &[] }
//! #     fn umin(&self) -> &[f64] { &[] }
//! #     fn umax(&self) -> &[f64] { &[] }
//! #     fn dummy_weight(&self) -> &[f64] { &[] }
//! #     fn eval_f(&self, _: f64, _: &[f64], _: &[f64], dx: &mut [f64]) { dx[0] = 0.0; }
//! #     fn eval_phix(&self, _: f64, _: &[f64], phix: &mut [f64]) { phix[0] = 0.0; }
//! #     fn eval_hx(&self, _: f64, _: &[f64], _: &[f64], _: &[f64], hx: &mut [f64]) { hx[0] = 0.0; }
//! #     fn eval_hu(&self, _: f64, _: &[f64], uc: &[f64], _: &[f64], hu: &mut [f64]) { hu[0] = uc[0]; }
//! # }
//! let settings = SolverSettings::default();
//! let horizon = Horizon::new(1.0, 0.0)?;
//! let (t0, x0) = (0.0, [0.0]);
//!
//! let mut initializer: ZeroHorizonSolver<MyOcp, 1> =
//!     ZeroHorizonSolver::new(MyOcp, settings)?;
//! initializer.set_uc(&[0.0])?;
//! initializer.solve(t0, &x0)?;
//!
//! let mut mpc: MultipleShootingCgmres<MyOcp, 20, 3> =
//!     MultipleShootingCgmres::new(MyOcp, horizon, settings)?;
//! mpc.set_uc(initializer.ucopt())?;
//! mpc.init_x_lmd(t0, &x0)?;
//! mpc.init_dummy_mu()?;
//!
//! mpc.update(t0, &x0)?;
//! let u_now = &mpc.uopt()[0];
//! # Ok::<(), cgmres::Error>(())
//! ```

use std::fmt;

pub mod bounds;
pub mod gmres;
pub mod horizon;
mod kkt;
pub mod ocp;
pub mod solver;
pub mod zero_horizon;

pub use gmres::{GmresInfo, LinearOperator, MatrixFreeGmres};
pub use horizon::Horizon;
pub use ocp::Ocp;
pub use solver::MultipleShootingCgmres;
pub use zero_horizon::ZeroHorizonSolver;

/// Errors reported by the solvers.
///
/// Configuration and usage errors surface from constructors and the arming
/// sequence, never from inside the continuation loop. Numerical failures
/// surface from [`MultipleShootingCgmres::update`] and poison the instance
/// until it is re-armed.
#[derive(Debug, PartialEq, Clone, Copy, thiserror::Error)]
pub enum Error {
    /// The horizon length must be strictly positive.
    #[error("horizon length must be positive, got {0}")]
    NonPositiveHorizonLength(f64),
    /// `sampling_time` must be strictly positive.
    #[error("sampling_time must be positive, got {0}")]
    NonPositiveSamplingTime(f64),
    /// `zeta` must be strictly positive.
    #[error("zeta must be positive, got {0}")]
    NonPositiveZeta(f64),
    /// `finite_difference_epsilon` must be strictly positive.
    #[error("finite_difference_epsilon must be positive, got {0}")]
    NonPositiveFiniteDifferenceEpsilon(f64),
    /// `fb_epsilon` must be strictly positive.
    #[error("fb_epsilon must be positive, got {0}")]
    NonPositiveFbEpsilon(f64),
    /// `min_dummy` must be strictly positive.
    #[error("min_dummy must be positive, got {0}")]
    NonPositiveMinDummy(f64),
    /// The number of horizon stages `N` must be positive.
    #[error("number of horizon stages must be positive")]
    NoHorizonStages,
    /// The Krylov dimension must satisfy `0 < KMAX <= dim(U)`.
    #[error("Krylov dimension must satisfy 0 < kmax <= {dim}, got {kmax}")]
    InvalidKrylovDimension { kmax: usize, dim: usize },
    /// An input slice or OCP bound array has the wrong length.
    #[error("{what} must have length {expected}, got {got}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A bound index does not address a control component.
    #[error("ubound index {index} is out of range for nu = {nu}")]
    UboundIndexOutOfRange { index: usize, nu: usize },
    /// A bound interval is empty or inverted.
    #[error("umin must be strictly below umax for bound {index}")]
    InvertedBoundInterval { index: usize },
    /// A facade operation was called before its predecessors in the arming
    /// sequence `set_uc -> init_x_lmd -> init_dummy_mu`.
    #[error("`{0}` called out of order; arm the solver with set_uc, init_x_lmd, init_dummy_mu")]
    OutOfOrder(&'static str),
    /// A previous update failed numerically; the solver must be re-armed.
    #[error("solver is poisoned by an earlier numerical failure; re-arm it")]
    Poisoned,
    /// A NaN or infinity appeared in the named quantity.
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
}

/// Options of the C/GMRES solvers.
///
/// `sampling_time` is the step `h` of both the continuation law and the
/// outer simulation. `max_iter` and `opterr_tol` govern only the
/// zero-horizon initializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    /// Sampling period `h` of the continuation law (default `1e-3`).
    pub sampling_time: f64,
    /// Stabilization gain of the continuation law; the optimality residual
    /// decays at rate `zeta` (default `1000.0`).
    pub zeta: f64,
    /// Perturbation used by the finite-difference Jacobian-vector products
    /// (default `1e-8`).
    pub finite_difference_epsilon: f64,
    /// Smoothing constant of the Fischer-Burmeister complementarity
    /// function, which keeps its square root differentiable at the origin
    /// (default `1e-2`).
    pub fb_epsilon: f64,
    /// Positive floor kept on every dummy slack variable (default `1e-3`).
    pub min_dummy: f64,
    /// Iteration cap of the zero-horizon initializer (default `50`).
    pub max_iter: usize,
    /// Convergence threshold on `||F||` for the initializer (default `1e-6`).
    pub opterr_tol: f64,
    /// 0 silent, 1 per-sample summary, 2 additionally per-iteration detail
    /// (default `0`).
    pub verbose_level: u8,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            sampling_time: 1e-3,
            zeta: 1000.0,
            finite_difference_epsilon: 1e-8,
            fb_epsilon: 1e-2,
            min_dummy: 1e-3,
            max_iter: 50,
            opterr_tol: 1e-6,
            verbose_level: 0,
        }
    }
}

impl SolverSettings {
    /// Checks the settings for validity.
    ///
    /// Invalid values are configuration errors. A gain/step product
    /// `zeta * sampling_time >= 2` lies outside the stability region of the
    /// forward-Euler continuation integrator and only logs a warning, since
    /// marginal configurations can still be useful.
    pub fn validate(&self) -> Result<(), Error> {
        if !(self.sampling_time > 0.0) {
            return Err(Error::NonPositiveSamplingTime(self.sampling_time));
        }
        if !(self.zeta > 0.0) {
            return Err(Error::NonPositiveZeta(self.zeta));
        }
        if !(self.finite_difference_epsilon > 0.0) {
            return Err(Error::NonPositiveFiniteDifferenceEpsilon(
                self.finite_difference_epsilon,
            ));
        }
        if !(self.fb_epsilon > 0.0) {
            return Err(Error::NonPositiveFbEpsilon(self.fb_epsilon));
        }
        if !(self.min_dummy > 0.0) {
            return Err(Error::NonPositiveMinDummy(self.min_dummy));
        }
        if self.zeta * self.sampling_time >= 2.0 {
            log::warn!(
                "zeta * sampling_time = {} >= 2; the continuation update may be unstable",
                self.zeta * self.sampling_time
            );
        }
        Ok(())
    }
}

impl fmt::Display for SolverSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "SolverSettings:")?;
        writeln!(f, "  sampling_time:             {}", self.sampling_time)?;
        writeln!(f, "  zeta:                      {}", self.zeta)?;
        writeln!(
            f,
            "  finite_difference_epsilon: {}",
            self.finite_difference_epsilon
        )?;
        writeln!(f, "  fb_epsilon:                {}", self.fb_epsilon)?;
        writeln!(f, "  min_dummy:                 {}", self.min_dummy)?;
        writeln!(f, "  max_iter:                  {}", self.max_iter)?;
        writeln!(f, "  opterr_tol:                {}", self.opterr_tol)?;
        write!(f, "  verbose_level:             {}", self.verbose_level)
    }
}

/// True when every component of `v` is finite.
pub(crate) fn all_finite(v: &nalgebra::DVector<f64>) -> bool {
    v.iter().all(|x| x.is_finite())
}
