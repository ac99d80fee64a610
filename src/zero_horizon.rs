//! Zero-horizon initializer: bootstraps the decision vector of the
//! receding-horizon solver.
//!
//! With the horizon collapsed to a point the optimality system loses its
//! trajectory structure and shrinks to one stage of unknowns, small enough
//! to solve with plain Newton iterations. The converged stage then seeds
//! every stage of the multiple-shooting decision vector.

use log::{debug, warn};
use nalgebra::DVector;

use crate::bounds;
use crate::gmres::{LinearOperator, MatrixFreeGmres};
use crate::kkt::ZeroHorizonKkt;
use crate::ocp::{self, Ocp};
use crate::{Error, SolverSettings, all_finite};

/// Newton/GMRES solver for the zero-horizon optimal control problem.
///
/// The unknowns are one stage of controls, equality multipliers, dummy
/// slacks and bound multipliers. Directions come from the same
/// finite-difference GMRES machinery the continuation solver uses, so a
/// `KMAX` close to the problem dimension gives essentially exact Newton
/// steps.
#[derive(Debug)]
pub struct ZeroHorizonSolver<O: Ocp, const KMAX: usize> {
    ocp: O,
    settings: SolverSettings,
    kkt: ZeroHorizonKkt,
    gmres: MatrixFreeGmres<KMAX>,
    solution: DVector<f64>,
    fonc: DVector<f64>,
    neg_fonc: DVector<f64>,
    step: DVector<f64>,
    pert: DVector<f64>,
    fpert: DVector<f64>,
    opterr: f64,
    iterations: usize,
}

/// Finite-difference Newton direction operator
/// `d -> (F(U + eps d) - F(U)) / eps` at a frozen `(t, x)`.
struct NewtonDirection<'a, O: Ocp> {
    ocp: &'a O,
    kkt: &'a mut ZeroHorizonKkt,
    t: f64,
    x: &'a [f64],
    base_u: &'a DVector<f64>,
    base_f: &'a DVector<f64>,
    pert: &'a mut DVector<f64>,
    fpert: &'a mut DVector<f64>,
    eps: f64,
}

impl<O: Ocp> LinearOperator for NewtonDirection<'_, O> {
    fn apply(&mut self, v: &DVector<f64>, out: &mut DVector<f64>) {
        self.pert.copy_from(self.base_u);
        self.pert.axpy(self.eps, v, 1.0);
        self.kkt
            .eval(self.ocp, self.t, self.x, self.pert, self.fpert);
        out.copy_from(self.fpert);
        out.axpy(-1.0, self.base_f, 1.0);
        out.unscale_mut(self.eps);
    }
}

impl<O: Ocp, const KMAX: usize> ZeroHorizonSolver<O, KMAX> {
    /// Creates the initializer, validating the settings and the OCP bound
    /// data.
    pub fn new(ocp: O, settings: SolverSettings) -> Result<Self, Error> {
        settings.validate()?;
        ocp::validate_bounds(&ocp)?;
        let dim = O::NUC + 2 * O::NUB;
        let gmres = MatrixFreeGmres::new(dim)?;
        Ok(Self {
            ocp,
            settings,
            kkt: ZeroHorizonKkt::new::<O>(),
            gmres,
            solution: DVector::zeros(dim),
            fonc: DVector::zeros(dim),
            neg_fonc: DVector::zeros(dim),
            step: DVector::zeros(dim),
            pert: DVector::zeros(dim),
            fpert: DVector::zeros(dim),
            opterr: 0.0,
            iterations: 0,
        })
    }

    /// Seeds the control/multiplier part of the iterate.
    pub fn set_uc(&mut self, uc: &[f64]) -> Result<(), Error> {
        if uc.len() != O::NUC {
            return Err(Error::DimensionMismatch {
                what: "uc",
                expected: O::NUC,
                got: uc.len(),
            });
        }
        self.solution.as_mut_slice()[..O::NUC].copy_from_slice(uc);
        Ok(())
    }

    /// Runs the Newton iteration at `(t, x)` until `||F|| < opterr_tol` or
    /// `max_iter` steps.
    ///
    /// Falling short of the tolerance is not an error: the residual norm is
    /// recorded and a warning is logged, since the continuation solver may
    /// still be viable from the returned iterate.
    pub fn solve(&mut self, t: f64, x: &[f64]) -> Result<(), Error> {
        if x.len() != O::NX {
            return Err(Error::DimensionMismatch {
                what: "x",
                expected: O::NX,
                got: x.len(),
            });
        }
        self.ocp.synchronize();
        self.seed_dummy_mu();

        let Self {
            ocp,
            settings,
            kkt,
            gmres,
            solution,
            fonc,
            neg_fonc,
            step,
            pert,
            fpert,
            opterr,
            iterations,
        } = self;

        let layout = kkt.layout;
        *iterations = 0;
        loop {
            kkt.eval(&*ocp, t, x, solution, fonc);
            if !all_finite(fonc) {
                return Err(Error::NonFinite("zero-horizon residual"));
            }
            *opterr = fonc.norm();
            if settings.verbose_level >= 2 {
                debug!(
                    "zero-horizon iteration {}: opterr {:.6e}",
                    iterations, opterr
                );
            }
            if *opterr < settings.opterr_tol {
                return Ok(());
            }
            if *iterations >= settings.max_iter {
                break;
            }

            neg_fonc.copy_from(fonc);
            neg_fonc.neg_mut();
            let mut direction = NewtonDirection {
                ocp: &*ocp,
                kkt: &mut *kkt,
                t,
                x,
                base_u: &*solution,
                base_f: &*fonc,
                pert: &mut *pert,
                fpert: &mut *fpert,
                eps: settings.finite_difference_epsilon,
            };
            gmres.solve(&mut direction, neg_fonc, step, 0.0)?;

            solution.axpy(1.0, step, 1.0);
            bounds::floor_dummies(
                solution,
                layout.dummy_offset(),
                layout.nub,
                settings.min_dummy,
            );
            if !all_finite(solution) {
                return Err(Error::NonFinite("zero-horizon iterate"));
            }
            *iterations += 1;
        }

        warn!(
            "zero-horizon initializer stopped at opterr {:.6e} after {} iterations (tol {:.1e})",
            self.opterr, self.iterations, self.settings.opterr_tol
        );
        Ok(())
    }

    /// The converged control/multiplier block, used to seed the
    /// receding-horizon solver.
    pub fn ucopt(&self) -> &[f64] {
        &self.solution.as_slice()[..O::NUC]
    }

    /// Residual norm `||F||` of the last iterate.
    pub fn opterr(&self) -> f64 {
        self.opterr
    }

    /// Newton steps taken by the last `solve`.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Seeds the dummy slacks and bound multipliers from the current
    /// controls.
    fn seed_dummy_mu(&mut self) {
        let layout = self.kkt.layout;
        let mut infeasible = 0usize;
        for j in 0..O::NUB {
            let uj = self.ocp.ubound_indices()[j];
            let g = bounds::gap(self.ocp.umin()[j], self.ocp.umax()[j], self.solution[uj]);
            let seed =
                bounds::seed_dummy_mu(g, self.ocp.dummy_weight()[j], self.settings.min_dummy);
            self.solution[layout.dummy(0).start + j] = seed.v;
            self.solution[layout.mu(0).start + j] = seed.mu;
            infeasible += seed.infeasible as usize;
        }
        if infeasible > 0 {
            warn!(
                "zero-horizon seed: {infeasible} control bound(s) start infeasible; slacks clamped"
            );
        }
    }
}
