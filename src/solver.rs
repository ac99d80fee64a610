//! Receding-horizon solver: the continuation/GMRES stepper behind a small
//! arming-then-updating facade.

use std::fmt;

use log::{debug, info, warn};
use nalgebra::DVector;

use crate::bounds;
use crate::gmres::{LinearOperator, MatrixFreeGmres};
use crate::horizon::Horizon;
use crate::kkt::MultipleShootingKkt;
use crate::ocp::{self, Ocp};
use crate::{Error, SolverSettings, all_finite};

/// Progress through the arming sequence. Transitions are monotone; every
/// facade operation requires its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Arming {
    Constructed,
    Seeded,
    Initialized,
    Armed,
}

/// Nonlinear MPC solver using the multiple-shooting C/GMRES method.
///
/// `N` is the number of horizon stages, `KMAX` the Krylov subspace
/// dimension of the matrix-free linear solves. One [`update`] advances the
/// decision vector by a single continuation step, costing `KMAX + 2`
/// residual evaluations and no allocation; its first stage input,
/// `uopt()[0]`, is the control to apply.
///
/// The instance must be armed before updating:
///
/// ```text
/// set_uc(uc0) -> init_x_lmd(t, x) -> init_dummy_mu() -> update(t, x)*
/// ```
///
/// A numerical failure inside [`update`] poisons the instance; running the
/// arming sequence again clears it.
///
/// [`update`]: MultipleShootingCgmres::update
#[derive(Debug)]
pub struct MultipleShootingCgmres<O: Ocp, const N: usize, const KMAX: usize> {
    ocp: O,
    horizon: Horizon,
    settings: SolverSettings,
    kkt: MultipleShootingKkt,
    gmres: MatrixFreeGmres<KMAX>,
    solution: DVector<f64>,
    fonc: DVector<f64>,
    fonc_next: DVector<f64>,
    rhs: DVector<f64>,
    delta: DVector<f64>,
    pert: DVector<f64>,
    fpert: DVector<f64>,
    x_pred: DVector<f64>,
    dx: DVector<f64>,
    uopt: Vec<DVector<f64>>,
    opterr: f64,
    arming: Arming,
    poisoned: bool,
}

/// Finite-difference directional derivative of the residual at the
/// predicted sample `(t', x')`:
/// `d -> (F(U + eps d; t', x') - F(U; t', x')) / eps`.
struct ContinuationDirection<'a, O: Ocp> {
    ocp: &'a O,
    kkt: &'a mut MultipleShootingKkt,
    horizon: &'a Horizon,
    t: f64,
    x: &'a [f64],
    base_u: &'a DVector<f64>,
    base_f: &'a DVector<f64>,
    pert: &'a mut DVector<f64>,
    fpert: &'a mut DVector<f64>,
    eps: f64,
}

impl<O: Ocp> LinearOperator for ContinuationDirection<'_, O> {
    fn apply(&mut self, v: &DVector<f64>, out: &mut DVector<f64>) {
        self.pert.copy_from(self.base_u);
        self.pert.axpy(self.eps, v, 1.0);
        self.kkt
            .eval(self.ocp, self.horizon, self.t, self.x, self.pert, self.fpert);
        out.copy_from(self.fpert);
        out.axpy(-1.0, self.base_f, 1.0);
        out.unscale_mut(self.eps);
    }
}

impl<O: Ocp, const N: usize, const KMAX: usize> MultipleShootingCgmres<O, N, KMAX> {
    /// Creates the solver, validating settings, horizon and OCP bound data.
    ///
    /// All workspace is allocated here; nothing allocates after
    /// construction.
    pub fn new(ocp: O, horizon: Horizon, settings: SolverSettings) -> Result<Self, Error> {
        if N == 0 {
            return Err(Error::NoHorizonStages);
        }
        settings.validate()?;
        ocp::validate_bounds(&ocp)?;
        let kkt = MultipleShootingKkt::new::<O>(N);
        let dim = kkt.layout.dim();
        let gmres = MatrixFreeGmres::new(dim)?;
        Ok(Self {
            ocp,
            horizon,
            settings,
            kkt,
            gmres,
            solution: DVector::zeros(dim),
            fonc: DVector::zeros(dim),
            fonc_next: DVector::zeros(dim),
            rhs: DVector::zeros(dim),
            delta: DVector::zeros(dim),
            pert: DVector::zeros(dim),
            fpert: DVector::zeros(dim),
            x_pred: DVector::zeros(O::NX),
            dx: DVector::zeros(O::NX),
            uopt: vec![DVector::zeros(O::NU); N],
            opterr: 0.0,
            arming: Arming::Constructed,
            poisoned: false,
        })
    }

    /// Seeds every stage's control/multiplier block with `uc0`, typically
    /// the converged iterate of a [`ZeroHorizonSolver`].
    ///
    /// First step of the arming sequence; also clears a poisoned state.
    ///
    /// [`ZeroHorizonSolver`]: crate::ZeroHorizonSolver
    pub fn set_uc(&mut self, uc0: &[f64]) -> Result<(), Error> {
        if uc0.len() != O::NUC {
            return Err(Error::DimensionMismatch {
                what: "uc0",
                expected: O::NUC,
                got: uc0.len(),
            });
        }
        for i in 0..N {
            self.solution.as_mut_slice()[self.kkt.layout.uc(i)].copy_from_slice(uc0);
        }
        // Placeholders until init_dummy_mu; keeps every slack positive.
        let layout = self.kkt.layout;
        for j in 0..N * O::NUB {
            self.solution[layout.dummy_offset() + j] = self.settings.min_dummy;
            self.solution[layout.mu_offset() + j] = 0.0;
        }
        self.arming = Arming::Seeded;
        self.poisoned = false;
        Ok(())
    }

    /// Rolls out the initial state and costate trajectories at `(t, x)`
    /// under the seeded stage inputs.
    pub fn init_x_lmd(&mut self, t: f64, x: &[f64]) -> Result<(), Error> {
        if self.arming < Arming::Seeded {
            return Err(Error::OutOfOrder("init_x_lmd"));
        }
        if x.len() != O::NX {
            return Err(Error::DimensionMismatch {
                what: "x",
                expected: O::NX,
                got: x.len(),
            });
        }
        self.kkt
            .rollout(&self.ocp, &self.horizon, t, x, &self.solution);
        self.arming = Arming::Initialized;
        Ok(())
    }

    /// Seeds the dummy slacks and bound multipliers of every stage from its
    /// current controls, making the residual vanish on the bound rows.
    ///
    /// Completes the arming sequence.
    pub fn init_dummy_mu(&mut self) -> Result<(), Error> {
        if self.arming < Arming::Initialized {
            return Err(Error::OutOfOrder("init_dummy_mu"));
        }
        let layout = self.kkt.layout;
        let mut infeasible = 0usize;
        let mut worst_fb = 0.0f64;
        for i in 0..N {
            for j in 0..O::NUB {
                let uj = self.ocp.ubound_indices()[j];
                let u = self.solution[layout.uc(i).start + uj];
                let g = bounds::gap(self.ocp.umin()[j], self.ocp.umax()[j], u);
                let seed =
                    bounds::seed_dummy_mu(g, self.ocp.dummy_weight()[j], self.settings.min_dummy);
                self.solution[layout.dummy(i).start + j] = seed.v;
                self.solution[layout.mu(i).start + j] = seed.mu;
                infeasible += seed.infeasible as usize;
                worst_fb = worst_fb.min(bounds::complementarity_residual(
                    g,
                    seed.v,
                    seed.mu,
                    self.settings.fb_epsilon,
                ));
            }
        }
        if infeasible > 0 {
            warn!("init_dummy_mu: {infeasible} stage bound(s) seeded infeasible; slacks clamped");
        }
        if self.settings.verbose_level >= 2 && O::NUB > 0 {
            debug!("init_dummy_mu: worst complementarity residual {worst_fb:.3e}");
        }
        self.refresh_uopt();
        self.arming = Arming::Armed;
        Ok(())
    }

    /// Performs one continuation step at the sampling instant `(t, x)`.
    ///
    /// Synchronizes the OCP, builds the continuation right-hand side
    /// `-zeta F - dF/dt` from the current and the predicted sample, solves
    /// the matrix-free linear system with GMRES(KMAX) and advances the
    /// decision vector by `h * delta`. A GMRES breakdown degrades to the
    /// partial solution with a warning; a non-finite residual or iterate
    /// aborts and poisons the solver.
    pub fn update(&mut self, t: f64, x: &[f64]) -> Result<(), Error> {
        if self.arming < Arming::Armed {
            return Err(Error::OutOfOrder("update"));
        }
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        if x.len() != O::NX {
            return Err(Error::DimensionMismatch {
                what: "x",
                expected: O::NX,
                got: x.len(),
            });
        }

        self.ocp.synchronize();

        let Self {
            ocp,
            horizon,
            settings,
            kkt,
            gmres,
            solution,
            fonc,
            fonc_next,
            rhs,
            delta,
            pert,
            fpert,
            x_pred,
            dx,
            opterr,
            poisoned,
            ..
        } = self;

        let h = settings.sampling_time;
        let layout = kkt.layout;

        kkt.eval(&*ocp, horizon, t, x, solution, fonc);
        if !all_finite(fonc) {
            *poisoned = true;
            return Err(Error::NonFinite("optimality residual"));
        }
        *opterr = fonc.norm();

        // Predicted state one sample ahead under the current first input.
        let u0 = &solution.as_slice()[layout.uc(0)][..O::NU];
        ocp.eval_f(t, x, u0, dx.as_mut_slice());
        x_pred.as_mut_slice().copy_from_slice(x);
        x_pred.axpy(h, dx, 1.0);

        kkt.eval(&*ocp, horizon, t + h, x_pred.as_slice(), solution, fonc_next);
        if !all_finite(fonc_next) {
            *poisoned = true;
            return Err(Error::NonFinite("predicted optimality residual"));
        }

        // rhs = -zeta * F - (F_next - F) / h
        rhs.copy_from(fonc_next);
        rhs.axpy(-1.0, fonc, 1.0);
        rhs.unscale_mut(h);
        rhs.axpy(-settings.zeta, fonc, -1.0);

        let mut direction = ContinuationDirection {
            ocp: &*ocp,
            kkt: &mut *kkt,
            horizon: &*horizon,
            t: t + h,
            x: x_pred.as_slice(),
            base_u: &*solution,
            base_f: &*fonc_next,
            pert: &mut *pert,
            fpert: &mut *fpert,
            eps: settings.finite_difference_epsilon,
        };
        let linear = match gmres.solve(&mut direction, rhs, delta, 0.0) {
            Ok(linear) => linear,
            Err(err) => {
                *poisoned = true;
                return Err(err);
            }
        };
        if linear.breakdown {
            warn!(
                "gmres broke down after {} iteration(s) at t = {t}; continuing with the partial step",
                linear.iterations
            );
        }

        solution.axpy(h, delta, 1.0);
        bounds::floor_dummies(
            solution,
            layout.dummy_offset(),
            N * O::NUB,
            settings.min_dummy,
        );
        if !all_finite(solution) {
            *poisoned = true;
            return Err(Error::NonFinite("decision vector"));
        }

        self.refresh_uopt();
        if self.settings.verbose_level >= 1 {
            info!(
                "t = {t:.6}: opterr {:.6e}, gmres {} iteration(s), linear residual {:.3e}",
                self.opterr, linear.iterations, linear.residual
            );
        }
        Ok(())
    }

    /// The optimal stage inputs of the latest update; index 0 is the
    /// control to apply now.
    pub fn uopt(&self) -> &[DVector<f64>] {
        &self.uopt
    }

    /// The dummy slacks, stage-major; valid once armed.
    pub fn dummies(&self) -> &[f64] {
        let layout = self.kkt.layout;
        &self.solution.as_slice()[layout.dummy_offset()..layout.mu_offset()]
    }

    /// The bound multipliers, stage-major; valid once armed.
    pub fn multipliers(&self) -> &[f64] {
        let layout = self.kkt.layout;
        &self.solution.as_slice()[layout.mu_offset()..]
    }

    /// Norm of the optimality residual at the start of the latest update.
    pub fn opterr(&self) -> f64 {
        self.opterr
    }

    /// States of the latest trajectory roll-out; entry 0 is the plant
    /// state passed to the last update.
    pub fn state_trajectory(&self) -> &[DVector<f64>] {
        self.kkt.states()
    }

    /// Costates of the latest trajectory roll-out.
    pub fn costate_trajectory(&self) -> &[DVector<f64>] {
        self.kkt.costates()
    }

    /// The optimal control problem held by the solver.
    pub fn ocp(&self) -> &O {
        &self.ocp
    }

    /// Mutable access to the problem, for re-parameterization between
    /// samples.
    pub fn ocp_mut(&mut self) -> &mut O {
        &mut self.ocp
    }

    /// The horizon schedule.
    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    /// The solver settings.
    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    fn refresh_uopt(&mut self) {
        let us = self.solution.as_slice();
        for i in 0..N {
            self.uopt[i]
                .as_mut_slice()
                .copy_from_slice(&us[self.kkt.layout.uc(i)][..O::NU]);
        }
    }
}

impl<O: Ocp, const N: usize, const KMAX: usize> fmt::Display
    for MultipleShootingCgmres<O, N, KMAX>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MultipleShootingCgmres:")?;
        writeln!(
            f,
            "  nx: {}, nu: {}, nc: {}, nub: {}",
            O::NX,
            O::NU,
            O::NC,
            O::NUB
        )?;
        writeln!(f, "  N: {N}, kmax: {KMAX}, dim: {}", self.kkt.layout.dim())?;
        writeln!(f, "  {}", self.horizon)?;
        write!(f, "{}", self.settings)
    }
}
