//! First-order optimality residuals of the discretized horizon.
//!
//! The decision vector is laid out segment-major: the `N` stage blocks of
//! controls and equality multipliers first, then all dummy slacks, then all
//! bound multipliers,
//!
//! ```text
//! U = [ uc_0 .. uc_{N-1} | v_0 .. v_{N-1} | mu_0 .. mu_{N-1} ]
//! ```
//!
//! and the residual `F` mirrors that layout exactly, so the map `U -> F` is
//! square and its finite-difference directional derivatives are what the
//! continuation solver hands to GMRES.

use nalgebra::DVector;

use crate::bounds;
use crate::horizon::Horizon;
use crate::ocp::Ocp;

/// Index arithmetic of the segment-major decision layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Layout {
    pub n: usize,
    pub nuc: usize,
    pub nub: usize,
}

impl Layout {
    pub fn of<O: Ocp>(n: usize) -> Self {
        Self {
            n,
            nuc: O::NUC,
            nub: O::NUB,
        }
    }

    /// Total number of unknowns.
    pub fn dim(&self) -> usize {
        self.n * (self.nuc + 2 * self.nub)
    }

    /// Range of stage `i`'s control/multiplier block.
    pub fn uc(&self, i: usize) -> std::ops::Range<usize> {
        i * self.nuc..(i + 1) * self.nuc
    }

    /// Start of the dummy-slack segment.
    pub fn dummy_offset(&self) -> usize {
        self.n * self.nuc
    }

    /// Range of stage `i`'s dummy slacks.
    pub fn dummy(&self, i: usize) -> std::ops::Range<usize> {
        let start = self.dummy_offset() + i * self.nub;
        start..start + self.nub
    }

    /// Start of the bound-multiplier segment.
    pub fn mu_offset(&self) -> usize {
        self.n * (self.nuc + self.nub)
    }

    /// Range of stage `i`'s bound multipliers.
    pub fn mu(&self, i: usize) -> std::ops::Range<usize> {
        let start = self.mu_offset() + i * self.nub;
        start..start + self.nub
    }
}

/// Multiple-shooting optimality residual with its trajectory workspace.
///
/// The state and costate trajectories are rebuilt from the current plant
/// state at every evaluation; the buffers are allocated once and reused.
#[derive(Debug)]
pub(crate) struct MultipleShootingKkt {
    pub layout: Layout,
    /// States over the horizon, `N + 1` vectors; entry 0 is the plant state.
    x: Vec<DVector<f64>>,
    /// Costates over the horizon, `N + 1` vectors.
    lmd: Vec<DVector<f64>>,
    dx: DVector<f64>,
    hx: DVector<f64>,
}

impl MultipleShootingKkt {
    pub fn new<O: Ocp>(n: usize) -> Self {
        Self {
            layout: Layout::of::<O>(n),
            x: vec![DVector::zeros(O::NX); n + 1],
            lmd: vec![DVector::zeros(O::NX); n + 1],
            dx: DVector::zeros(O::NX),
            hx: DVector::zeros(O::NX),
        }
    }

    /// States of the latest roll-out; entry `i` is `x_i`.
    pub fn states(&self) -> &[DVector<f64>] {
        &self.x
    }

    /// Costates of the latest roll-out; entry `i` is `lmd_i`.
    pub fn costates(&self) -> &[DVector<f64>] {
        &self.lmd
    }

    /// Rebuilds the state and costate trajectories from the plant state
    /// `x0` under the stage inputs of `u`.
    ///
    /// Forward Euler for the states, the adjoint recursion for the
    /// costates: `lmd_N = phix(t_N, x_N)`,
    /// `lmd_i = lmd_{i+1} + dtau * hx(t_i, x_i, uc_i, lmd_{i+1})`.
    pub fn rollout<O: Ocp>(
        &mut self,
        ocp: &O,
        horizon: &Horizon,
        t: f64,
        x0: &[f64],
        u: &DVector<f64>,
    ) {
        let n = self.layout.n;
        let dtau = horizon.length(t) / n as f64;
        let us = u.as_slice();

        self.x[0].as_mut_slice().copy_from_slice(x0);
        for i in 0..n {
            let ti = t + dtau * i as f64;
            let u_i = &us[self.layout.uc(i)][..O::NU];
            ocp.eval_f(ti, self.x[i].as_slice(), u_i, self.dx.as_mut_slice());
            let (done, rest) = self.x.split_at_mut(i + 1);
            rest[0].copy_from(&done[i]);
            rest[0].axpy(dtau, &self.dx, 1.0);
        }

        let tn = t + dtau * n as f64;
        ocp.eval_phix(tn, self.x[n].as_slice(), self.lmd[n].as_mut_slice());
        for i in (0..n).rev() {
            let ti = t + dtau * i as f64;
            let uc_i = &us[self.layout.uc(i)];
            ocp.eval_hx(
                ti,
                self.x[i].as_slice(),
                uc_i,
                self.lmd[i + 1].as_slice(),
                self.hx.as_mut_slice(),
            );
            let (head, tail) = self.lmd.split_at_mut(i + 1);
            head[i].copy_from(&tail[0]);
            head[i].axpy(dtau, &self.hx, 1.0);
        }
    }

    /// Evaluates `F(U; t, x0)` into `fonc`.
    pub fn eval<O: Ocp>(
        &mut self,
        ocp: &O,
        horizon: &Horizon,
        t: f64,
        x0: &[f64],
        u: &DVector<f64>,
        fonc: &mut DVector<f64>,
    ) {
        debug_assert_eq!(u.len(), self.layout.dim());
        debug_assert_eq!(fonc.len(), self.layout.dim());

        self.rollout(ocp, horizon, t, x0, u);

        let n = self.layout.n;
        let dtau = horizon.length(t) / n as f64;
        let us = u.as_slice();
        let out = fonc.as_mut_slice();
        for i in 0..n {
            let ti = t + dtau * i as f64;
            let uc_i = &us[self.layout.uc(i)];
            let v_i = &us[self.layout.dummy(i)];
            let mu_i = &us[self.layout.mu(i)];

            ocp.eval_hu(
                ti,
                self.x[i].as_slice(),
                uc_i,
                self.lmd[i + 1].as_slice(),
                &mut out[self.layout.uc(i)],
            );
            bounds::augment_hu(
                ocp.ubound_indices(),
                ocp.umin(),
                ocp.umax(),
                uc_i,
                mu_i,
                &mut out[self.layout.uc(i)],
            );
            bounds::dummy_residual(
                v_i,
                mu_i,
                ocp.dummy_weight(),
                &mut out[self.layout.dummy(i)],
            );
            bounds::bound_residual(
                ocp.ubound_indices(),
                ocp.umin(),
                ocp.umax(),
                uc_i,
                v_i,
                &mut out[self.layout.mu(i)],
            );
        }
    }
}

/// Zero-horizon residual: the degenerate `dtau = 0` single-stage path used
/// by the initializer, where the costate collapses to `phix(t, x0)`.
#[derive(Debug)]
pub(crate) struct ZeroHorizonKkt {
    pub layout: Layout,
    lmd: DVector<f64>,
}

impl ZeroHorizonKkt {
    pub fn new<O: Ocp>() -> Self {
        Self {
            layout: Layout::of::<O>(1),
            lmd: DVector::zeros(O::NX),
        }
    }

    /// Evaluates the zero-horizon `F(U; t, x0)` into `fonc`.
    pub fn eval<O: Ocp>(
        &mut self,
        ocp: &O,
        t: f64,
        x0: &[f64],
        u: &DVector<f64>,
        fonc: &mut DVector<f64>,
    ) {
        debug_assert_eq!(u.len(), self.layout.dim());
        debug_assert_eq!(fonc.len(), self.layout.dim());

        ocp.eval_phix(t, x0, self.lmd.as_mut_slice());

        let us = u.as_slice();
        let out = fonc.as_mut_slice();
        let uc = &us[self.layout.uc(0)];
        let v = &us[self.layout.dummy(0)];
        let mu = &us[self.layout.mu(0)];

        ocp.eval_hu(t, x0, uc, self.lmd.as_slice(), &mut out[self.layout.uc(0)]);
        bounds::augment_hu(
            ocp.ubound_indices(),
            ocp.umin(),
            ocp.umax(),
            uc,
            mu,
            &mut out[self.layout.uc(0)],
        );
        bounds::dummy_residual(v, mu, ocp.dummy_weight(), &mut out[self.layout.dummy(0)]);
        bounds::bound_residual(
            ocp.ubound_indices(),
            ocp.umin(),
            ocp.umax(),
            uc,
            v,
            &mut out[self.layout.mu(0)],
        );
    }

    /// The costate of the latest evaluation.
    #[cfg(test)]
    pub fn costate(&self) -> &DVector<f64> {
        &self.lmd
    }
}
