//! Closed-loop cartpole swing-up, the canonical C/GMRES benchmark problem.
//!
//! A cart on a rail balances a pendulum by moving horizontally under a
//! bounded force. Starting hanging down, the controller pumps energy into
//! the pole, swings it upright and balances it.

use std::f64::consts::PI;

use cgmres::{Horizon, MultipleShootingCgmres, Ocp, SolverSettings, ZeroHorizonSolver};

struct Cartpole {
    m_c: f64,
    m_p: f64,
    l: f64,
    g: f64,
    q: [f64; 4],
    q_terminal: [f64; 4],
    x_ref: [f64; 4],
    r: [f64; 1],
    ubound_indices: [usize; 1],
    umin: [f64; 1],
    umax: [f64; 1],
    dummy_weight: [f64; 1],
}

impl Default for Cartpole {
    fn default() -> Self {
        Self {
            m_c: 2.0,
            m_p: 0.2,
            l: 0.5,
            g: 9.80665,
            q: [2.5, 10.0, 0.01, 0.01],
            q_terminal: [2.5, 10.0, 0.01, 0.01],
            x_ref: [0.0, PI, 0.0, 0.0],
            r: [1.0],
            ubound_indices: [0],
            umin: [-15.0],
            umax: [15.0],
            dummy_weight: [0.1],
        }
    }
}

impl Ocp for Cartpole {
    const NX: usize = 4;
    const NU: usize = 1;
    const NC: usize = 0;
    const NH: usize = 0;
    const NUB: usize = 1;

    fn ubound_indices(&self) -> &[usize] {
        &self.ubound_indices
    }
    fn umin(&self) -> &[f64] {
        &self.umin
    }
    fn umax(&self) -> &[f64] {
        &self.umax
    }
    fn dummy_weight(&self) -> &[f64] {
        &self.dummy_weight
    }

    fn eval_f(&self, _t: f64, x: &[f64], u: &[f64], dx: &mut [f64]) {
        let (s, c) = x[1].sin_cos();
        let det = self.m_c + self.m_p * s * s;
        let cent = self.l * x[1] * x[1];
        dx[0] = x[2];
        dx[1] = x[3];
        dx[2] = (u[0] + self.m_p * s * (self.g * c + cent)) / det;
        dx[3] = (-self.g * s * (self.m_c + self.m_p) - u[0] * c - c * cent * self.m_p * s)
            / (self.l * det);
    }

    fn eval_phix(&self, _t: f64, x: &[f64], phix: &mut [f64]) {
        for i in 0..4 {
            phix[i] = self.q_terminal[i] * (x[i] - self.x_ref[i]);
        }
    }

    fn eval_hx(&self, _t: f64, x: &[f64], uc: &[f64], lmd: &[f64], hx: &mut [f64]) {
        let (s, c) = x[1].sin_cos();
        let det = self.m_c + self.m_p * s * s;
        let cent = self.l * x[1] * x[1];
        let lift = self.m_p * (self.g * c + cent);
        let msc = self.m_p * s * c;
        let dd = 2.0 * msc / (det * det);
        let inv = 1.0 / det;
        let mt = self.m_c + self.m_p;
        let l3 = lmd[3] / self.l;
        hx[0] = self.q[0] * (x[0] - self.x_ref[0]);
        hx[1] = -lmd[2] * dd * (uc[0] + s * lift)
            + lmd[2] * inv * (c * lift + self.m_p * s * (2.0 * self.l * x[1] - self.g * s))
            + self.q[1] * (x[1] - self.x_ref[1])
            - dd * l3 * (-uc[0] * c - msc * cent - self.g * s * mt)
            + inv
                * l3
                * (self.l * self.m_p * x[1] * x[1] * s * s - 2.0 * self.l * x[1] * msc
                    - self.m_p * c * c * cent
                    + uc[0] * s
                    - mt * self.g * c);
        hx[2] = lmd[0] + self.q[2] * (x[2] - self.x_ref[2]);
        hx[3] = lmd[1] + self.q[3] * (x[3] - self.x_ref[3]);
    }

    fn eval_hu(&self, _t: f64, x: &[f64], uc: &[f64], lmd: &[f64], hu: &mut [f64]) {
        let (s, c) = x[1].sin_cos();
        let det = self.m_c + self.m_p * s * s;
        hu[0] = self.r[0] * uc[0] + lmd[2] / det - lmd[3] * c / (self.l * det);
    }
}

const N: usize = 100;
const KMAX: usize = 5;
const KMAX_INIT: usize = 3;

fn main() -> Result<(), cgmres::Error> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .without_timestamps()
        .init()
        .ok();

    let settings = SolverSettings {
        sampling_time: 1e-3,
        zeta: 1000.0,
        finite_difference_epsilon: 1e-8,
        max_iter: 50,
        opterr_tol: 1e-6,
        ..Default::default()
    };
    let horizon = Horizon::new(2.0, 0.0)?;

    let t0 = 0.0;
    let x0 = [0.0; 4];

    let mut initializer: ZeroHorizonSolver<Cartpole, KMAX_INIT> =
        ZeroHorizonSolver::new(Cartpole::default(), settings)?;
    initializer.set_uc(&[0.01])?;
    initializer.solve(t0, &x0)?;
    log::info!(
        "initializer done: opterr {:.3e} in {} iteration(s)",
        initializer.opterr(),
        initializer.iterations()
    );

    let mut mpc: MultipleShootingCgmres<Cartpole, N, KMAX> =
        MultipleShootingCgmres::new(Cartpole::default(), horizon, settings)?;
    mpc.set_uc(initializer.ucopt())?;
    mpc.init_x_lmd(t0, &x0)?;
    mpc.init_dummy_mu()?;

    let plant = Cartpole::default();
    let sim_time = 10.0;
    let dt = settings.sampling_time;
    let steps = (sim_time / dt) as usize;

    let mut t = t0;
    let mut x = x0;
    let mut dx = [0.0; 4];
    for k in 0..steps {
        let u = mpc.uopt()[0].clone_owned();
        plant.eval_f(t, &x, u.as_slice(), &mut dx);
        mpc.update(t, &x)?;
        for i in 0..4 {
            x[i] += dt * dx[i];
        }
        t += dt;

        if k % 1000 == 0 {
            log::info!(
                "t = {t:5.2} s: cart {:6.3} m, pole {:6.3} rad, force {:7.3} N, opterr {:.3e}",
                x[0],
                x[1],
                u[0],
                mpc.opterr()
            );
        }
    }

    log::info!(
        "final state after {sim_time} s: cart {:.4} m, pole {:.4} rad (target {:.4})",
        x[0],
        x[1],
        PI
    );
    println!("\n{mpc}");
    Ok(())
}
