//! Closed-loop hexacopter flight along a climbing circular trajectory with
//! per-rotor thrust bounds and a horizon that grows into its nominal
//! length.

use cgmres::{Horizon, MultipleShootingCgmres, Ocp, SolverSettings, ZeroHorizonSolver};

struct Hexacopter {
    m: f64,
    l: f64,
    k: f64,
    ixx: f64,
    iyy: f64,
    izz: f64,
    gamma: f64,
    g: f64,
    z_ref: f64,
    q: [f64; 12],
    q_terminal: [f64; 12],
    r: [f64; 6],
    ubound_indices: [usize; 6],
    umin: [f64; 6],
    umax: [f64; 6],
    dummy_weight: [f64; 6],
}

impl Default for Hexacopter {
    fn default() -> Self {
        Self {
            m: 1.44,
            l: 0.23,
            k: 1.6e-9,
            ixx: 0.0348,
            iyy: 0.0459,
            izz: 0.0977,
            gamma: 0.01,
            g: 9.80665,
            z_ref: 5.0,
            q: [1.0, 1.0, 1.0, 0.01, 0.01, 0.0, 0.01, 0.01, 0.01, 0.1, 0.1, 0.001],
            q_terminal: [1.0, 1.0, 1.0, 0.01, 0.01, 0.0, 0.01, 0.01, 0.01, 0.1, 0.1, 0.001],
            r: [0.01; 6],
            ubound_indices: [0, 1, 2, 3, 4, 5],
            umin: [0.144; 6],
            umax: [6.0; 6],
            dummy_weight: [0.1; 6],
        }
    }
}

impl Hexacopter {
    /// Reference trajectory: a unit circle flown at 2 rad/s while the
    /// altitude oscillates around `z_ref`.
    fn reference(&self, t: f64) -> [f64; 12] {
        let mut r = [0.0; 12];
        r[0] = (2.0 * t).sin();
        r[1] = 1.0 - (2.0 * t).cos();
        r[2] = self.z_ref + 2.0 * t.sin();
        r[6] = 2.0 * (2.0 * t).cos();
        r[7] = 2.0 * (2.0 * t).sin();
        r[8] = 2.0 * t.cos();
        r
    }

    fn hover_thrust(&self) -> f64 {
        self.g * self.m / 6.0
    }
}

impl Ocp for Hexacopter {
    const NX: usize = 12;
    const NU: usize = 6;
    const NC: usize = 0;
    const NH: usize = 0;
    const NUB: usize = 6;

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
        let (s3, c3) = x[3].sin_cos();
        let (s4, c4) = x[4].sin_cos();
        let (s5, c5) = x[5].sin_cos();
        let thrust = (u[0] + u[1] + u[2] + u[3] + u[4] + u[5]) / self.m;
        let sqrt3 = 3.0f64.sqrt();
        dx[0] = x[6];
        dx[1] = x[7];
        dx[2] = x[8];
        dx[3] = x[9];
        dx[4] = x[10];
        dx[5] = x[11];
        dx[6] = thrust * (s3 * s5 + c5 * c3 * s4);
        dx[7] = thrust * (-s3 * c5 + s5 * c3 * s4);
        dx[8] = -self.g + c3 * thrust * c4;
        dx[9] = self.l
            * (-u[1] - 0.5 * u[2] + 0.5 * u[3] + u[4] + 0.5 * u[5] - 0.5 * u[0])
            / self.ixx
            + x[10] * x[11] * (self.iyy - self.izz) / self.ixx;
        dx[10] = self.l * 0.5 * sqrt3 * (u[2] + u[3] - u[5] - u[0]) / self.iyy
            + x[11] * x[9] * (self.izz - self.ixx) / self.iyy;
        dx[11] = x[10] * x[9] * (self.ixx - self.iyy) / self.izz
            + (-self.gamma * x[11] + self.k * (u[1] + u[3] + u[5] - u[0] - u[2] - u[4]))
                / self.izz;
    }

    fn eval_phix(&self, t: f64, x: &[f64], phix: &mut [f64]) {
        let r = self.reference(t);
        for i in 0..12 {
            phix[i] = self.q_terminal[i] * (x[i] - r[i]);
        }
    }

    fn eval_hx(&self, t: f64, x: &[f64], u: &[f64], lmd: &[f64], hx: &mut [f64]) {
        let (s3, c3) = x[3].sin_cos();
        let (s4, c4) = x[4].sin_cos();
        let (s5, c5) = x[5].sin_cos();
        let thrust = (u[0] + u[1] + u[2] + u[3] + u[4] + u[5]) / self.m;
        let lift6 = lmd[6] * thrust;
        let lift7 = lmd[7] * thrust;
        let lift8 = lmd[8] * thrust;
        let roll_yaw = lmd[9] * (self.iyy - self.izz) / self.ixx;
        let pitch_yaw = lmd[10] * (self.izz - self.ixx) / self.iyy;
        let yaw_roll = lmd[11] * (self.ixx - self.iyy) / self.izz;
        let r = self.reference(t);

        for i in 0..3 {
            hx[i] = self.q[i] * (x[i] - r[i]);
        }
        hx[3] = self.q[3] * (x[3] - r[3])
            + lift6 * (-c5 * s3 * s4 + c3 * s5)
            + lift7 * (-c5 * c3 - s3 * s5 * s4)
            - lift8 * s3 * c4;
        hx[4] = self.q[4] * (x[4] - r[4])
            + lift6 * c5 * c3 * c4
            + lift7 * s5 * c3 * c4
            - lift8 * c3 * s4;
        hx[5] = self.q[5] * (x[5] - r[5])
            + lift6 * (c5 * s3 - s5 * c3 * s4)
            + lift7 * (c5 * c3 * s4 + s3 * s5);
        for i in 6..9 {
            hx[i] = lmd[i - 6] + self.q[i] * (x[i] - r[i]);
        }
        hx[9] = lmd[3] + self.q[9] * (x[9] - r[9]) + pitch_yaw * x[11] + yaw_roll * x[10];
        hx[10] = lmd[4] + self.q[10] * (x[10] - r[10]) + yaw_roll * x[9] + roll_yaw * x[11];
        hx[11] = lmd[5] + self.q[11] * (x[11] - r[11]) + pitch_yaw * x[9] + roll_yaw * x[10]
            - self.gamma * lmd[11] / self.izz;
    }

    fn eval_hu(&self, _t: f64, x: &[f64], uc: &[f64], lmd: &[f64], hu: &mut [f64]) {
        let (s3, c3) = x[3].sin_cos();
        let (s4, c4) = x[4].sin_cos();
        let (s5, c5) = x[5].sin_cos();
        let sqrt3 = 3.0f64.sqrt();
        let pitch = 0.5 * sqrt3 * self.l * lmd[10] / self.iyy;
        let roll = self.l * lmd[9] / self.ixx;
        let yaw = self.k * lmd[11] / self.izz;
        let lift = (lmd[6] * (c3 * s4 * c5 + s3 * s5)
            + lmd[7] * (c3 * s4 * s5 - s3 * c5)
            + lmd[8] * c3 * c4)
            / self.m;
        let hover = self.hover_thrust();

        hu[0] = self.r[0] * (uc[0] - hover) + lift - yaw - 0.5 * roll - pitch;
        hu[1] = self.r[1] * (uc[1] - hover) + lift + yaw - roll;
        hu[2] = self.r[2] * (uc[2] - hover) + lift - yaw - 0.5 * roll + pitch;
        hu[3] = self.r[3] * (uc[3] - hover) + lift + yaw + 0.5 * roll + pitch;
        hu[4] = self.r[4] * (uc[4] - hover) + lift - yaw + roll;
        hu[5] = self.r[5] * (uc[5] - hover) + lift + yaw + 0.5 * roll - pitch;
    }
}

const N: usize = 50;
const KMAX: usize = 6;

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
    // Grow the horizon into its nominal length: the early problems with a
    // short horizon are much better conditioned from hover.
    let horizon = Horizon::new(1.0, 1.0)?;

    let t0 = 0.0;
    let x0 = [0.0; 12];
    let hover = Hexacopter::default().hover_thrust();

    let mut initializer: ZeroHorizonSolver<Hexacopter, KMAX> =
        ZeroHorizonSolver::new(Hexacopter::default(), settings)?;
    initializer.set_uc(&[hover; 6])?;
    initializer.solve(t0, &x0)?;
    log::info!(
        "initializer done: opterr {:.3e} in {} iteration(s)",
        initializer.opterr(),
        initializer.iterations()
    );

    let mut mpc: MultipleShootingCgmres<Hexacopter, N, KMAX> =
        MultipleShootingCgmres::new(Hexacopter::default(), horizon, settings)?;
    mpc.set_uc(initializer.ucopt())?;
    mpc.init_x_lmd(t0, &x0)?;
    mpc.init_dummy_mu()?;

    let plant = Hexacopter::default();
    let sim_time = 10.0;
    let dt = settings.sampling_time;
    let steps = (sim_time / dt) as usize;

    let mut t = t0;
    let mut x = [0.0; 12];
    let mut dx = [0.0; 12];
    for k in 0..steps {
        let u = mpc.uopt()[0].clone_owned();
        plant.eval_f(t, &x, u.as_slice(), &mut dx);
        mpc.update(t, &x)?;
        for i in 0..12 {
            x[i] += dt * dx[i];
        }
        t += dt;

        if k % 1000 == 0 {
            let r = plant.reference(t);
            log::info!(
                "t = {t:5.2} s: pos ({:6.3}, {:6.3}, {:6.3}), ref ({:6.3}, {:6.3}, {:6.3}), opterr {:.3e}",
                x[0],
                x[1],
                x[2],
                r[0],
                r[1],
                r[2],
                mpc.opterr()
            );
        }
    }

    let r = plant.reference(t);
    log::info!(
        "final tracking error after {sim_time} s: ({:.4}, {:.4}, {:.4})",
        x[0] - r[0],
        x[1] - r[1],
        x[2] - r[2]
    );
    println!("\n{mpc}");
    Ok(())
}
