//! Matrix-free GMRES restricted to a small Krylov subspace.
//!
//! The continuation update only needs the linear system solved to the
//! accuracy of the finite-difference Jacobian, so the subspace dimension is
//! a compile-time constant of typically no more than ten and the solver
//! never restarts. The Arnoldi recursion uses modified Gram-Schmidt without
//! reorthogonalization, the projected least-squares problem is kept
//! triangular with Givens rotations, and the residual norm falls out of the
//! rotated right-hand side for free.

use nalgebra::{DMatrix, DVector};

use crate::Error;

/// A linear operator `v -> A * v`, typically a finite-difference
/// directional derivative of the optimality residual.
pub trait LinearOperator {
    /// Writes `A * v` into `out`.
    fn apply(&mut self, v: &DVector<f64>, out: &mut DVector<f64>);
}

/// Outcome of one GMRES solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GmresInfo {
    /// Arnoldi steps taken (dimension of the subspace actually used).
    pub iterations: usize,
    /// Estimated residual norm `||b - A * delta||` of the returned solution.
    pub residual: f64,
    /// The Arnoldi recursion broke down and the solve was truncated to the
    /// subspace built so far.
    pub breakdown: bool,
}

/// Subdiagonal magnitude below which the Arnoldi recursion is truncated.
const BREAKDOWN_FLOOR: f64 = 1e-15;

/// GMRES(KMAX) with a preallocated workspace for a fixed problem dimension.
///
/// The initial guess is always zero: the continuation law solves for a
/// correction, whose warm start is the zero vector.
#[derive(Debug)]
pub struct MatrixFreeGmres<const KMAX: usize> {
    /// Orthonormal Krylov basis, `KMAX + 1` vectors of the problem
    /// dimension.
    basis: Vec<DVector<f64>>,
    /// Upper Hessenberg projection, `(KMAX + 1) x KMAX`.
    hess: DMatrix<f64>,
    /// Givens rotation pairs applied left to right.
    givens: [(f64, f64); KMAX],
    /// Rotated right-hand side of the least-squares problem.
    rhs: DVector<f64>,
    /// Triangular back-substitution solution.
    y: DVector<f64>,
}

/// The rotation `(c, s)` with `c*a + s*b = r` and `-s*a + c*b = 0`.
#[inline]
fn plane_rotation(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else {
        let r = a.hypot(b);
        (a / r, b / r)
    }
}

impl<const KMAX: usize> MatrixFreeGmres<KMAX> {
    /// Allocates the workspace for systems of dimension `dim`.
    pub fn new(dim: usize) -> Result<Self, Error> {
        if KMAX == 0 || KMAX > dim {
            return Err(Error::InvalidKrylovDimension { kmax: KMAX, dim });
        }
        Ok(Self {
            basis: vec![DVector::zeros(dim); KMAX + 1],
            hess: DMatrix::zeros(KMAX + 1, KMAX),
            givens: [(0.0, 0.0); KMAX],
            rhs: DVector::zeros(KMAX + 1),
            y: DVector::zeros(KMAX),
        })
    }

    /// Solves `A * delta = b` from the zero initial guess.
    ///
    /// `rel_tol > 0` terminates early once the residual estimate drops
    /// below `rel_tol * ||b||`; zero runs all `KMAX` Arnoldi steps. A
    /// subdiagonal breakdown truncates the subspace and is reported in the
    /// returned info rather than treated as an error; non-finite Krylov
    /// quantities are.
    pub fn solve<A: LinearOperator>(
        &mut self,
        op: &mut A,
        b: &DVector<f64>,
        delta: &mut DVector<f64>,
        rel_tol: f64,
    ) -> Result<GmresInfo, Error> {
        delta.fill(0.0);

        let beta = b.norm();
        if !beta.is_finite() {
            return Err(Error::NonFinite("gmres right-hand side"));
        }
        if beta <= BREAKDOWN_FLOOR {
            return Ok(GmresInfo {
                iterations: 0,
                residual: beta,
                breakdown: false,
            });
        }

        self.hess.fill(0.0);
        self.rhs.fill(0.0);
        self.rhs[0] = beta;
        self.basis[0].copy_from(b);
        self.basis[0].unscale_mut(beta);

        let mut k = 0;
        let mut breakdown = false;
        for j in 0..KMAX {
            // Arnoldi step: w = A * v_j, orthogonalized against the basis.
            let (head, tail) = self.basis.split_at_mut(j + 1);
            let w = &mut tail[0];
            op.apply(&head[j], w);
            for (i, vi) in head.iter().enumerate() {
                let hij = w.dot(vi);
                self.hess[(i, j)] = hij;
                w.axpy(-hij, vi, 1.0);
            }
            let subdiag = w.norm();
            if !subdiag.is_finite() {
                return Err(Error::NonFinite("krylov basis"));
            }
            self.hess[(j + 1, j)] = subdiag;

            // Keep the projected problem triangular: old rotations on the
            // new column, then a fresh rotation zeroing the subdiagonal.
            for i in 0..j {
                let (c, s) = self.givens[i];
                let hi = self.hess[(i, j)];
                let hi1 = self.hess[(i + 1, j)];
                self.hess[(i, j)] = c * hi + s * hi1;
                self.hess[(i + 1, j)] = -s * hi + c * hi1;
            }
            let (c, s) = plane_rotation(self.hess[(j, j)], self.hess[(j + 1, j)]);
            self.givens[j] = (c, s);
            self.hess[(j, j)] = c * self.hess[(j, j)] + s * self.hess[(j + 1, j)];
            self.hess[(j + 1, j)] = 0.0;
            let g = self.rhs[j];
            self.rhs[j] = c * g;
            self.rhs[j + 1] = -s * g;

            k = j + 1;
            if subdiag <= BREAKDOWN_FLOOR {
                breakdown = true;
                break;
            }
            self.basis[j + 1].unscale_mut(subdiag);
            if rel_tol > 0.0 && self.rhs[j + 1].abs() <= rel_tol * beta {
                break;
            }
        }

        // Back-substitution on the triangularized Hessenberg block.
        for i in (0..k).rev() {
            let mut sum = self.rhs[i];
            for l in (i + 1)..k {
                sum -= self.hess[(i, l)] * self.y[l];
            }
            let diag = self.hess[(i, i)];
            self.y[i] = if diag.abs() > BREAKDOWN_FLOOR {
                sum / diag
            } else {
                0.0
            };
        }
        for i in 0..k {
            delta.axpy(self.y[i], &self.basis[i], 1.0);
        }

        Ok(GmresInfo {
            iterations: k,
            residual: self.rhs[k].abs(),
            breakdown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct Dense {
        a: DMatrix<f64>,
    }

    impl LinearOperator for Dense {
        fn apply(&mut self, v: &DVector<f64>, out: &mut DVector<f64>) {
            out.gemv(1.0, &self.a, v, 0.0);
        }
    }

    fn spd(dim: usize) -> DMatrix<f64> {
        // Diagonally dominant symmetric matrix, positive definite by
        // construction.
        let mut m = DMatrix::zeros(dim, dim);
        for i in 0..dim {
            for j in 0..dim {
                m[(i, j)] = 1.0 / (1.0 + (i as f64 - j as f64).abs());
            }
            m[(i, i)] += dim as f64;
        }
        m
    }

    fn rhs(dim: usize) -> DVector<f64> {
        DVector::from_fn(dim, |i, _| 1.0 + (i as f64 * 0.7).sin())
    }

    #[test]
    fn full_subspace_solve_is_exact_for_spd_systems() {
        const KMAX: usize = 6;
        let dim = KMAX;
        let a = spd(dim);
        let b = rhs(dim);
        let mut op = Dense { a: a.clone() };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);

        let info = gmres.solve(&mut op, &b, &mut delta, 0.0).unwrap();

        let residual = (&b - &a * &delta).norm();
        assert!(
            residual <= 1e-12 * b.norm(),
            "residual {residual} too large (estimate {})",
            info.residual
        );
    }

    #[test]
    fn converges_in_as_many_steps_as_distinct_eigenvalues() {
        const KMAX: usize = 3;
        let dim = 12;
        // Diagonal operator with exactly three distinct eigenvalues: the
        // Krylov space saturates after three steps.
        let a = DMatrix::from_fn(dim, dim, |i, j| {
            if i == j {
                [1.0, 4.0, 9.0][i % 3]
            } else {
                0.0
            }
        });
        let b = rhs(dim);
        let mut op = Dense { a: a.clone() };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);

        gmres.solve(&mut op, &b, &mut delta, 0.0).unwrap();

        let residual = (&b - &a * &delta).norm();
        assert!(
            residual <= 1e-12 * b.norm(),
            "residual {residual} too large"
        );
    }

    #[test]
    fn residual_estimate_tracks_true_residual() {
        const KMAX: usize = 4;
        let dim = 30;
        let a = spd(dim);
        let b = rhs(dim);
        let mut op = Dense { a: a.clone() };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);

        let info = gmres.solve(&mut op, &b, &mut delta, 0.0).unwrap();

        let residual = (&b - &a * &delta).norm();
        assert_abs_diff_eq!(info.residual, residual, epsilon = 1e-9 * b.norm());
        assert_eq!(info.iterations, KMAX);
    }

    #[test]
    fn identity_operator_breaks_down_happily_after_one_step() {
        const KMAX: usize = 4;
        let dim = 8;
        let a = DMatrix::identity(dim, dim);
        let b = rhs(dim);
        let mut op = Dense { a };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);

        let info = gmres.solve(&mut op, &b, &mut delta, 0.0).unwrap();

        assert!(info.breakdown);
        assert_eq!(info.iterations, 1);
        assert_abs_diff_eq!((&delta - &b).norm(), 0.0, epsilon = 1e-13);
    }

    #[test]
    fn zero_rhs_returns_zero_without_iterating() {
        const KMAX: usize = 3;
        let dim = 5;
        let mut op = Dense { a: spd(dim) };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::from_element(dim, 7.0);

        let info = gmres.solve(&mut op, &DVector::zeros(dim), &mut delta, 0.0).unwrap();

        assert_eq!(info.iterations, 0);
        assert!(delta.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn early_termination_respects_the_tolerance() {
        const KMAX: usize = 20;
        let dim = 25;
        let a = spd(dim);
        let b = rhs(dim);
        let mut op = Dense { a: a.clone() };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);

        let info = gmres.solve(&mut op, &b, &mut delta, 1e-6).unwrap();

        assert!(info.iterations < KMAX);
        let residual = (&b - &a * &delta).norm();
        assert!(residual <= 1e-5 * b.norm());
    }

    #[test]
    fn repeated_solves_are_bit_identical() {
        const KMAX: usize = 5;
        let dim = 16;
        let a = spd(dim);
        let b = rhs(dim);
        let mut op = Dense { a };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();

        let mut first = DVector::zeros(dim);
        let mut second = DVector::from_element(dim, -3.0);
        let info_a = gmres.solve(&mut op, &b, &mut first, 0.0).unwrap();
        let info_b = gmres.solve(&mut op, &b, &mut second, 0.0).unwrap();

        assert_eq!(info_a, info_b);
        assert_eq!(first.as_slice(), second.as_slice());
    }

    #[test]
    fn non_finite_rhs_is_a_numerical_failure() {
        const KMAX: usize = 2;
        let dim = 4;
        let mut op = Dense { a: spd(dim) };
        let mut gmres: MatrixFreeGmres<KMAX> = MatrixFreeGmres::new(dim).unwrap();
        let mut delta = DVector::zeros(dim);
        let mut b = rhs(dim);
        b[2] = f64::NAN;

        assert_eq!(
            gmres.solve(&mut op, &b, &mut delta, 0.0),
            Err(Error::NonFinite("gmres right-hand side"))
        );
    }

    #[test]
    fn oversized_subspace_is_a_configuration_error() {
        assert_eq!(
            MatrixFreeGmres::<9>::new(6).err(),
            Some(Error::InvalidKrylovDimension { kmax: 9, dim: 6 })
        );
    }
}
