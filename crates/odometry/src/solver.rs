//! Levenberg-Marquardt minimization of the weighted point-to-geometry
//! objective over a 6-DoF ZYX pose.
//!
//! The damping schedule follows Madsen, Nielsen and Tingleff, "Methods for
//! non-linear least squares problems" (2004): gain-ratio controlled damping
//! with gradient and step-size stopping rules.

use crate::matching::Residual;
use nalgebra::{Cholesky, Matrix3x6, Matrix6, Vector3, Vector6};
use transforms::{rotation_zyx, rotation_zyx_partials};

/// Gradient infinity-norm stopping threshold.
const EPS_GRADIENT: f64 = 1e-10;
/// Relative step-size stopping threshold.
const EPS_STEP: f64 = 1e-10;
/// Initial damping scale relative to the largest Hessian diagonal entry.
const TAU: f64 = 1e-3;
/// A normal system whose smallest eigenvalue falls below this fraction of
/// the largest is treated as singular.
const SINGULAR_RATIO: f64 = 1e-12;

/// Result of one LM run.
#[derive(Debug, Clone)]
pub struct LmOutcome {
    /// Optimized pose parameters (rx, ry, rz, tx, ty, tz)
    pub pose: Vector6<f64>,
    /// Iterations actually performed
    pub iterations: usize,
    /// Final objective value
    pub final_cost: f64,
    /// Stopped on a gradient or step criterion (rather than the iteration cap)
    pub converged: bool,
    /// The linear system was singular; the pose is the last accepted one
    pub singular: bool,
}

/// Objective value at a pose.
pub fn cost(pose: &Vector6<f64>, residuals: &[Residual]) -> f64 {
    let rot = rotation_zyx(pose[0], pose[1], pose[2]);
    let t = Vector3::new(pose[3], pose[4], pose[5]);
    residuals
        .iter()
        .map(|r| {
            let e = rot * r.x + t - r.p;
            r.weight * (e.transpose() * r.a * e)[(0, 0)]
        })
        .sum()
}

/// Per-term point-to-geometry distances at a pose (square roots of the
/// Mahalanobis-style terms, unweighted).
pub fn term_distances(pose: &Vector6<f64>, residuals: &[Residual]) -> Vec<f64> {
    let rot = rotation_zyx(pose[0], pose[1], pose[2]);
    let t = Vector3::new(pose[3], pose[4], pose[5]);
    residuals
        .iter()
        .map(|r| {
            let e = rot * r.x + t - r.p;
            (e.transpose() * r.a * e)[(0, 0)].max(0.0).sqrt()
        })
        .collect()
}

/// Assemble the damped normal equations at a pose: H and g with analytic
/// Jacobians of the ZYX parameterization.
fn normal_equations(
    pose: &Vector6<f64>,
    residuals: &[Residual],
) -> (Matrix6<f64>, Vector6<f64>) {
    let rot = rotation_zyx(pose[0], pose[1], pose[2]);
    let partials = rotation_zyx_partials(pose[0], pose[1], pose[2]);
    let t = Vector3::new(pose[3], pose[4], pose[5]);

    let mut h = Matrix6::zeros();
    let mut g = Vector6::zeros();

    for r in residuals {
        let e = rot * r.x + t - r.p;

        let mut jac = Matrix3x6::zeros();
        for c in 0..3 {
            jac.set_column(c, &(partials[c] * r.x));
        }
        for c in 0..3 {
            jac[(c, c + 3)] = 1.0;
        }

        let wa = r.a * r.weight;
        h += jac.transpose() * wa * jac;
        g += jac.transpose() * wa * e;
    }

    (h, g)
}

/// Minimize the objective starting from `initial`, for at most `max_iter`
/// iterations.
pub fn minimize(
    initial: Vector6<f64>,
    residuals: &[Residual],
    max_iter: usize,
) -> LmOutcome {
    let mut pose = initial;
    let mut current_cost = cost(&pose, residuals);
    let mut outcome = LmOutcome {
        pose,
        iterations: 0,
        final_cost: current_cost,
        converged: false,
        singular: false,
    };

    let mut mu: Option<f64> = None;
    let mut nu = 2.0;

    for iter in 0..max_iter {
        outcome.iterations = iter + 1;

        let (h, g) = normal_equations(&pose, residuals);

        if g.amax() < EPS_GRADIENT {
            outcome.converged = true;
            break;
        }

        let eig = h.symmetric_eigen().eigenvalues;
        let (lambda_min, lambda_max) = (eig.min(), eig.max());
        if !lambda_min.is_finite() || lambda_min < SINGULAR_RATIO * lambda_max.max(1.0) {
            outcome.singular = true;
            break;
        }

        let mu_val = *mu.get_or_insert_with(|| TAU * h.diagonal().max());

        let mut damped = h;
        for i in 0..6 {
            damped[(i, i)] += mu_val;
        }

        let step = match Cholesky::new(damped) {
            Some(chol) => chol.solve(&(-g)),
            None => {
                outcome.singular = true;
                break;
            }
        };

        if step.norm() <= EPS_STEP * (pose.norm() + EPS_STEP) {
            outcome.converged = true;
            break;
        }

        let candidate = pose + step;
        let candidate_cost = cost(&candidate, residuals);

        // Gain ratio: actual versus predicted reduction.
        let predicted = 0.5 * step.dot(&(step * mu_val - g));
        let rho = if predicted.abs() > f64::EPSILON {
            (current_cost - candidate_cost) / predicted
        } else {
            -1.0
        };

        if rho > 0.0 && candidate_cost.is_finite() {
            pose = candidate;
            current_cost = candidate_cost;
            mu = Some(mu_val * (1.0f64 / 3.0).max(1.0 - (2.0 * rho - 1.0).powi(3)));
            nu = 2.0;
        } else {
            mu = Some(mu_val * nu);
            nu *= 2.0;
        }
    }

    outcome.pose = pose;
    outcome.final_cost = current_cost;
    outcome
}
