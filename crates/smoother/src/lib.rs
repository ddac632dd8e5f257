//! Pose smoothing downstream of the odometry estimator.
//!
//! A linear Kalman filter over a constant-velocity model: the state is the
//! 6-DoF pose plus its velocity. The estimator's committed poses arrive as
//! measurements; the filter absorbs sweep-to-sweep jitter and can predict
//! through short gaps.
//!
//! The filter treats the Euler angles as unwrapped small-motion channels,
//! which holds for consecutive sweep poses; it is a consumer of the
//! odometry output, not part of its correctness contract.

use nalgebra::{SMatrix, SVector};
use tracing::trace;
use types::Pose;

type State = SVector<f64, 12>;
type StateCov = SMatrix<f64, 12, 12>;
type Meas = SVector<f64, 6>;
type MeasCov = SMatrix<f64, 6, 6>;
type MeasJac = SMatrix<f64, 6, 12>;

/// Smoother tuning knobs.
#[derive(Debug, Clone)]
pub struct SmootherConfig {
    /// Velocity process noise, translational channels (m/s per sqrt(s))
    pub process_noise_pos: f64,
    /// Velocity process noise, rotational channels (rad/s per sqrt(s))
    pub process_noise_rot: f64,
    /// Measurement noise, translational channels (m)
    pub meas_noise_pos: f64,
    /// Measurement noise, rotational channels (rad)
    pub meas_noise_rot: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            process_noise_pos: 0.5,
            process_noise_rot: 0.1,
            meas_noise_pos: 0.05,
            meas_noise_rot: 0.01,
        }
    }
}

/// Constant-velocity Kalman filter over sweep poses.
pub struct PoseSmoother {
    config: SmootherConfig,
    /// [rx, ry, rz, tx, ty, tz, and their velocities]
    state: State,
    covariance: StateCov,
    initialized: bool,
}

impl PoseSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            state: State::zeros(),
            covariance: StateCov::identity(),
            initialized: false,
        }
    }

    /// Builder-style measurement noise override.
    pub fn with_measurement_noise(mut self, pos: f64, rot: f64) -> Self {
        self.config.meas_noise_pos = pos;
        self.config.meas_noise_rot = rot;
        self
    }

    /// Current smoothed pose.
    pub fn pose(&self) -> Pose {
        Pose::new(
            self.state[0],
            self.state[1],
            self.state[2],
            self.state[3],
            self.state[4],
            self.state[5],
        )
    }

    /// Current velocity estimate (pose units per second).
    pub fn velocity(&self) -> [f64; 6] {
        [
            self.state[6],
            self.state[7],
            self.state[8],
            self.state[9],
            self.state[10],
            self.state[11],
        ]
    }

    /// Predict the pose `dt` seconds ahead without changing filter state.
    pub fn predict(&self, dt: f64) -> Pose {
        Pose::new(
            self.state[0] + self.state[6] * dt,
            self.state[1] + self.state[7] * dt,
            self.state[2] + self.state[8] * dt,
            self.state[3] + self.state[9] * dt,
            self.state[4] + self.state[10] * dt,
            self.state[5] + self.state[11] * dt,
        )
    }

    /// Reset to an uninitialized state.
    pub fn reset(&mut self) {
        self.state = State::zeros();
        self.covariance = StateCov::identity();
        self.initialized = false;
    }

    /// Absorb one committed sweep pose, `dt` seconds after the previous one.
    /// Returns the smoothed pose.
    pub fn update(&mut self, measured: &Pose, dt: f64) -> Pose {
        let z = Meas::from_column_slice(&measured.as_array());

        if !self.initialized || dt <= 0.0 {
            self.state.fixed_rows_mut::<6>(0).copy_from(&z);
            self.state.fixed_rows_mut::<6>(6).fill(0.0);
            self.covariance = StateCov::identity();
            self.initialized = true;
            return self.pose();
        }

        // Predict with the constant-velocity transition.
        let mut f = StateCov::identity();
        for i in 0..6 {
            f[(i, i + 6)] = dt;
        }
        let q = self.process_noise(dt);
        self.state = f * self.state;
        self.covariance = f * self.covariance * f.transpose() + q;

        // Correct with the measured pose.
        let mut h = MeasJac::zeros();
        for i in 0..6 {
            h[(i, i)] = 1.0;
        }
        let r = self.measurement_noise();

        let innovation = z - h * self.state;
        let s = h * self.covariance * h.transpose() + r;
        let Some(s_inv) = s.try_inverse() else {
            // Degenerate innovation covariance; fall back to the measurement.
            self.state.fixed_rows_mut::<6>(0).copy_from(&z);
            return self.pose();
        };
        let k = self.covariance * h.transpose() * s_inv;

        self.state += k * innovation;
        self.covariance = (StateCov::identity() - k * h) * self.covariance;

        trace!(
            tx = self.state[3],
            ty = self.state[4],
            vz = self.state[11],
            "smoother update"
        );
        self.pose()
    }

    fn process_noise(&self, dt: f64) -> StateCov {
        let mut q = StateCov::zeros();
        for i in 0..6 {
            let sigma = if i < 3 {
                self.config.process_noise_rot
            } else {
                self.config.process_noise_pos
            };
            let s2 = sigma * sigma;
            // Piecewise-constant acceleration model.
            q[(i, i)] = s2 * dt * dt * dt / 3.0;
            q[(i, i + 6)] = s2 * dt * dt / 2.0;
            q[(i + 6, i)] = s2 * dt * dt / 2.0;
            q[(i + 6, i + 6)] = s2 * dt;
        }
        q
    }

    fn measurement_noise(&self) -> MeasCov {
        let mut r = MeasCov::zeros();
        for i in 0..6 {
            let sigma = if i < 3 {
                self.config.meas_noise_rot
            } else {
                self.config.meas_noise_pos
            };
            r[(i, i)] = sigma * sigma;
        }
        r
    }
}

impl Default for PoseSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}
