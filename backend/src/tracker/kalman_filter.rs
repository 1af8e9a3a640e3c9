use nalgebra::{ArrayStorage, Matrix, Matrix4, U1, U4, U8, Vector4};

type Matrix8<T> = Matrix<T, U8, U8, ArrayStorage<T, 8, 8>>;
type Vector8<T> = Matrix<T, U8, U1, ArrayStorage<T, 8, 1>>;
type Matrix4x8<T> = Matrix<T, U4, U8, ArrayStorage<T, 4, 8>>;

/// A constant velocity Kalman filter over `(cx, cy, aspect, height)` box measurements.
///
/// The state is the measurement plus its per-frame velocity.
#[derive(Debug, Clone)]
pub struct KalmanXYAH {
    pub(super) mean: Vector8<f32>,
    covariance: Matrix8<f32>,
    motion_mat: Matrix8<f32>,
    update_mat: Matrix4x8<f32>,
    std_weight_pos: f32,
    std_weight_vel: f32,
}

impl KalmanXYAH {
    pub fn new(measurement: Vector4<f32>) -> Self {
        let mut motion = Matrix8::<f32>::identity();
        for i in 0..4 {
            motion[(i, i + 4)] = 1.0;
        }

        let mut update = Matrix4x8::<f32>::zeros();
        for i in 0..4 {
            update[(i, i)] = 1.0;
        }

        let mut filter = Self {
            mean: Vector8::zeros(),
            covariance: Matrix8::identity(),
            motion_mat: motion,
            update_mat: update,
            std_weight_pos: 1.0 / 20.0,
            std_weight_vel: 1.0 / 160.0,
        };
        filter.initiate(measurement);
        filter
    }

    fn initiate(&mut self, measurement: Vector4<f32>) {
        self.mean = Vector8::zeros();
        self.mean.fixed_rows_mut::<4>(0).copy_from(&measurement);

        let h = measurement[3];
        let std = [
            2.0 * self.std_weight_pos * h,
            2.0 * self.std_weight_pos * h,
            1e-2,
            2.0 * self.std_weight_pos * h,
            10.0 * self.std_weight_vel * h,
            10.0 * self.std_weight_vel * h,
            1e-5,
            10.0 * self.std_weight_vel * h,
        ];

        self.covariance = Matrix8::zeros();
        for (i, std) in std.iter().enumerate() {
            self.covariance[(i, i)] = std * std;
        }
    }

    pub fn predict(&mut self) {
        let h = self.mean[3];
        let std = [
            self.std_weight_pos * h,
            self.std_weight_pos * h,
            1e-2,
            self.std_weight_pos * h,
            self.std_weight_vel * h,
            self.std_weight_vel * h,
            1e-5,
            self.std_weight_vel * h,
        ];

        let mut motion_cov = Matrix8::zeros();
        for i in 0..8 {
            motion_cov[(i, i)] = std[i] * std[i];
        }

        self.mean = self.motion_mat * self.mean;
        self.covariance =
            self.motion_mat * self.covariance * self.motion_mat.transpose() + motion_cov;
    }

    /// Corrects the state with `measurement`.
    ///
    /// A projected covariance that lost positive definiteness restarts the filter at the
    /// measurement instead of propagating NaNs into later predictions.
    pub fn update(&mut self, measurement: Vector4<f32>) {
        let (projected_mean, projected_cov) = self.project();
        let Some(chol) = projected_cov.cholesky() else {
            self.initiate(measurement);
            return;
        };
        let ph_t = self.covariance * self.update_mat.transpose();
        let kalman_gain = ph_t * chol.solve(&Matrix4::identity());
        let innovation = measurement - projected_mean;

        self.mean += kalman_gain * innovation;
        self.covariance -= kalman_gain * projected_cov * kalman_gain.transpose();
    }

    fn project(&self) -> (Vector4<f32>, Matrix4<f32>) {
        let h = self.mean[3];
        let r_std = [
            self.std_weight_pos * h,
            self.std_weight_pos * h,
            1e-1,
            self.std_weight_pos * h,
        ];

        let mut r = Matrix4::<f32>::zeros();
        for i in 0..4 {
            r[(i, i)] = r_std[i] * r_std[i];
        }

        let mean = self.update_mat * self.mean;
        let cov = self.update_mat * self.covariance * self.update_mat.transpose() + r;
        (mean, cov)
    }

    pub fn tlwh(&self) -> [f32; 4] {
        let cx = self.mean[0];
        let cy = self.mean[1];
        let a = self.mean[2];
        let h = self.mean[3];

        let w = a * h;
        let x = cx - w / 2.0;
        let y = cy - h / 2.0;

        [x, y, w, h]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stationary_box_predicts_in_place() {
        let mut filter = KalmanXYAH::new(Vector4::new(50.0, 50.0, 1.0, 20.0));
        filter.predict();

        let [x, y, w, h] = filter.tlwh();
        assert!((x - 40.0).abs() < 1e-3);
        assert!((y - 40.0).abs() < 1e-3);
        assert!((w - 20.0).abs() < 1e-3);
        assert!((h - 20.0).abs() < 1e-3);
    }

    #[test]
    fn moving_box_gains_velocity() {
        let mut filter = KalmanXYAH::new(Vector4::new(50.0, 50.0, 1.0, 20.0));
        for step in 1..10 {
            filter.predict();
            filter.update(Vector4::new(50.0, 50.0 + step as f32 * 5.0, 1.0, 20.0));
        }
        filter.predict();

        assert!(filter.mean[5] > 2.0);
        assert!(filter.tlwh()[1] > 80.0);
    }
}
