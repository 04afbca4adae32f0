//! Step-length limits from solution bounds.
//!
//! Each bound yields the largest fraction `theta` of the Newton update that
//! keeps every component inside it; the step is scaled by the smallest.

use nalgebra::DVector;

/// Global bounds applied to every solution component.
#[derive(Debug, Clone)]
pub struct ConstraintBt {
    min: f64,
    max: f64,
    change: f64,
    theta_bound_neg: f64,
    theta_bound_pos: f64,
    theta_change: f64,
}

impl ConstraintBt {
    pub fn new(min: f64, max: f64, change: f64) -> Self {
        Self {
            min,
            max,
            change,
            theta_bound_neg: f64::MAX,
            theta_bound_pos: f64::MAX,
            theta_change: f64::MAX,
        }
    }

    pub fn reset(&mut self) {
        self.theta_bound_neg = f64::MAX;
        self.theta_bound_pos = f64::MAX;
        self.theta_change = f64::MAX;
    }

    /// Largest step fraction keeping every decreasing component above `min`.
    pub fn update_theta_bound_neg(&mut self, x: &DVector<f64>, dx: &DVector<f64>) {
        self.theta_bound_neg = x
            .iter()
            .zip(dx.iter())
            .filter(|&(_, &d)| d < 0.0)
            .map(|(&xi, &d)| (self.min - xi) / d)
            .fold(f64::MAX, f64::min);
    }

    /// Largest step fraction keeping every increasing component below `max`.
    pub fn update_theta_bound_pos(&mut self, x: &DVector<f64>, dx: &DVector<f64>) {
        self.theta_bound_pos = x
            .iter()
            .zip(dx.iter())
            .filter(|&(_, &d)| d > 0.0)
            .map(|(&xi, &d)| (self.max - xi) / d)
            .fold(f64::MAX, f64::min);
    }

    /// `min_i change·|x_i| / |dx_i|` over components that move.
    pub fn update_theta_change(&mut self, x: &DVector<f64>, dx: &DVector<f64>) {
        self.theta_change = x
            .iter()
            .zip(dx.iter())
            .filter(|&(&xi, &d)| d.abs() > f64::MIN_POSITIVE && xi.abs() > 0.0)
            .map(|(&xi, &d)| self.change * xi.abs() / d.abs())
            .fold(f64::MAX, f64::min);
    }

    pub fn theta_bound_neg(&self) -> f64 {
        self.theta_bound_neg
    }

    pub fn theta_bound_pos(&self) -> f64 {
        self.theta_bound_pos
    }

    pub fn theta_change(&self) -> f64 {
        self.theta_change
    }

    /// Step scale in `(0, 1]` satisfying all three bounds.
    pub fn step_scale(&mut self, x: &DVector<f64>, dx: &DVector<f64>) -> f64 {
        self.update_theta_bound_neg(x, dx);
        self.update_theta_bound_pos(x, dx);
        self.update_theta_change(x, dx);
        let theta = self
            .theta_bound_neg
            .min(self.theta_bound_pos)
            .min(self.theta_change);
        theta.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn bounds_limit_the_step() {
        let mut c = ConstraintBt::new(-1.0, 1.0, f64::MAX);
        let x = dvector![0.0, 0.5];
        let dx = dvector![-2.0, 1.0];
        let scale = c.step_scale(&x, &dx);
        assert!((c.theta_bound_neg() - 0.5).abs() < 1e-15);
        assert!((c.theta_bound_pos() - 0.5).abs() < 1e-15);
        assert!((scale - 0.5).abs() < 1e-15);
    }

    #[test]
    fn relative_change_limit() {
        let mut c = ConstraintBt::new(-f64::MAX, f64::MAX, 0.1);
        let x = dvector![2.0, 0.0];
        let dx = dvector![1.0, 5.0];
        let scale = c.step_scale(&x, &dx);
        // 0.1 * 2 / 1; the zero component does not constrain
        assert!((scale - 0.2).abs() < 1e-15);
    }

    #[test]
    fn unconstrained_step_is_full() {
        let mut c = ConstraintBt::new(-f64::MAX, f64::MAX, f64::MAX);
        assert_eq!(c.step_scale(&dvector![1.0], &dvector![0.3]), 1.0);
    }
}
