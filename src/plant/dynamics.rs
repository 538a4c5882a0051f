//! Nonlinear three-tank cascade model
//!
//! Each tank is a truncated cone whose radius grows linearly from `r` at the
//! bottom to `R` at height `H`. Outflow follows Torricelli's law:
//!
//! ```text
//! qo_i     = gamma_i * sqrt(h_i)            (0 when h_i <= 0)
//! area_i   = pi * (r_i + (R_i - r_i) / H_i * h_i)^2
//!
//! dh1/dt = (u1 - qo1 - u2) / area_1
//! dh2/dt = (u2 - qo2 - u3) / area_2
//! dh3/dt = (u3 - qo3)      / area_3
//! de_i/dt = href_i - h_i
//! ```
//!
//! `u2` and `u3` appear twice: as the inflow of the next tank and as a drain
//! on the previous one.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::state::{AugmentedState, ControlVector, ReferenceVector, TANKS};

/// Physical constants of one conical tank
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankConstants {
    /// Outflow coefficient
    pub gamma: f64,
    /// Bottom radius `r`
    pub r_bottom: f64,
    /// Top radius `R`
    pub r_top: f64,
    /// Height `H` at which the radius reaches `r_top`
    pub height: f64,
}

impl TankConstants {
    pub fn new(gamma: f64, r_bottom: f64, r_top: f64, height: f64) -> Self {
        Self {
            gamma,
            r_bottom,
            r_top,
            height,
        }
    }

    /// Outflow through the bottom orifice. Non-positive levels drain nothing.
    #[inline]
    pub fn outflow(&self, level: f64) -> f64 {
        outflow(self.gamma, level)
    }

    /// Horizontal cross-section at `level`
    #[inline]
    pub fn area(&self, level: f64) -> f64 {
        cross_section_area(self.r_bottom, self.r_top, self.height, level)
    }
}

impl Default for TankConstants {
    fn default() -> Self {
        Self::new(0.1, 1.0, 2.0, 3.0)
    }
}

/// `gamma * sqrt(h)` for `h > 0`, exactly zero otherwise
#[inline]
pub fn outflow(gamma: f64, level: f64) -> f64 {
    if level > 0.0 {
        gamma * level.sqrt()
    } else {
        0.0
    }
}

/// Cross-section of a cone with radius interpolated linearly in `level`
///
/// Not clamped: callers keep `r_bottom > 0` so the area never vanishes at
/// `level = 0`.
#[inline]
pub fn cross_section_area(r_bottom: f64, r_top: f64, height: f64, level: f64) -> f64 {
    let radius = r_bottom + ((r_top - r_bottom) / height) * level;
    PI * radius * radius
}

/// The three tanks of one plant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TankModel {
    pub tanks: [TankConstants; TANKS],
}

impl TankModel {
    pub fn new(tanks: [TankConstants; TANKS]) -> Self {
        Self { tanks }
    }

    /// Time derivative of the augmented state
    ///
    /// Pure: `u` and `href` are treated as constants for the call.
    pub fn derivative(
        &self,
        x: &AugmentedState,
        u: &ControlVector,
        href: &ReferenceVector,
    ) -> AugmentedState {
        let [t1, t2, t3] = &self.tanks;
        let (h1, h2, h3) = (x[0], x[1], x[2]);

        let mut dx = AugmentedState::zeros();
        dx[0] = (u[0] - t1.outflow(h1) - u[1]) / t1.area(h1);
        dx[1] = (u[1] - t2.outflow(h2) - u[2]) / t2.area(h2);
        dx[2] = (u[2] - t3.outflow(h3)) / t3.area(h3);
        dx[3] = href[0] - h1;
        dx[4] = href[1] - h2;
        dx[5] = href[2] - h3;
        dx
    }
}

impl Default for TankModel {
    fn default() -> Self {
        Self::new([TankConstants::default(); TANKS])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_outflow_law() {
        assert_eq!(outflow(0.1, 0.0), 0.0);
        assert_relative_eq!(outflow(0.1, 4.0), 0.2, epsilon = 1e-15);

        let negative = outflow(0.1, -1.0);
        assert_eq!(negative, 0.0);
        assert!(!negative.is_nan());
    }

    #[test]
    fn test_area_law() {
        let tank = TankConstants::new(0.1, 1.0, 2.0, 3.0);
        assert_relative_eq!(tank.area(0.0), PI, epsilon = 1e-12);
        assert_relative_eq!(tank.area(3.0), 4.0 * PI, epsilon = 1e-12);

        let mut prev = tank.area(0.0);
        for i in 1..=300 {
            let a = tank.area(i as f64 * 0.01);
            assert!(a >= prev, "area decreased at h={}", i as f64 * 0.01);
            prev = a;
        }
    }

    #[test]
    fn test_zero_state_is_fixed_point() {
        let model = TankModel::default();
        let dx = model.derivative(
            &AugmentedState::zeros(),
            &ControlVector::zeros(),
            &ReferenceVector::zeros(),
        );
        assert_eq!(dx, AugmentedState::zeros());
    }

    #[test]
    fn test_cascade_coupling() {
        // u2 drains tank 1 and feeds tank 2 by the same amount
        let model = TankModel::default();
        let x = AugmentedState::zeros();
        let u = ControlVector::new(0.0, 1.0, 0.0);
        let dx = model.derivative(&x, &u, &ReferenceVector::zeros());

        assert_relative_eq!(dx[0], -1.0 / PI, epsilon = 1e-12);
        assert_relative_eq!(dx[1], 1.0 / PI, epsilon = 1e-12);
        assert_eq!(dx[2], 0.0);
    }

    #[test]
    fn test_error_integrator_rates() {
        let model = TankModel::default();
        let x = AugmentedState::from_column_slice(&[1.0, 1.0, 1.0, 7.0, 8.0, 9.0]);
        let href = ReferenceVector::new(1.5, 1.6, 1.4);
        let dx = model.derivative(&x, &ControlVector::zeros(), &href);

        assert_relative_eq!(dx[3], 0.5, epsilon = 1e-12);
        assert_relative_eq!(dx[4], 0.6, epsilon = 1e-12);
        assert_relative_eq!(dx[5], 0.4, epsilon = 1e-12);
    }

    #[test]
    fn test_per_tank_constants() {
        let model = TankModel::new([
            TankConstants::new(0.1, 1.0, 2.0, 3.0),
            TankConstants::new(0.2, 0.5, 0.5, 1.0),
            TankConstants::new(0.0, 1.0, 1.0, 1.0),
        ]);
        let x = AugmentedState::from_column_slice(&[1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);
        let dx = model.derivative(&x, &ControlVector::zeros(), &ReferenceVector::zeros());

        // cylinder of radius 0.5
        assert_relative_eq!(dx[1], -0.2 / (PI * 0.25), epsilon = 1e-12);
        // no orifice
        assert_eq!(dx[2], 0.0);
    }
}
