use ambit_solid::active::{ActiveStress, ActiveStressParameters};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{Matrix3, Vector3};

fn parameters() -> ActiveStressParameters<f64> {
    ActiveStressParameters {
        sigma0: 100.0,
        alpha_max: 15.0,
        alpha_min: -30.0,
    }
}

#[test]
fn activation_rate_interpolates_between_rates() {
    let active = ActiveStress::new(parameters(), 0.5);
    assert_scalar_eq!(active.activation_rate(1.0), 15.0, comp = float);
    assert_scalar_eq!(active.activation_rate(0.0), -30.0, comp = float);
    assert_scalar_eq!(active.activation_rate(0.5), -7.5, comp = float);
}

#[test]
fn tension_approaches_contractility_under_full_activation() {
    let mut active = ActiveStress::new(parameters(), 1.0);
    let dt = 1e-3;
    for _ in 0..2000 {
        active.update(dt, 1.0, 1.0);
        active.commit();
    }
    assert_scalar_eq!(active.tension(), 100.0, comp = abs, tol = 1e-6);
}

#[test]
fn backward_euler_update_matches_closed_form() {
    let mut active = ActiveStress::new(parameters(), 1.0);
    let dt = 0.01;
    active.update(dt, 1.0, 0.0);
    // (tau - 0) / dt = -15 tau + 100 * 15
    assert_scalar_eq!(active.tension(), 1500.0 / (100.0 + 15.0), comp = float);
}

#[test]
fn tension_relaxes_during_deactivation() {
    let mut active = ActiveStress::new(parameters(), 0.5);
    active.set_tension(50.0);
    let dt = 1e-3;
    for _ in 0..500 {
        active.update(dt, 0.0, 0.0);
        active.commit();
    }
    // Exponential decay with rate |alpha_min| over 0.5 s
    assert_scalar_eq!(active.tension(), 50.0 * (-15.0f64).exp(), comp = abs, tol = 1e-6);
}

#[test]
fn reset_discards_uncommitted_update() {
    let mut active = ActiveStress::new(parameters(), 0.5);
    active.update(0.01, 1.0, 1.0);
    assert!(active.tension() > 0.0);
    active.reset();
    assert_eq!(active.tension(), 0.0);
}

#[test]
#[allow(non_snake_case)]
fn active_stress_acts_along_fibers() {
    let mut active = ActiveStress::new(parameters(), 0.5);
    active.set_tension(10.0);
    let fiber = Vector3::new(0.0, 1.0, 0.0);
    let F = Matrix3::new(1.1, 0.0, 0.0, 0.0, 1.2, 0.0, 0.0, 0.0, 0.9);

    let S = active.second_piola_kirchhoff(&fiber);
    let mut expected = Matrix3::zeros();
    expected[(1, 1)] = 10.0;
    assert_matrix_eq!(S, expected, comp = float);

    let P = active.first_piola_kirchhoff(&F, &fiber);
    expected[(1, 1)] = 12.0;
    assert_matrix_eq!(P, expected, comp = float);

    let a = Vector3::new(0.5, 2.0, 1.0);
    let b = Vector3::new(1.0, -1.0, 3.0);
    let contraction = active.stress_contraction(&a, &b, &fiber);
    assert_matrix_eq!(contraction, Matrix3::identity() * -20.0, comp = float);
}
