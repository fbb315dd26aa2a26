use ambit_solid::growth::{GrowthDirection, GrowthError, GrowthLaw, GrowthParameters, GrowthTrigger};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{Matrix3, Vector3};

fn parameters() -> GrowthParameters<f64> {
    GrowthParameters {
        tau_gr: 1.0,
        tau_gr_rev: 2.0,
        gamma_gr: 2.0,
        gamma_gr_rev: 2.0,
        thetamax: 1.5,
        thetamin: 0.8,
        thres_tol: 1e-3,
        tol_res_local: 1e-12,
        tol_inc_local: 1e-12,
    }
}

#[test]
fn growth_tensors() {
    let fiber = Vector3::new(1.0, 0.0, 0.0);
    let theta = 1.2;
    assert_matrix_eq!(
        GrowthDirection::Isotropic.growth_tensor(theta, &fiber),
        Matrix3::identity() * 1.2,
        comp = float
    );
    assert_matrix_eq!(
        GrowthDirection::Fiber.growth_tensor(theta, &fiber),
        Matrix3::from_diagonal(&Vector3::new(1.2, 1.0, 1.0)),
        comp = float
    );
    assert_matrix_eq!(
        GrowthDirection::CrossFiber.growth_tensor(theta, &fiber),
        Matrix3::from_diagonal(&Vector3::new(1.0, 1.2, 1.2)),
        comp = float
    );
}

#[test]
fn growth_tensor_derivative_matches_finite_difference() {
    let fiber = Vector3::new(1.0, 2.0, 2.0) / 3.0;
    let h = 1e-6;
    for direction in [GrowthDirection::Isotropic, GrowthDirection::Fiber, GrowthDirection::CrossFiber] {
        let fd = (direction.growth_tensor(1.1 + h, &fiber) - direction.growth_tensor(1.1 - h, &fiber)) / (2.0 * h);
        assert_matrix_eq!(direction.growth_tensor_derivative(&fiber), fd, comp = abs, tol = 1e-8);
    }
}

#[test]
#[allow(non_snake_case)]
fn elastic_fiber_stretch_removes_fiber_growth() {
    let fiber = Vector3::new(0.0, 0.0, 1.0);
    let F = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, 1.3));
    let (stretch, dstretch) = GrowthDirection::Fiber.elastic_fiber_stretch(&F, &fiber, 1.3);
    assert_scalar_eq!(stretch, 1.0, comp = float);
    assert_scalar_eq!(dstretch, -1.0 / 1.3, comp = float);

    let (stretch, dstretch) = GrowthDirection::CrossFiber.elastic_fiber_stretch(&F, &fiber, 1.3);
    assert_scalar_eq!(stretch, 1.3, comp = float);
    assert_eq!(dstretch, 0.0);

    let (stretch, _) = GrowthTrigger::Prescribed(1.05).evaluate(GrowthDirection::Fiber, &F, &fiber, 1.3);
    assert_eq!(stretch, 1.05);
}

#[test]
fn no_growth_inside_threshold_band() {
    let law = GrowthLaw::new(parameters()).unwrap();
    assert_eq!(law.growth_rate(1.1, 1.0005, 1.0), 0.0);
    let theta = law.integrate(1.1, 0.1, 1.0, |_| (1.0005, 0.0)).unwrap();
    assert_eq!(theta, 1.1);
}

#[test]
fn growth_and_reverse_growth_branches() {
    let law = GrowthLaw::new(parameters()).unwrap();
    // Growth: k = (0.5 / 0.5)^2 / 1 at theta = 1
    assert_scalar_eq!(law.growth_rate(1.0, 1.1, 1.0), 0.1, comp = float);
    // Reverse growth: k = (0.2 / 0.2)^2 / 2 at theta = 1
    assert_scalar_eq!(law.growth_rate(1.0, 0.9, 1.0), -0.05, comp = float);
    // Growth saturates at the bounds
    assert_eq!(law.growth_rate(1.5, 1.1, 1.0), 0.0);
    assert_eq!(law.growth_rate(0.8, 0.9, 1.0), 0.0);
}

#[test]
fn backward_euler_growth_satisfies_discrete_law() {
    let law = GrowthLaw::new(parameters()).unwrap();
    let dt = 0.5;
    let theta_old = 1.0;
    // Trigger depends on growth, as for fiber growth under fixed total stretch 1.2
    let trigger = |theta: f64| (1.2 / theta, -1.2 / (theta * theta));
    let theta = law.integrate(theta_old, dt, 1.0, trigger).unwrap();

    assert!(theta > 1.0 && theta < 1.2);
    let (phi, _) = trigger(theta);
    let rate = law.growth_rate(theta, phi, 1.0);
    assert_scalar_eq!(theta - theta_old, dt * rate, comp = abs, tol = 1e-10);
}

#[test]
fn growth_is_clamped_to_bounds() {
    let law = GrowthLaw::new(parameters()).unwrap();
    let theta = law.integrate(1.49, 100.0, 1.0, |_| (3.0, 0.0)).unwrap();
    assert!(theta <= 1.5);
    let theta = law.integrate(0.81, 100.0, 1.0, |_| (0.1, 0.0)).unwrap();
    assert!(theta >= 0.8);
}

#[test]
fn invalid_growth_parameters_are_rejected() {
    let params = GrowthParameters {
        thetamax: 0.9,
        ..parameters()
    };
    assert!(matches!(GrowthLaw::new(params), Err(GrowthError::InvalidParameters(_))));
}
