use super::*;
use ambit_solid::materials::{HolzapfelOgdenMaterial, LameParameters, NeoHookeanMaterial, YoungPoisson};
use ambit_solid::{contract_second_variation, HyperelasticMaterial};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{Matrix3, Vector3};
use proptest::prelude::*;

#[test]
fn lame_from_young_poisson() {
    let young_poisson = YoungPoisson {
        young: 1e3,
        poisson: 0.3,
    };
    let lame = LameParameters::from(young_poisson);

    assert_scalar_eq!(lame.mu, 384.6153846153846, comp = float);
    assert_scalar_eq!(lame.lambda, 576.9230769230769, comp = float);
}

#[test]
fn neo_hookean_reference_configuration_is_stress_free() {
    let identity = Matrix3::identity();
    let lame = lame_parameters();
    assert_scalar_eq!(
        NeoHookeanMaterial.compute_energy_density(&identity, &lame),
        0.0,
        comp = abs,
        tol = 1e-12
    );
    let stress = NeoHookeanMaterial.compute_stress_tensor(&identity, &lame);
    assert_matrix_eq!(stress, Matrix3::zeros(), comp = abs, tol = 1e-12);
}

#[test]
#[allow(non_snake_case)]
fn neo_hookean_stress_is_energy_gradient() {
    let F = deformation_gradient_3d();
    let lame = lame_parameters();
    let stress = NeoHookeanMaterial.compute_stress_tensor(&F, &lame);
    let stress_fd = energy_gradient_fd(|F| NeoHookeanMaterial.compute_energy_density(F, &lame), &F);
    assert_matrix_eq!(stress, stress_fd, comp = abs, tol = 1e-6 * stress_fd.amax());
}

#[test]
#[allow(non_snake_case)]
fn neo_hookean_contraction_matches_stress_derivative() {
    let F = deformation_gradient_3d();
    let lame = lame_parameters();
    let (a, b) = test_vectors();
    let contraction = NeoHookeanMaterial.compute_stress_contraction(&F, &a, &b, &lame);
    let contraction_fd = stress_contraction_fd(|F| NeoHookeanMaterial.compute_stress_tensor(F, &lame), &F, &a, &b);
    assert_matrix_eq!(contraction, contraction_fd, comp = abs, tol = 1e-6 * contraction_fd.amax());
}

#[test]
fn neo_hookean_inverted_deformation_gives_non_finite_stress() {
    let lame = lame_parameters();
    let stress = NeoHookeanMaterial.compute_stress_tensor(&Matrix3::zeros(), &lame);
    assert!(stress.iter().all(|s| !s.is_finite()));
}

#[test]
fn holzapfel_ogden_reference_configuration_is_stress_free() {
    let identity = Matrix3::identity();
    let params = holzapfel_ogden_parameters();
    assert_scalar_eq!(
        HolzapfelOgdenMaterial.compute_energy_density(&identity, &params),
        0.0,
        comp = abs,
        tol = 1e-12
    );
    let stress = HolzapfelOgdenMaterial.compute_stress_tensor(&identity, &params);
    assert_matrix_eq!(stress, Matrix3::zeros(), comp = abs, tol = 1e-12);
}

#[test]
#[allow(non_snake_case)]
fn holzapfel_ogden_stress_is_energy_gradient() {
    let F = moderate_deformation_gradient();
    let params = holzapfel_ogden_parameters();
    let stress = HolzapfelOgdenMaterial.compute_stress_tensor(&F, &params);
    let stress_fd = energy_gradient_fd(|F| HolzapfelOgdenMaterial.compute_energy_density(F, &params), &F);
    assert_matrix_eq!(stress, stress_fd, comp = abs, tol = 1e-6 * stress_fd.amax());
}

#[test]
#[allow(non_snake_case)]
fn holzapfel_ogden_contraction_matches_stress_derivative() {
    let F = moderate_deformation_gradient();
    let params = holzapfel_ogden_parameters();
    let (a, b) = test_vectors();
    let contraction = HolzapfelOgdenMaterial.compute_stress_contraction(&F, &a, &b, &params);
    let contraction_fd =
        stress_contraction_fd(|F| HolzapfelOgdenMaterial.compute_stress_tensor(F, &params), &F, &a, &b);
    assert_matrix_eq!(contraction, contraction_fd, comp = abs, tol = 1e-6 * contraction_fd.amax());
}

#[test]
#[allow(non_snake_case)]
fn holzapfel_ogden_fibers_do_not_resist_compression() {
    let params = holzapfel_ogden_parameters();
    let without_fibers = HolzapfelOgdenParameters {
        a_f: 0.0,
        ..params
    };
    let f0 = params.fiber;
    // Shortening along the fiber direction
    let F = Matrix3::identity() - f0 * f0.transpose() * 0.1;

    let psi = HolzapfelOgdenMaterial.compute_energy_density(&F, &params);
    let psi_without_fibers = HolzapfelOgdenMaterial.compute_energy_density(&F, &without_fibers);
    assert_scalar_eq!(psi, psi_without_fibers, comp = float);

    // ... whereas stretching the fibers stores additional energy
    let F = Matrix3::identity() + f0 * f0.transpose() * 0.1;
    let psi = HolzapfelOgdenMaterial.compute_energy_density(&F, &params);
    let psi_without_fibers = HolzapfelOgdenMaterial.compute_energy_density(&F, &without_fibers);
    assert!(psi > psi_without_fibers);
}

#[test]
#[allow(non_snake_case)]
fn second_variation_matches_directional_derivative() {
    let F = moderate_deformation_gradient();
    let params = holzapfel_ogden_parameters();
    let G = Matrix3::new(0.2, -0.1, 0.05, 0.3, 0.1, -0.2, 0.0, 0.15, 0.1);

    let second_variation = contract_second_variation(
        |a: &Vector3<f64>, b: &Vector3<f64>| HolzapfelOgdenMaterial.compute_stress_contraction(&F, a, b, &params),
        &G,
    );

    let h = 1e-6;
    let stress_plus = HolzapfelOgdenMaterial.compute_stress_tensor(&(F + G * h), &params);
    let stress_minus = HolzapfelOgdenMaterial.compute_stress_tensor(&(F - G * h), &params);
    let expected = ((stress_plus - stress_minus) / (2.0 * h)).dot(&G);
    assert_scalar_eq!(second_variation, expected, comp = abs, tol = 1e-6 * expected.abs());
}

proptest! {
    #[test]
    #[allow(non_snake_case)]
    fn holzapfel_ogden_contraction_is_symmetric(
        stretch in 0.9 .. 1.15f64,
        shear in -0.1 .. 0.1f64,
        a in prop::array::uniform3(-1.0 .. 1.0f64),
        b in prop::array::uniform3(-1.0 .. 1.0f64),
    ) {
        // The stress derives from a potential, so C(a, b) = C(b, a)^T
        let F = Matrix3::new(stretch, shear, 0.0,
                             0.0, 1.0 / stretch, shear,
                             0.0, 0.0, 1.0);
        let params = holzapfel_ogden_parameters();
        let a = Vector3::from(a);
        let b = Vector3::from(b);
        let c_ab = HolzapfelOgdenMaterial.compute_stress_contraction(&F, &a, &b, &params);
        let c_ba = HolzapfelOgdenMaterial.compute_stress_contraction(&F, &b, &a, &params);
        let tol = 1e-9 * (1.0 + c_ab.amax());
        prop_assert!((c_ab - c_ba.transpose()).amax() <= tol);
    }
}
