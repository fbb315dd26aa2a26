use ambit::coupling::{ChamberStructure, PressureLoad, SolidFlow0DProblem, SolidFlow0DSolver, SphericalChamber};
use ambit::config::SolverParams;
use ambit::io::{read_series, results_path};
use ambit::optimize::newton::NewtonError;
use ambit::solid::active::ActiveStressParameters;
use ambit::solid::growth::{GrowthDirection, GrowthParameters, GrowthTrigger};
use ambit::solid::materials::HolzapfelOgdenParameters;
use ambit::solid::viscous::StrainRateViscosity;
use ambit::time_curves::TimeCurves;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DVector, Matrix3, Vector3};

const CAVITY_VOLUME: f64 = 6.0e4;
const WALL_VOLUME: f64 = 1.0e5;

fn growth_parameters() -> GrowthParameters<f64> {
    GrowthParameters {
        tau_gr: 1.0,
        tau_gr_rev: 1.0,
        gamma_gr: 2.0,
        gamma_gr_rev: 2.0,
        thetamax: 1.5,
        thetamin: 0.8,
        thres_tol: 0.0,
        tol_res_local: 1e-12,
        tol_inc_local: 1e-12,
    }
}

fn passive_chamber() -> SphericalChamber {
    SphericalChamber::new(CAVITY_VOLUME, WALL_VOLUME, HolzapfelOgdenParameters::default()).unwrap()
}

fn growing_chamber() -> SphericalChamber {
    passive_chamber()
        .with_growth(GrowthDirection::Fiber, GrowthTrigger::FiberStretch, growth_parameters())
        .unwrap()
}

/// A chamber with every stress contribution and a nontrivial prestress and growth state.
fn loaded_chamber() -> SphericalChamber {
    let active = ActiveStressParameters {
        sigma0: 30.0,
        alpha_max: 15.0,
        alpha_min: -30.0,
    };
    let mut chamber = growing_chamber()
        .with_active_stress(active, 1, 0.5)
        .with_viscosity(StrainRateViscosity { eta: 0.05 });
    chamber.prestress_update(&DVector::from_element(1, 1.02));
    chamber.set_growth_stretch(1.1);
    let curves = TimeCurves::new().with_curve(1, |_t: f64| 1.0);
    chamber.prepare_step(0.5, 0.01, &curves).unwrap();
    chamber.set_stretch(1.03);
    chamber
}

fn assert_tangent_matches_finite_differences(chamber: &SphericalChamber, theta: f64, pressure: f64) {
    for stretch in [0.95, 1.0, 1.05] {
        let h = 1e-6;
        let fd = (chamber.equilibrium_residual(stretch + h, theta, pressure)
            - chamber.equilibrium_residual(stretch - h, theta, pressure))
            / (2.0 * h);
        let tangent = chamber.equilibrium_tangent(stretch, theta, pressure);
        assert_scalar_eq!(tangent, fd, comp = abs, tol = 1e-6 * fd.abs().max(1.0));
    }
}

#[test]
fn unloaded_reference_configuration_is_in_equilibrium() {
    let chamber = passive_chamber();
    assert_scalar_eq!(chamber.equilibrium_residual(1.0, 1.0, 0.0), 0.0, comp = abs, tol = 1e-8);
    assert!(chamber.equilibrium_residual(1.05, 1.0, 0.0) > 0.0);
    assert!(chamber.equilibrium_residual(0.95, 1.0, 0.0) < 0.0);
    assert_scalar_eq!(chamber.cavity_volume(1.1), CAVITY_VOLUME * 1.331, comp = abs, tol = 1e-6);
    assert_scalar_eq!(chamber.tissue_volume(), WALL_VOLUME, comp = abs, tol = 1e-8);
}

#[test]
fn invalid_volumes_are_rejected() {
    assert!(SphericalChamber::new(0.0, WALL_VOLUME, HolzapfelOgdenParameters::default()).is_err());
    assert!(SphericalChamber::new(CAVITY_VOLUME, -1.0, HolzapfelOgdenParameters::default()).is_err());
}

#[test]
fn follower_load_tangent() {
    let chamber = loaded_chamber();
    assert!(chamber.active_tension() > 0.0);
    assert_eq!(chamber.load(), PressureLoad::Follower);
    assert_tangent_matches_finite_differences(&chamber, 1.1, 2.0);
}

#[test]
fn dead_load_tangent() {
    let chamber = loaded_chamber().quasi_static();
    assert_eq!(chamber.load(), PressureLoad::Dead { reference_stretch: 1.03 });
    assert_tangent_matches_finite_differences(&chamber, 1.1, 2.0);
}

#[test]
fn structure_stiffness_is_consistent_with_residual() {
    let chamber = loaded_chamber();
    let u = DVector::from_element(1, 1.04);
    let p = DVector::from_element(1, 3.0);
    let (k_uu, k_up) = chamber.stiffness(&u, &p);

    let h = 1e-6;
    let residual = |u: f64, p: f64| chamber.residual(&DVector::from_element(1, u), &DVector::from_element(1, p))[0];
    let du = (residual(1.04 + h, 3.0) - residual(1.04 - h, 3.0)) / (2.0 * h);
    let dp = (residual(1.04, 3.0 + h) - residual(1.04, 3.0 - h)) / (2.0 * h);
    assert_scalar_eq!(k_uu[(0, 0)], du, comp = abs, tol = 1e-6 * du.abs());
    assert_scalar_eq!(k_up[(0, 0)], dp, comp = abs, tol = 1e-6 * dp.abs());

    let dv = chamber.volume_derivative(&u);
    let volume = |u: f64| chamber.chamber_volumes(&DVector::from_element(1, u))[0];
    let fd = (volume(1.04 + h) - volume(1.04 - h)) / (2.0 * h);
    assert_scalar_eq!(dv[(0, 0)], fd, comp = abs, tol = 1e-6 * fd);
}

#[test]
fn prestress_update_imprints_stretch() {
    let mut chamber = passive_chamber();
    let reset = chamber.prestress_update(&DVector::from_element(1, 1.1));
    assert_eq!(reset, DVector::from_element(1, 1.0));
    assert_eq!(chamber.stretch(), 1.0);

    let expected = Matrix3::from_diagonal(&Vector3::new(1.1, 1.1, 1.0 / 1.21));
    assert_matrix_eq!(*chamber.prestress_history(), expected, comp = abs, tol = 1e-14);
    // The reference geometry is unchanged
    assert_eq!(chamber.cavity_volume(1.0), CAVITY_VOLUME);
    assert_scalar_eq!(chamber.tissue_volume(), WALL_VOLUME, comp = abs, tol = 1e-8);
    // The imprinted stretch carries stress
    assert!(chamber.equilibrium_residual(1.0, 1.0, 0.0) > 0.0);
}

#[test]
fn growth_under_elevated_pressure() {
    let mut chamber = growing_chamber();
    chamber.capture_set_point(&DVector::from_element(1, 1.0), &DVector::from_element(1, 0.0));
    assert_scalar_eq!(chamber.growth_threshold().unwrap(), 1.0, comp = abs, tol = 1e-14);
    let volume_before = chamber.tissue_volume();

    let summary = chamber
        .solve_growth(2.0, 5, 1.0, 0.0, &SolverParams::default())
        .unwrap();
    assert_eq!(summary.steps, 5);
    assert!(summary.stretch > 1.0);
    assert!(summary.theta > 1.0 && summary.theta < 1.5);
    assert_eq!(chamber.growth_stretch(), summary.theta);
    assert_eq!(chamber.stretch(), summary.stretch);
    assert!(chamber.tissue_volume() > volume_before);
    assert_scalar_eq!(chamber.tissue_volume(), WALL_VOLUME * summary.theta, comp = abs, tol = 1e-6);

    // The accepted state is in equilibrium with the grown configuration
    let residual = chamber.equilibrium_residual(summary.stretch, summary.theta, 2.0);
    assert!(residual.abs() < 1e-4, "residual {}", residual);
}

#[test]
fn growth_requires_threshold() {
    let mut chamber = growing_chamber();
    assert!(chamber
        .solve_growth(2.0, 1, 1.0, 0.0, &SolverParams::default())
        .is_err());
    let mut chamber = passive_chamber();
    chamber.capture_set_point(&DVector::from_element(1, 1.0), &DVector::from_element(1, 0.0));
    assert!(chamber.growth_threshold().is_none());
    assert!(chamber
        .solve_growth(2.0, 1, 1.0, 0.0, &SolverParams::default())
        .is_err());
}

#[test]
fn quasi_static_copy_adopts_set_point() {
    let mut small = loaded_chamber();
    let u = DVector::from_element(1, 1.04);
    let p = DVector::from_element(1, 1.5);
    small.update(&u);
    small.capture_set_point(&u, &p);
    let set_point = small.set_point().unwrap();
    assert_eq!(set_point.stretch, 1.04);
    assert_eq!(set_point.pressure, 1.5);
    assert_eq!(set_point.tension, small.active_tension());

    let mut large = growing_chamber().with_active_stress(
        ActiveStressParameters {
            sigma0: 30.0,
            alpha_max: 15.0,
            alpha_min: -30.0,
        },
        1,
        0.5,
    );
    large.set_growth_stretch(1.1);
    assert!(passive_chamber().adopt_set_point(&large, true).is_err());

    large.adopt_set_point(&small, true).unwrap();
    assert_eq!(large.stretch(), 1.04);
    assert_eq!(large.load(), PressureLoad::Dead { reference_stretch: 1.04 });
    assert_eq!(large.active_tension(), small.active_tension());
    assert_eq!(large.prestress_history(), small.prestress_history());
    assert_eq!(large.growth_threshold(), small.growth_threshold());

    // The dead load at the set point reproduces the follower load of the small scale, whose
    // viscous stress vanishes at the accepted stretch
    assert_scalar_eq!(
        large.equilibrium_residual(1.04, 1.1, 1.5),
        small.equilibrium_residual(1.04, 1.1, 1.5),
        comp = abs,
        tol = 1e-8
    );
}

#[test]
fn chamber_checkpoint_restores_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chamber.json");
    let mut chamber = loaded_chamber();
    let u = DVector::from_element(1, 1.04);
    chamber.update(&u);
    chamber.capture_set_point(&u, &DVector::from_element(1, 1.5));
    let chamber = chamber.quasi_static();
    chamber.write_checkpoint(&path).unwrap();

    let mut restored = growing_chamber().with_active_stress(
        ActiveStressParameters {
            sigma0: 30.0,
            alpha_max: 15.0,
            alpha_min: -30.0,
        },
        1,
        0.5,
    );
    restored.read_checkpoint(&path).unwrap();
    assert_eq!(restored.stretch(), chamber.stretch());
    assert_eq!(restored.growth_stretch(), chamber.growth_stretch());
    assert_eq!(restored.growth_threshold(), chamber.growth_threshold());
    assert_eq!(restored.active_tension(), chamber.active_tension());
    assert_eq!(restored.set_point(), chamber.set_point());
    assert_eq!(restored.load(), chamber.load());
    assert_matrix_eq!(*restored.prestress_history(), *chamber.prestress_history(), comp = float);

    assert!(restored.read_checkpoint(&dir.path().join("missing.json")).is_err());
}

#[test]
fn output_values() {
    let chamber = loaded_chamber();
    let values = chamber.output_values(&DVector::from_element(1, 1.02));
    let names: Vec<&str> = values.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["lambda", "tau_a", "theta"]);
    assert_eq!(values[0].1, 1.02);
    assert_eq!(values[2].1, 1.1);
}

#[test]
fn coupled_step_satisfies_volume_constraint() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::coupled_config(dir.path(), 1.0, 500);
    config.time.numstep_stop = Some(250);
    let problem = SolidFlow0DProblem::from_config(&config).unwrap();
    assert_eq!(problem.num_chambers(), 1);
    assert_scalar_eq!(problem.pressures[0], 0.599950804034, comp = float);

    let mut solver = SolidFlow0DSolver::new(problem, config.solver.clone());
    let summary = solver.solve_problem().unwrap();
    assert_eq!(summary.last_step, 250);
    let problem = solver.into_problem();

    // Prestressing imprinted the initial pressure into the wall
    assert!(problem.structure.prestress_history()[(0, 0)] > 1.0);

    let slot = problem.flow0d.model().interface_slots()[0];
    let volume = problem.structure.cavity_volume(problem.u[0]);
    assert_scalar_eq!(volume, problem.flow0d.s[slot], comp = abs, tol = 1e-8 * volume);
    assert!(problem.pressures[0].is_finite());
    assert!(problem.structure.active_tension() > 0.0);

    let residual = problem.structure.residual(&problem.u, &problem.pressures);
    assert!(residual[0].abs() < 1e-6, "structural residual {}", residual[0]);

    for name in ["p_v_l", "lambda", "tau_a", "theta", "V_v_l", "p_at_l"] {
        let series = read_series(results_path(dir.path(), "coupled", name)).unwrap();
        assert_eq!(series.len(), 250, "results of {}", name);
    }
}

#[test]
fn failed_coupled_step_leaves_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::coupled_config(dir.path(), 1.0, 500);
    let mut problem = SolidFlow0DProblem::from_config(&config).unwrap();
    problem.initialize(0.0);
    let (u, pressures, s) = (problem.u.clone(), problem.pressures.clone(), problem.flow0d.s.clone());

    let starved = SolverParams {
        maxiter: 1,
        tol_res: 1e-14,
        tol_inc: 1e-14,
        ..SolverParams::default()
    };
    let err = problem.solve_step(0.002, 1.0, &starved).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<NewtonError>(),
        Some(NewtonError::MaximumIterationsReached(1))
    ));
    assert_eq!(problem.u, u);
    assert_eq!(problem.pressures, pressures);
    assert_eq!(problem.flow0d.s, s);

    // The interface pressures of the 0D model were restored, so the step can be retried
    problem.solve_step(0.002, 1.0, &config.solver).unwrap();
    let slot = problem.flow0d.model().interface_slots()[0];
    let volume = problem.structure.cavity_volume(problem.u[0]);
    assert_scalar_eq!(volume, problem.flow0d.s[slot], comp = abs, tol = 1e-8 * volume);
}

#[test]
fn coupled_restart_continues_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::coupled_config(dir.path(), 1.0, 500);
    config.time.numstep_stop = Some(60);
    config.io.write_restart_every = Some(30);

    let mut solver = SolidFlow0DSolver::new(SolidFlow0DProblem::from_config(&config).unwrap(), config.solver.clone());
    solver.solve_problem().unwrap();
    let full = solver.into_problem();

    config.io.restart_step = 30;
    let mut solver = SolidFlow0DSolver::new(SolidFlow0DProblem::from_config(&config).unwrap(), config.solver.clone());
    let summary = solver.solve_problem().unwrap();
    assert_eq!(summary.last_step, 60);
    let restarted = solver.into_problem();

    assert_eq!(
        restarted.structure.prestress_history(),
        full.structure.prestress_history()
    );
    assert_scalar_eq!(restarted.u[0], full.u[0], comp = abs, tol = 1e-8);
    assert_scalar_eq!(
        restarted.pressures[0],
        full.pressures[0],
        comp = abs,
        tol = 1e-6 * full.pressures[0].abs()
    );
}

#[test]
fn interface_count_must_match_structure() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::coupled_config(dir.path(), 1.0, 500);
    config.model = crate::heart_cycle_config(dir.path(), 500).model;
    assert!(SolidFlow0DProblem::from_config(&config).is_err());
}
