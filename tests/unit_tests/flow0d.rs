use ambit::config::{ModelKind, ModelParams, SolverParams, TimeParams};
use ambit::flow0d::problem::{Flow0DProblem, OutputSettings};
use ambit::flow0d::{
    create_model, initial_state, Cardiovascular0D, ChamberModel, ChamberModels, Evaluation, PeriodicCheck,
    Perturbation, PerturbationKind, Syspul, SyspulParameters, Valve, ValveLaw, ValveLaws, ValveResistance,
    WindkesselParameters,
};
use ambit::optimize::calculus::{approximate_jacobian, VectorFunctionBuilder};
use ambit::time_curves::{TimeCurveSpec, TimeCurves};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::collections::BTreeMap;
use std::path::Path;

fn syspul(dir: &Path) -> (Syspul, TimeCurves, BTreeMap<String, f64>) {
    let config = crate::heart_cycle_config(dir, 500);
    let model = match config.model.kind {
        ModelKind::Syspul {
            parameters,
            chamber_models,
            valve_laws,
            bleeding,
        } => Syspul::new(parameters, chamber_models, valve_laws, bleeding).unwrap(),
        other => panic!("unexpected model {:?}", other),
    };
    (
        model,
        TimeCurves::from_specs(&config.time_curves).unwrap(),
        config.time.initial_conditions,
    )
}

fn output(dir: &Path, simname: &str) -> OutputSettings {
    OutputSettings {
        path: dir.to_path_buf(),
        simname: simname.to_string(),
        write_results_every: 1,
        write_restart_every: None,
    }
}

fn time_params(maxtime: f64, numstep: usize, conditions: BTreeMap<String, f64>) -> TimeParams {
    let json = serde_json::json!({ "maxtime": maxtime, "numstep": numstep });
    TimeParams {
        initial_conditions: conditions,
        ..serde_json::from_value::<TimeParams>(json).unwrap()
    }
}

fn assert_jacobians_match(model: &dyn Cardiovascular0D, s: &DVector<f64>, t: f64, curves: &TimeCurves) {
    let n = model.num_dof();
    let mut evaluation = Evaluation::zeros(n);
    model.evaluate(s, t, curves, &mut evaluation);

    let component = |select_df: bool| {
        let mut scratch = Evaluation::zeros(n);
        VectorFunctionBuilder::with_dimension(n).with_function(
            move |f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>| {
                model.evaluate(&x.clone_owned(), t, curves, &mut scratch);
                if select_df {
                    f.copy_from(&scratch.df);
                } else {
                    f.copy_from(&scratch.f);
                }
            },
        )
    };
    let h = 1e-6;
    let df_jacobian = approximate_jacobian(component(true), s, &h);
    let f_jacobian = approximate_jacobian(component(false), s, &h);

    let scale = |m: &DMatrix<f64>| m.amax().max(1.0);
    assert_matrix_eq!(
        evaluation.df_jacobian,
        df_jacobian,
        comp = abs,
        tol = 1e-6 * scale(&df_jacobian)
    );
    assert_matrix_eq!(
        evaluation.f_jacobian,
        f_jacobian,
        comp = abs,
        tol = 1e-6 * scale(&f_jacobian)
    );
}

#[test]
fn two_element_windkessel_matches_discrete_decay() {
    let dir = tempfile::tempdir().unwrap();
    let parameters: WindkesselParameters = serde_json::from_str(r#"{ "c": 2.0, "r": 0.5 }"#).unwrap();
    let model = create_model(&ModelParams {
        kind: ModelKind::Windkessel2El { parameters },
        perturbation: None,
    })
    .unwrap();
    let curves = TimeCurves::new().with_curve(1, |_t: f64| 0.0);
    let conditions = BTreeMap::from([("p_0".to_string(), 10.0)]);
    let time = time_params(1.0, 20, conditions);
    let mut problem = Flow0DProblem::new(model, curves, &time, output(dir.path(), "wk"), None).unwrap();

    let dt = problem.dt();
    let a = dt / (2.0 * 0.5 * 2.0);
    let factor = (1.0 - a) / (1.0 + a);
    let mut expected = 10.0;
    problem.initialize(0.0);
    for step in 1..=20 {
        let t = step as f64 * dt;
        problem
            .solve_step(t, 0.5, &SolverParams::default())
            .unwrap();
        problem.update(t, 0.5);
        expected *= factor;
        assert_scalar_eq!(problem.s[0], expected, comp = abs, tol = 1e-10);
    }
}

#[test]
fn four_element_windkessel_jacobians() {
    let parameters: WindkesselParameters =
        serde_json::from_str(r#"{ "c": 1.5, "r": 0.8, "z": 0.05, "l": 0.01, "p_ref": 0.2 }"#).unwrap();
    let curves = TimeCurves::new().with_curve(1, |t: f64| 3.0 * t);
    for kind in [
        ModelKind::Windkessel4ElLsZ {
            parameters: parameters.clone(),
        },
        ModelKind::Windkessel4ElLpZ {
            parameters: parameters.clone(),
        },
    ] {
        let model = create_model(&ModelParams {
            kind,
            perturbation: None,
        })
        .unwrap();
        let s = DVector::from_fn(model.num_dof(), |i, _| 1.3 - 0.3 * i as f64);
        assert_jacobians_match(model.as_ref(), &s, 0.4, &curves);
    }
}

#[test]
fn windkessel_without_inertance_is_rejected() {
    let parameters: WindkesselParameters = serde_json::from_str(r#"{ "c": 1.0, "r": 1.0 }"#).unwrap();
    assert!(create_model(&ModelParams {
        kind: ModelKind::Windkessel4ElLsZ { parameters },
        perturbation: None,
    })
    .is_err());
}

#[test]
fn smooth_valve_law_derivative() {
    let valve = ValveResistance {
        law: ValveLaw::SmoothPresResistance { epsilon: 0.1 },
        r_min: 1e-3,
        r_max: 10.0,
    };
    let (r_open, _) = valve.evaluate(5.0, false);
    let (r_closed, _) = valve.evaluate(-5.0, false);
    assert_scalar_eq!(r_open, 1e-3, comp = abs, tol = 1e-9);
    assert_scalar_eq!(r_closed, 10.0, comp = abs, tol = 1e-9);

    let dp = 0.03;
    let h = 1e-7;
    let (_, dr) = valve.evaluate(dp, false);
    let fd = (valve.evaluate(dp + h, false).0 - valve.evaluate(dp - h, false).0) / (2.0 * h);
    assert_scalar_eq!(dr, fd, comp = abs, tol = 1e-5 * fd.abs());
}

#[test]
fn piecewise_linear_valve_laws() {
    let pressure = ValveResistance {
        law: ValveLaw::PwlinPres,
        r_min: 1.0,
        r_max: 100.0,
    };
    assert_eq!(pressure.evaluate(0.0, false), (1.0, 0.0));
    assert_eq!(pressure.evaluate(-1e-9, true), (100.0, 0.0));

    let time = ValveResistance {
        law: ValveLaw::PwlinTime,
        ..pressure
    };
    assert_eq!(time.evaluate(-5.0, true), (1.0, 0.0));
    assert_eq!(time.evaluate(5.0, false), (100.0, 0.0));
}

#[test]
fn syspul_jacobians_match_finite_differences() {
    let dir = tempfile::tempdir().unwrap();
    let (model, curves, conditions) = syspul(dir.path());
    let mut s = initial_state(&model, &conditions).unwrap();
    // Nonzero fluxes and pressure differences close to the valve transitions
    for (i, value) in s.iter_mut().enumerate() {
        *value += 0.01 * (i as f64 + 1.0);
    }
    for t in [0.1, 0.35, 0.6] {
        assert_jacobians_match(&model, &s, t, &curves);
    }
}

#[test]
fn syspul_interface_chamber() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _, _) = syspul(dir.path());
    let parameters: SyspulParameters = model.parameters().clone();
    let chamber_models = ChamberModels {
        lv: ChamberModel::Interface,
        ..Default::default()
    };
    let mut model = Syspul::new(parameters, chamber_models, ValveLaws::default(), None).unwrap();

    assert_eq!(model.interface_slots(), vec![3]);
    assert_eq!(model.interface_pressure_names(), vec!["p_v_l".to_string()]);
    assert_eq!(model.variable_names()[3], "V_v_l");
    assert!(model.set_interface_pressures(&[1.0, 2.0]).is_err());
    model.set_interface_pressures(&[12.0]).unwrap();

    // Without an initial volume for the interface chamber, it starts from zero
    let (_, _, conditions) = syspul(dir.path());
    let s = initial_state(&model, &conditions).unwrap();
    assert_eq!(s[3], 0.0);

    // The aortic valve row sees the imposed ventricular pressure
    let mut s = s;
    s[3] = 5.0e4;
    let mut evaluation = Evaluation::zeros(16);
    model.evaluate(&s, 0.3, &TimeCurves::new(), &mut evaluation);
    let dp = 12.0 - s[4];
    let r_min = model.parameters().r_vout_l_min;
    assert_scalar_eq!(evaluation.f[2], r_min * s[2] - dp, comp = abs, tol = 1e-12);
    assert_eq!(evaluation.df[3], 5.0e4);
}

#[test]
fn syspul_conserves_total_volume() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::heart_cycle_config(dir.path(), 500);
    let mut problem = Flow0DProblem::from_config(&config).unwrap();
    let dt = problem.dt();
    let total_volume = |problem: &Flow0DProblem, t: f64| {
        problem
            .model()
            .compartment_volumes(&problem.s, t, problem.curves())
            .into_iter()
            .find(|(name, _)| name == "V_all")
            .map(|(_, volume)| volume)
            .unwrap()
    };

    problem.initialize(0.0);
    let v0 = total_volume(&problem, 0.0);
    for step in 1..=250 {
        let t = step as f64 * dt;
        let theta = problem.integrator().theta_for_step(step);
        problem.solve_step(t, theta, &config.solver).unwrap();
        problem.update(t, theta);
        assert_scalar_eq!(total_volume(&problem, t), v0, comp = abs, tol = 1e-8 * v0);
    }
}

#[test]
fn bleeding_drains_total_volume() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::heart_cycle_config(dir.path(), 500);
    if let ModelKind::Syspul { bleeding, .. } = &mut config.model.kind {
        *bleeding = serde_json::from_str(r#"{ "start": 0.1, "duration": 0.2, "volume_loss": 1.0e5 }"#).unwrap();
    }
    let mut problem = Flow0DProblem::from_config(&config).unwrap();
    let dt = problem.dt();
    let total_volume = |problem: &Flow0DProblem, t: f64| {
        let volumes = problem
            .model()
            .compartment_volumes(&problem.s, t, problem.curves());
        volumes.last().unwrap().1
    };

    problem.initialize(0.0);
    let v0 = total_volume(&problem, 0.0);
    for step in 1..=200 {
        let t = step as f64 * dt;
        let theta = problem.integrator().theta_for_step(step);
        problem.solve_step(t, theta, &config.solver).unwrap();
        problem.update(t, theta);
    }
    // The window edges are resolved to within half a step
    let edge_tolerance = dt * 1.0e5 / 0.2;
    assert_scalar_eq!(total_volume(&problem, 0.4), v0 - 1.0e5, comp = abs, tol = edge_tolerance);
}

#[test]
fn perturbations_modify_valve_resistances() {
    let dir = tempfile::tempdir().unwrap();
    let (mut model, _, _) = syspul(dir.path());
    let r_min = model.valve_resistance(Valve::Av).r_min;
    model
        .apply_perturbation(&Perturbation {
            kind: PerturbationKind::Stenosis { factor: 5.0 },
            valve: Valve::Av,
            after_cycle: 1,
        })
        .unwrap();
    assert_scalar_eq!(model.valve_resistance(Valve::Av).r_min, 5.0 * r_min, comp = float);

    model
        .apply_perturbation(&Perturbation {
            kind: PerturbationKind::Regurgitation { r_max: 1e-3 },
            valve: Valve::Mv,
            after_cycle: 1,
        })
        .unwrap();
    assert_eq!(model.valve_resistance(Valve::Mv).r_max, 1e-3);

    let invalid = Perturbation {
        kind: PerturbationKind::Stenosis { factor: -1.0 },
        valve: Valve::Pv,
        after_cycle: 1,
    };
    assert!(model.apply_perturbation(&invalid).is_err());

    let json = r#"{ "type": "regurgitation", "r_max": 0.01, "valve": "av", "after_cycle": 2 }"#;
    let parsed: Perturbation = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.kind, PerturbationKind::Regurgitation { r_max: 0.01 });
    assert_eq!(parsed.valve, Valve::Av);
}

#[test]
fn windkessel_does_not_support_perturbations() {
    let parameters: WindkesselParameters = serde_json::from_str(r#"{ "c": 1.0, "r": 1.0 }"#).unwrap();
    let mut model = create_model(&ModelParams {
        kind: ModelKind::Windkessel2El { parameters },
        perturbation: None,
    })
    .unwrap();
    let perturbation = Perturbation {
        kind: PerturbationKind::Stenosis { factor: 2.0 },
        valve: Valve::Mv,
        after_cycle: 1,
    };
    assert!(model.apply_perturbation(&perturbation).is_err());
}

#[test]
fn missing_initial_condition_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _, mut conditions) = syspul(dir.path());
    conditions.remove("p_ar_sys_0");
    let err = initial_state(&model, &conditions).unwrap_err();
    assert!(format!("{}", err).contains("p_ar_sys_0"));
}

#[test]
fn periodicity_check_variables() {
    let dir = tempfile::tempdir().unwrap();
    let (model, _, _) = syspul(dir.path());
    assert_eq!(PeriodicCheck::AllVariables.indices(&model).unwrap().len(), 16);

    let check = PeriodicCheck::Variables(vec!["p_v_l".to_string(), "p_ar_sys".to_string()]);
    assert_eq!(check.indices(&model).unwrap(), vec![3, 4]);

    let check = PeriodicCheck::Variables(vec!["p_aorta".to_string()]);
    assert!(check.indices(&model).is_err());
}

#[test]
fn missing_activation_curve_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::heart_cycle_config(dir.path(), 500);
    config.time_curves.remove(&2);
    assert!(Flow0DProblem::from_config(&config).is_err());

    config.time_curves.insert(
        2,
        TimeCurveSpec::Constant { value: 0.0 },
    );
    assert!(Flow0DProblem::from_config(&config).is_ok());
}
