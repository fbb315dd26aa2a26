use ambit::config::{Config, ModelKind, ProblemType, TriggerPhase};
use ambit::flow0d::{ChamberModel, ValveLaw};
use std::path::Path;

const WINDKESSEL_INPUT: &str = r#"{
    "io": { "problem_type": "flow0d", "output_path": "out", "simname": "wk" },
    "time": { "maxtime": 1.0, "numstep": 100, "initial_conditions": { "p_0": 10.0 } },
    "model": { "modeltype": "2elwindkessel", "parameters": { "c": 1.0, "r": 2.0 } },
    "time_curves": { "1": { "type": "constant", "value": 0.0 } }
}"#;

#[test]
fn windkessel_input_with_defaults() {
    let config = Config::from_json_str(WINDKESSEL_INPUT).unwrap();
    assert_eq!(config.io.problem_type, ProblemType::Flow0D);
    assert_eq!(config.io.output_path_0d(), Path::new("out"));
    assert_eq!(config.io.write_results_every_0d(), 1);
    assert_eq!(config.io.restart_step, 0);
    assert_eq!(config.time.theta_ost, 0.5);
    assert!(!config.time.initial_backwardeuler);
    assert_eq!(config.time.dt(), 0.01);
    assert_eq!(config.solver.maxiter, 25);
    assert_eq!(config.solver.tol_res, 1.0e-8);
    assert_eq!(config.solver.ptc_maxiter, 250);

    let restart = config.solver.ptc_restart_settings();
    assert_eq!(restart.initial_shift, 0.1);
    assert_eq!(restart.max_iterations, Some(250));
    assert_eq!(restart.factor_range, (0.85, 1.35));

    match &config.model.kind {
        ModelKind::Windkessel2El { parameters } => {
            assert_eq!(parameters.c, 1.0);
            assert_eq!(parameters.r, 2.0);
            assert_eq!(parameters.p_ref, 0.0);
            assert_eq!(parameters.flux_curve, 1);
        }
        other => panic!("unexpected model {:?}", other),
    }
}

#[test]
fn syspul_input_with_chamber_models_and_valve_laws() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::coupled_config(dir.path(), 1.0, 100);
    assert_eq!(config.io.problem_type, ProblemType::SolidFlow0D);
    match &config.model.kind {
        ModelKind::Syspul {
            chamber_models,
            valve_laws,
            bleeding,
            ..
        } => {
            assert_eq!(chamber_models.lv, ChamberModel::Interface);
            assert_eq!(chamber_models.la, ChamberModel::Elastance { activation_curve: 1 });
            assert_eq!(valve_laws.av, ValveLaw::SmoothPresResistance { epsilon: 0.05 });
            assert!(bleeding.is_none());
        }
        other => panic!("unexpected model {:?}", other),
    }
    let structure = config.structure.as_ref().unwrap();
    assert_eq!(structure.prestress_numstep, Some(2));
    assert_eq!(structure.active_stress.unwrap().activation_curve, 2);
    assert!(structure.growth.is_none());
}

#[test]
fn growth_remodeling_input() {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::growth_remodeling_config(dir.path(), 3);
    let multiscale = config.multiscale.as_ref().unwrap();
    assert_eq!(multiscale.numcycles, 3);
    assert_eq!(multiscale.gandr_trigger_phase, TriggerPhase::EndDiastole);
    assert_eq!(multiscale.restart_cycle, 0);
    assert!(!multiscale.restart_from_small);
    assert_eq!(multiscale.large_scale.numstep, 10);
}

#[test]
fn unknown_model_type_is_rejected() {
    let input = WINDKESSEL_INPUT.replace("2elwindkessel", "3elwindkessel");
    assert!(Config::from_json_str(&input).is_err());
}

#[test]
fn invalid_time_discretization_is_rejected() {
    let input = WINDKESSEL_INPUT.replace("\"numstep\": 100", "\"numstep\": 0");
    assert!(Config::from_json_str(&input).is_err());
}

#[test]
fn coupled_problem_requires_structure() {
    let input = WINDKESSEL_INPUT.replace("\"flow0d\"", "\"solid_flow0d\"");
    assert!(Config::from_json_str(&input).is_err());
}

#[test]
fn solver_flow0d_falls_back_to_main_solver() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::coupled_config(dir.path(), 1.0, 100);
    assert_eq!(config.solver_flow0d(), config.solver);

    let json = r#"{ "solver_flow0D": { "tol_res": 1e-10 } }"#;
    config.coupling = Some(serde_json::from_str(json).unwrap());
    let solver = config.solver_flow0d();
    assert_eq!(solver.tol_res, 1e-10);
    assert_eq!(solver.maxiter, 25);
}

#[test]
fn ptc_restart_settings_follow_solver_input() {
    let input = WINDKESSEL_INPUT.replace(
        "\"model\"",
        r#""solver": { "k_ptc_initial": 2.0, "ptc_maxiter": 400, "ptc_randadapt_range": [0.5, 2.0] }, "model""#,
    );
    let config = Config::from_json_str(&input).unwrap();
    let restart = config.solver.ptc_restart_settings();
    assert_eq!(restart.initial_shift, 2.0);
    assert_eq!(restart.max_iterations, Some(400));
    assert_eq!(restart.factor_range, (0.5, 2.0));
}

#[test]
fn invalid_ptc_range_is_rejected() {
    for range in ["[1.35, 0.85]", "[0.0, 1.0]"] {
        let solver = format!(r#""solver": {{ "ptc_randadapt_range": {} }}, "model""#, range);
        let input = WINDKESSEL_INPUT.replace("\"model\"", &solver);
        assert!(Config::from_json_str(&input).is_err(), "range {}", range);
    }

    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::coupled_config(dir.path(), 1.0, 100);
    config.coupling = Some(serde_json::from_str(r#"{ "solver_flow0D": { "ptc_maxiter": 0 } }"#).unwrap());
    assert!(config.validate().is_err());
}
