use std::f64::consts::PI;

use cable_cell::{CellError, FvmCell};
use cable_core::{CvIndex, IonKind};
use cable_morphology::{CellDescription, MechanismSpec};

const SOMA_RADIUS_UM: f64 = 9.0;

fn soma_and_cable() -> CellDescription {
    let mut cell = CellDescription::new();
    cell.add_soma(SOMA_RADIUS_UM)
        .mechanisms
        .push(MechanismSpec::new("pas"));
    cell.add_cable(0, 100.0, 1.0, 0.5, 10)
        .mechanisms
        .push(MechanismSpec::new("pas"));
    cell
}

#[test]
fn parent_index_is_a_tree_below_the_diagonal() {
    let fvm = FvmCell::new(&soma_and_cable()).expect("fvm");
    assert_eq!(fvm.size(), 11);
    let parent = fvm.parent_index();
    assert_eq!(parent[0], CvIndex(0));
    for i in 1..fvm.size() {
        assert!(parent[i].0 < i);
    }
}

#[test]
fn cv_areas_sum_to_the_analytic_surface() {
    let fvm = FvmCell::new(&soma_and_cable()).expect("fvm");
    let total: f64 = fvm.cv_areas().iter().sum();

    let soma = 4.0 * PI * SOMA_RADIUS_UM * SOMA_RADIUS_UM;
    let taper: f64 = 0.5;
    let cable = PI * (1.0 + 0.5) * (100.0_f64.powi(2) + taper * taper).sqrt();
    assert!(
        (total - (soma + cable)).abs() < 1e-9 * (soma + cable),
        "got {total}, want {}",
        soma + cable
    );
    for &area in fvm.cv_areas() {
        assert!(area > 0.0);
    }
}

#[test]
fn capacitance_is_normalized_per_area() {
    let fvm = FvmCell::new(&soma_and_cable()).expect("fvm");
    for &c in fvm.cv_capacitance() {
        assert!(c > 0.0);
        // Uniform c_m over the cell survives normalization unchanged.
        assert!((c - 0.01).abs() < 1e-12);
    }
}

#[test]
fn voltage_starts_at_rest() {
    let fvm = FvmCell::new(&soma_and_cable()).expect("fvm");
    assert_eq!(fvm.time(), 0.0);
    for &v in fvm.voltage() {
        assert_eq!(v, -65.0);
    }
}

#[test]
fn mechanism_node_indices_are_strictly_increasing() {
    let mut cell = soma_and_cable();
    cell.add_cable(0, 50.0, 0.5, 0.5, 5)
        .mechanisms
        .push(MechanismSpec::new("hh"));
    let fvm = FvmCell::new(&cell).expect("fvm");

    for mechanism in fvm.mechanisms() {
        let node_index = mechanism.node_index();
        assert!(node_index.windows(2).all(|w| w[0] < w[1]));
        assert!(node_index.iter().all(|&cv| cv.0 < fvm.size()));
    }
}

#[test]
fn ion_index_is_the_union_of_referencing_mechanisms() {
    let mut cell = CellDescription::new();
    cell.add_soma(SOMA_RADIUS_UM)
        .mechanisms
        .push(MechanismSpec::new("hh"));
    cell.add_cable(0, 100.0, 0.5, 0.5, 4);
    cell.add_cable(1, 50.0, 0.5, 0.5, 3)
        .mechanisms
        .push(MechanismSpec::new("hh"));
    let fvm = FvmCell::new(&cell).expect("fvm");

    // hh sits on the soma (CV 0) and the second cable (CVs 5..8).
    let expected = [0, 5, 6, 7].map(CvIndex);
    assert_eq!(fvm.ion(IonKind::Na).expect("na").node_index(), &expected[..]);
    assert_eq!(fvm.ion(IonKind::K).expect("k").node_index(), &expected[..]);
    assert!(fvm.ion(IonKind::Ca).is_none());
}

#[test]
fn passive_cells_carry_no_ion_state() {
    let fvm = FvmCell::new(&soma_and_cable()).expect("fvm");
    assert!(fvm.ions().is_empty());
}

#[test]
fn unknown_mechanism_names_are_fatal() {
    let mut cell = soma_and_cable();
    cell.add_cable(0, 10.0, 0.5, 0.5, 2)
        .mechanisms
        .push(MechanismSpec::new("kv7"));
    assert!(matches!(
        FvmCell::new(&cell),
        Err(CellError::UnknownMechanism { ref name, segment: 2 }) if name == "kv7"
    ));
}

#[test]
fn duplicate_mechanism_on_one_segment_is_fatal() {
    let mut cell = CellDescription::new();
    let soma = cell.add_soma(SOMA_RADIUS_UM);
    soma.mechanisms.push(MechanismSpec::new("pas"));
    soma.mechanisms.push(MechanismSpec::new("pas"));
    assert!(matches!(
        FvmCell::new(&cell),
        Err(CellError::DuplicateMechanism { segment: 0, .. })
    ));
}

#[test]
fn mechanism_parameters_apply_per_segment() {
    let mut cell = CellDescription::new();
    cell.add_soma(SOMA_RADIUS_UM)
        .mechanisms
        .push(MechanismSpec::new("pas").with("e", -70.0));
    cell.add_cable(0, 100.0, 0.5, 0.5, 10)
        .mechanisms
        .push(MechanismSpec::new("pas"));
    let mut fvm = FvmCell::new(&cell).expect("fvm");

    // The segment-specific reversal pulls the resting soma away from the
    // cable's default; a uniform cell would stay put.
    fvm.initialize();
    fvm.advance_to(5.0, 0.025).expect("advance");
    assert!(fvm.voltage()[0] < -65.0);
}
