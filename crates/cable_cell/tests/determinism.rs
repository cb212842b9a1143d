use cable_cell::FvmCell;
use cable_core::{MechanismId, TargetId};
use cable_events::SynapticEvent;
use cable_morphology::{CellDescription, IClamp, Location, MechanismSpec};

const DT_MS: f64 = 0.025;

fn busy_cell() -> FvmCell {
    let mut cell = CellDescription::new();
    let soma = cell.add_soma(9.0);
    soma.mechanisms.push(MechanismSpec::new("hh"));
    cell.add_cable(0, 100.0, 1.0, 0.5, 10)
        .mechanisms
        .push(MechanismSpec::new("pas"));
    cell.add_stimulus(Location::new(0, 0.5), IClamp::new(2.0, 1.0, 1.0));
    cell.add_synapse(Location::new(1, 0.5));

    let mut fvm = FvmCell::new(&cell).expect("fvm");
    fvm.initialize();
    for (time, weight) in [(1.1, 0.005), (4.7, 0.002), (4.7, 0.001)] {
        fvm.events_mut().push(SynapticEvent {
            time,
            mechanism: MechanismId(0),
            target: TargetId(0),
            weight,
        });
    }
    fvm
}

#[test]
fn identical_runs_are_bitwise_equal() {
    let mut first = busy_cell();
    let mut second = busy_cell();

    assert_eq!(first.config_digest(), second.config_digest());

    first.advance_to(10.0, DT_MS).expect("advance");
    second.advance_to(10.0, DT_MS).expect("advance");

    for (a, b) in first.voltage().iter().zip(second.voltage()) {
        assert_eq!(a.to_bits(), b.to_bits());
    }
    assert_eq!(first.snapshot_digest(), second.snapshot_digest());
}

#[test]
fn snapshot_digest_tracks_state_changes() {
    let mut fvm = busy_cell();
    let at_rest = fvm.snapshot_digest();
    fvm.advance_to(5.0, DT_MS).expect("advance");
    assert_ne!(fvm.snapshot_digest(), at_rest);

    // Resetting restores the initial state exactly.
    fvm.reset();
    assert_eq!(fvm.snapshot_digest(), at_rest);
}

#[test]
fn config_digest_distinguishes_discretizations() {
    let first = busy_cell();

    let mut cell = CellDescription::new();
    cell.add_soma(9.0).mechanisms.push(MechanismSpec::new("hh"));
    cell.add_cable(0, 100.0, 1.0, 0.5, 11)
        .mechanisms
        .push(MechanismSpec::new("pas"));
    let second = FvmCell::new(&cell).expect("fvm");

    assert_ne!(first.config_digest(), second.config_digest());
}
