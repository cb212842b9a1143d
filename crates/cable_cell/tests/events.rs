use cable_cell::{CellError, FvmCell};
use cable_core::{MechanismId, TargetId};
use cable_events::SynapticEvent;
use cable_mechanisms::MechanismError;
use cable_morphology::{CellDescription, Location, MechanismSpec};

const DT_MS: f64 = 0.5;

fn soma_with_synapse() -> FvmCell {
    let mut cell = CellDescription::new();
    cell.add_soma(9.0).mechanisms.push(MechanismSpec::new("pas"));
    cell.add_synapse(Location::new(0, 0.5));
    let mut fvm = FvmCell::new(&cell).expect("fvm");
    fvm.initialize();
    fvm
}

fn epsp_event(time: f64) -> SynapticEvent {
    SynapticEvent {
        time,
        mechanism: MechanismId(0),
        target: TargetId(0),
        weight: 0.01,
    }
}

#[test]
fn event_between_steps_splits_the_interval() {
    let mut fvm = soma_with_synapse();
    fvm.events_mut().push(epsp_event(3.3));

    // Up to the event time the cell is passive and at rest; the event is
    // strictly-before only for later sub-steps, so it is still queued.
    fvm.advance_to(3.3, DT_MS).expect("advance");
    assert_eq!(fvm.time(), 3.3);
    assert_eq!(fvm.events().len(), 1);
    assert!((fvm.voltage()[0] + 65.0).abs() < 1e-9);

    // Continuing delivers the event exactly at 3.3 ms and the EPSP rises
    // from there.
    let mut samples = Vec::new();
    let mut t = 3.3;
    while t < 10.0 {
        t = (t + DT_MS).min(10.0);
        fvm.advance_to(t, DT_MS).expect("advance");
        samples.push((fvm.time(), fvm.voltage()[0]));
    }

    assert!(fvm.events().is_empty());
    assert!(samples[0].1 > -65.0 + 0.05, "no epsp by {:?}", samples[0]);

    let (peak_time, peak) = samples
        .iter()
        .copied()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .expect("samples recorded");
    assert!(peak > -64.5, "epsp too small: {peak} mV");
    assert!(
        peak_time > 3.3 && peak_time < 3.3 + 10.0,
        "peak at {peak_time} ms"
    );
    // The conductance decays, so the trace falls off after the peak.
    let last = samples.last().expect("samples recorded");
    assert!(last.1 < peak);
}

#[test]
fn single_call_advance_matches_staged_advance() {
    let mut staged = soma_with_synapse();
    staged.events_mut().push(epsp_event(3.3));
    staged.advance_to(3.3, DT_MS).expect("advance");
    staged.advance_to(10.0, DT_MS).expect("advance");

    let mut direct = soma_with_synapse();
    direct.events_mut().push(epsp_event(3.3));
    direct.advance_to(10.0, DT_MS).expect("advance");

    assert_eq!(staged.voltage()[0].to_bits(), direct.voltage()[0].to_bits());
    assert_eq!(staged.snapshot_digest(), direct.snapshot_digest());
}

#[test]
fn events_in_one_step_deliver_in_time_order() {
    let mut fvm = soma_with_synapse();
    fvm.events_mut().push(epsp_event(0.4));
    fvm.events_mut().push(epsp_event(0.1));
    fvm.events_mut().push(epsp_event(0.2));

    fvm.advance_to(DT_MS, DT_MS).expect("advance");
    assert!(fvm.events().is_empty());
    assert_eq!(fvm.time(), DT_MS);
    assert!(fvm.voltage()[0] > -65.0);
}

#[test]
fn event_for_missing_point_process_is_fatal() {
    let mut cell = CellDescription::new();
    cell.add_soma(9.0).mechanisms.push(MechanismSpec::new("pas"));
    let mut fvm = FvmCell::new(&cell).expect("fvm");
    fvm.initialize();
    fvm.events_mut().push(epsp_event(1.0));

    assert!(matches!(
        fvm.advance_to(5.0, DT_MS),
        Err(CellError::UnknownPointProcess {
            mechanism: MechanismId(0),
            count: 0,
        })
    ));
    // The failed delivery leaves the last consistent sub-step visible.
    assert_eq!(fvm.time(), 1.0);
}

#[test]
fn out_of_range_target_is_fatal() {
    let mut fvm = soma_with_synapse();
    fvm.events_mut().push(SynapticEvent {
        time: 1.0,
        mechanism: MechanismId(0),
        target: TargetId(7),
        weight: 0.01,
    });

    assert!(matches!(
        fvm.advance_to(5.0, DT_MS),
        Err(CellError::Mechanism(MechanismError::OutOfRangeTarget {
            target: TargetId(7),
            size: 1,
        }))
    ));
}

#[test]
fn reset_clears_pending_events() {
    let mut fvm = soma_with_synapse();
    fvm.events_mut().push(epsp_event(8.0));
    fvm.advance_to(2.0, DT_MS).expect("advance");

    fvm.reset();
    assert_eq!(fvm.time(), 0.0);
    assert!(fvm.events().is_empty());
    for &v in fvm.voltage() {
        assert_eq!(v, -65.0);
    }

    // With the queue cleared the old event never fires.
    fvm.advance_to(10.0, DT_MS).expect("advance");
    for &v in fvm.voltage() {
        assert!((v + 65.0).abs() < 1e-9);
    }
}

#[test]
fn stale_events_deliver_immediately_without_rewinding_time() {
    let mut fvm = soma_with_synapse();
    fvm.advance_to(2.0, DT_MS).expect("advance");
    fvm.events_mut().push(epsp_event(1.0));

    fvm.advance_to(4.0, DT_MS).expect("advance");
    assert_eq!(fvm.time(), 4.0);
    assert!(fvm.events().is_empty());
    assert!(fvm.voltage()[0] > -65.0);
}
