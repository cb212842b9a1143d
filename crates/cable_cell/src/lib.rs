#![forbid(unsafe_code)]

//! The per-cell integrator: finite-volume discretization of one cable cell
//! and implicit time stepping of its membrane potential.
//!
//! Construction lowers a cell description to control volumes, computes the
//! CV geometry, instantiates mechanisms and shared ion state, binds
//! stimuli and creates the synapse mechanism, in that order. `advance`
//! performs one implicit step; `advance_to` splits the interval at queued
//! synaptic events so every event is applied exactly at its scheduled
//! time, never inside a sub-step.

use cable_channels::{HhParams, Leak};
use cable_core::{
    area_circle, area_frustum, area_sphere, CvIndex, IonKind, MechanismId,
    CURRENT_TO_VOLTAGE_SCALE, FACE_AREA_SCALE, POINT_CURRENT_SCALE, RESTING_POTENTIAL_MV,
};
use cable_events::{EventQueue, SynapticEvent};
use cable_matrix::{NumericalError, TreeMatrix};
use cable_mechanisms::{
    ion_node_union, ExpSynMechanism, ExpSynParams, HhMechanism, IonMap, IonState, Mechanism,
    MechanismError, PasMechanism,
};
use cable_morphology::{
    CellDescription, CompartmentModel, IClamp, MechanismSpec, MorphologyError, Segment,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CellError {
    #[error(transparent)]
    Morphology(#[from] MorphologyError),
    #[error("unknown mechanism \"{name}\" on segment {segment}")]
    UnknownMechanism { name: String, segment: usize },
    #[error("mechanism \"{name}\" attached twice to segment {segment}")]
    DuplicateMechanism { name: String, segment: usize },
    #[error("cv {} has non-positive surface area", cv.0)]
    DegenerateGeometry { cv: CvIndex },
    #[error(transparent)]
    Numerical(#[from] NumericalError),
    #[error(transparent)]
    Mechanism(#[from] MechanismError),
    #[error("event names point process {}, cell has {count}", mechanism.0)]
    UnknownPointProcess { mechanism: MechanismId, count: usize },
}

/// Finite-volume state of one cell and its implicit stepper.
///
/// The integrator exclusively owns every vector below; mechanisms receive
/// borrows per capability call and never outlive it.
#[derive(Debug, Clone)]
pub struct FvmCell {
    /// Current time, ms.
    t: f64,
    matrix: TreeMatrix,
    /// Surface area of each CV, µm².
    cv_areas: Vec<f64>,
    /// Face coupling coefficient `area_face / (c_m · r_L · Δx)` between
    /// each CV and its parent; entry 0 unused.
    face_alpha: Vec<f64>,
    /// Specific capacitance of each CV surface, F/m².
    cv_capacitance: Vec<f64>,
    /// Total transmembrane current density per CV, mA/cm².
    current: Vec<f64>,
    /// Membrane potential per CV, mV.
    voltage: Vec<f64>,
    /// Density mechanisms in construction order, point processes appended.
    mechanisms: Vec<Mechanism>,
    /// Positions of point-process mechanisms within `mechanisms`; event
    /// ids index into this list.
    point_processes: Vec<usize>,
    /// Fast path when exactly one point process exists.
    lone_synapse: Option<usize>,
    ions: IonMap,
    /// Bound stimuli as (CV, clamp) pairs.
    stimuli: Vec<(CvIndex, IClamp)>,
    events: EventQueue,
}

impl FvmCell {
    pub fn new(cell: &CellDescription) -> Result<Self, CellError> {
        let model = cell.model()?;
        let size = model.num_compartments();

        // CV geometry. Each cable compartment has the face to its parent at
        // its centre: the proximal half-frustum belongs to the parent CV,
        // the distal half to this CV.
        let mut cv_areas = vec![0.0; size];
        let mut face_alpha = vec![0.0; size];
        let mut cv_capacitance = vec![0.0; size];

        for (index, segment) in cell.segments().iter().enumerate() {
            let properties = segment.properties();
            match segment {
                Segment::Soma(soma) => {
                    let area = area_sphere(soma.radius);
                    cv_areas[0] += area;
                    cv_capacitance[0] += area * properties.c_m;
                }
                Segment::Cable(cable) => {
                    let first = model.segment_index[index];
                    for compartment in cable.compartments() {
                        let i = first + compartment.index;
                        let parent = model.parent_index[i].0;
                        let radius_center =
                            0.5 * (compartment.radius_left + compartment.radius_right);
                        face_alpha[i] = area_circle(radius_center)
                            / (properties.c_m * properties.r_l * compartment.length);

                        let half = compartment.length / 2.0;
                        let area_left =
                            area_frustum(half, compartment.radius_left, radius_center);
                        let area_right =
                            area_frustum(half, compartment.radius_right, radius_center);
                        cv_areas[parent] += area_left;
                        cv_areas[i] += area_right;
                        cv_capacitance[parent] += area_left * properties.c_m;
                        cv_capacitance[i] += area_right * properties.c_m;
                    }
                }
            }
        }

        for (cv, &area) in cv_areas.iter().enumerate() {
            if !(area > 0.0) {
                return Err(CellError::DegenerateGeometry { cv: CvIndex(cv) });
            }
        }
        for i in 0..size {
            cv_capacitance[i] /= cv_areas[i];
        }

        // Mechanism instances: one per name, spanning every segment the
        // name is attached to, with per-CV parameters from that segment.
        let mut mech_map: Vec<(String, Vec<(usize, MechanismSpec)>)> = Vec::new();
        for (index, segment) in cell.segments().iter().enumerate() {
            for spec in segment.mechanisms() {
                let position = match mech_map.iter().position(|(name, _)| name == spec.name()) {
                    Some(position) => position,
                    None => {
                        mech_map.push((spec.name().to_string(), Vec::new()));
                        mech_map.len() - 1
                    }
                };
                let entry = &mut mech_map[position].1;
                if entry.last().is_some_and(|(segment, _)| *segment == index) {
                    return Err(CellError::DuplicateMechanism {
                        name: spec.name().to_string(),
                        segment: index,
                    });
                }
                entry.push((index, spec.clone()));
            }
        }
        mech_map.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut mechanisms = Vec::with_capacity(mech_map.len() + 1);
        for (name, specs) in &mech_map {
            mechanisms.push(build_mechanism(name, specs, &model)?);
        }

        // Ion state: sorted union of the referencing mechanisms' CVs, then
        // every referencing mechanism gets its translation bound.
        let mut ions = IonMap::new();
        for kind in IonKind::ALL {
            let union = ion_node_union(&mechanisms, kind);
            if union.is_empty() {
                continue;
            }
            let ion = IonState::new(kind, union);
            for mechanism in &mut mechanisms {
                if mechanism.uses_ion(kind) {
                    mechanism.bind_ion(&ion)?;
                }
            }
            ions.insert(kind, ion);
        }

        let mut stimuli = Vec::with_capacity(cell.stimuli().len());
        for (location, clamp) in cell.stimuli() {
            stimuli.push((model.compartment_index(*location)?, *clamp));
        }

        // Synapse targets: one ExpSyn instance over the sorted set of
        // synapse CVs; a CV carries at most one target per mechanism kind.
        let mut synapse_cvs = Vec::with_capacity(cell.synapses().len());
        for location in cell.synapses() {
            synapse_cvs.push(model.compartment_index(*location)?);
        }
        synapse_cvs.sort_unstable();
        synapse_cvs.dedup();

        let mut point_processes = Vec::new();
        if !synapse_cvs.is_empty() {
            let mut synapse =
                Mechanism::ExpSyn(ExpSynMechanism::uniform(synapse_cvs, ExpSynParams::default()));
            synapse.set_areas(&cv_areas);
            point_processes.push(mechanisms.len());
            mechanisms.push(synapse);
        }
        let lone_synapse = match point_processes.as_slice() {
            [index] => Some(*index),
            _ => None,
        };

        let matrix = TreeMatrix::new(model.parent_index);

        Ok(Self {
            t: 0.0,
            matrix,
            current: vec![0.0; size],
            voltage: vec![RESTING_POTENTIAL_MV; size],
            cv_areas,
            face_alpha,
            cv_capacitance,
            mechanisms,
            point_processes,
            lone_synapse,
            ions,
            stimuli,
            events: EventQueue::new(),
        })
    }

    /// Sets `t = 0` and every mechanism to its steady default at the
    /// current voltage.
    pub fn initialize(&mut self) {
        self.t = 0.0;
        for mechanism in &mut self.mechanisms {
            mechanism.init(&self.voltage);
        }
    }

    /// Returns the cell to its freshly-constructed state: resting voltage,
    /// re-initialized mechanisms, and an empty event queue.
    pub fn reset(&mut self) {
        self.voltage.fill(RESTING_POTENTIAL_MV);
        self.events.reset();
        self.initialize();
    }

    /// One fixed-size implicit step. Events strictly inside `(t, t + dt)`
    /// must have been split out by the caller.
    pub fn advance(&mut self, dt: f64) -> Result<(), CellError> {
        debug_assert!(
            self.events
                .next_time()
                .map_or(true, |te| te <= self.t || te >= self.t + dt),
            "an event inside the step interval must split it"
        );

        self.current.fill(0.0);

        for mechanism in &mut self.mechanisms {
            mechanism.set_params(self.t, dt);
            mechanism.compute_current(&self.voltage, &mut self.current, &mut self.ions)?;
        }

        for &(cv, clamp) in &self.stimuli {
            self.current[cv.0] -=
                POINT_CURRENT_SCALE * clamp.amplitude(self.t) / self.cv_areas[cv.0];
        }

        self.setup_matrix(dt);
        self.matrix.solve()?;
        self.voltage.copy_from_slice(&self.matrix.rhs);

        for mechanism in &mut self.mechanisms {
            mechanism.advance_state(&self.voltage, dt);
        }

        self.t += dt;
        Ok(())
    }

    /// Advances to `tfinal` in steps of at most `dt`, splitting sub-steps
    /// at queued events so each is delivered exactly at its time.
    pub fn advance_to(&mut self, tfinal: f64, dt: f64) -> Result<(), CellError> {
        while self.t < tfinal {
            let mut tnext = tfinal.min(self.t + dt);
            let event = self.events.pop_if_before(tnext);
            if let Some(event) = event {
                // An event at or before the current time is delivered
                // immediately, without a sub-step.
                tnext = event.time.max(self.t);
            }
            let step = tnext - self.t;
            if step > 0.0 {
                self.advance(step)?;
            }
            self.t = tnext;
            if let Some(event) = event {
                self.deliver(event)?;
            }
        }
        Ok(())
    }

    fn deliver(&mut self, event: SynapticEvent) -> Result<(), CellError> {
        let index = match self.lone_synapse {
            Some(index) if event.mechanism == MechanismId(0) => index,
            _ => *self.point_processes.get(event.mechanism.0 as usize).ok_or(
                CellError::UnknownPointProcess {
                    mechanism: event.mechanism,
                    count: self.point_processes.len(),
                },
            )?,
        };
        self.mechanisms[index].net_receive(event.target, event.weight)?;
        Ok(())
    }

    /// Writes the implicit system for a step of `dt` into the matrix:
    /// diagonal `A + Σ a`, off-diagonals `−a` per face, and right-hand
    /// side `A · (V − κ·dt·I / C)`.
    fn setup_matrix(&mut self, dt: f64) {
        let size = self.matrix.size();
        self.matrix.d.copy_from_slice(&self.cv_areas);

        for i in 1..size {
            let coupling = FACE_AREA_SCALE * dt * self.face_alpha[i];
            let parent = self.matrix.parent_index()[i].0;
            self.matrix.d[i] += coupling;
            self.matrix.l[i] = -coupling;
            self.matrix.u[i] = -coupling;
            self.matrix.d[parent] += coupling;
        }

        let factor = CURRENT_TO_VOLTAGE_SCALE * dt;
        for i in 0..size {
            self.matrix.rhs[i] = self.cv_areas[i]
                * (self.voltage[i] - factor / self.cv_capacitance[i] * self.current[i]);
        }
    }

    pub fn time(&self) -> f64 {
        self.t
    }

    pub fn size(&self) -> usize {
        self.voltage.len()
    }

    pub fn voltage(&self) -> &[f64] {
        &self.voltage
    }

    pub fn cv_areas(&self) -> &[f64] {
        &self.cv_areas
    }

    pub fn cv_capacitance(&self) -> &[f64] {
        &self.cv_capacitance
    }

    pub fn parent_index(&self) -> &[CvIndex] {
        self.matrix.parent_index()
    }

    pub fn mechanisms(&self) -> &[Mechanism] {
        &self.mechanisms
    }

    pub fn ions(&self) -> &IonMap {
        &self.ions
    }

    pub fn ions_mut(&mut self) -> &mut IonMap {
        &mut self.ions
    }

    pub fn ion(&self, kind: IonKind) -> Option<&IonState> {
        self.ions.get(&kind)
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    /// Digest of the time-invariant discretization: tree structure,
    /// geometry, mechanism placement, ion coverage and stimuli.
    pub fn config_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:CELL:CFG");
        update_u64(&mut hasher, self.size() as u64);
        for &parent in self.matrix.parent_index() {
            update_u64(&mut hasher, parent.0 as u64);
        }
        for &area in &self.cv_areas {
            update_f64(&mut hasher, area);
        }
        for &alpha in &self.face_alpha {
            update_f64(&mut hasher, alpha);
        }
        for &capacitance in &self.cv_capacitance {
            update_f64(&mut hasher, capacitance);
        }
        for mechanism in &self.mechanisms {
            hasher.update(mechanism.name().as_bytes());
            update_u64(&mut hasher, mechanism.node_index().len() as u64);
            for &cv in mechanism.node_index() {
                update_u64(&mut hasher, cv.0 as u64);
            }
        }
        for (kind, ion) in &self.ions {
            hasher.update(kind.name().as_bytes());
            for &cv in ion.node_index() {
                update_u64(&mut hasher, cv.0 as u64);
            }
        }
        for &(cv, clamp) in &self.stimuli {
            update_u64(&mut hasher, cv.0 as u64);
            update_f64(&mut hasher, clamp.delay);
            update_f64(&mut hasher, clamp.duration);
            update_f64(&mut hasher, clamp.amplitude);
        }
        *hasher.finalize().as_bytes()
    }

    /// Digest of the evolving state: time, voltage, mechanism-private
    /// state and ion vectors. Bitwise-identical runs produce identical
    /// digests.
    pub fn snapshot_digest(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"CABLE:CELL:SNAP");
        update_f64(&mut hasher, self.t);
        for &v in &self.voltage {
            update_f64(&mut hasher, v);
        }
        for mechanism in &self.mechanisms {
            match mechanism {
                Mechanism::Pas(_) => {}
                Mechanism::Hh(m) => {
                    for gates in m.gates() {
                        update_f64(&mut hasher, gates.m);
                        update_f64(&mut hasher, gates.h);
                        update_f64(&mut hasher, gates.n);
                    }
                }
                Mechanism::ExpSyn(m) => {
                    for &g in m.conductances() {
                        update_f64(&mut hasher, g);
                    }
                }
            }
        }
        for ion in self.ions.values() {
            for &x in ion.internal_concentration() {
                update_f64(&mut hasher, x);
            }
            for &x in ion.external_concentration() {
                update_f64(&mut hasher, x);
            }
            for &e in ion.reversal_potential() {
                update_f64(&mut hasher, e);
            }
        }
        *hasher.finalize().as_bytes()
    }
}

fn build_mechanism(
    name: &str,
    specs: &[(usize, MechanismSpec)],
    model: &CompartmentModel,
) -> Result<Mechanism, CellError> {
    match name {
        "pas" => {
            let defaults = Leak::default();
            let mut node_index = Vec::new();
            let mut g = Vec::new();
            let mut e = Vec::new();
            for (segment, spec) in specs {
                let seg_g = spec.get("g").unwrap_or(defaults.g);
                let seg_e = spec.get("e").unwrap_or(defaults.e);
                for cv in model.segment_range(*segment) {
                    node_index.push(CvIndex(cv));
                    g.push(seg_g);
                    e.push(seg_e);
                }
            }
            Ok(Mechanism::Pas(PasMechanism::new(node_index, g, e)))
        }
        "hh" => {
            let defaults = HhParams::default();
            let mut node_index = Vec::new();
            let mut params = Vec::new();
            for (segment, spec) in specs {
                let seg_params = HhParams {
                    gnabar: spec.get("gnabar").unwrap_or(defaults.gnabar),
                    gkbar: spec.get("gkbar").unwrap_or(defaults.gkbar),
                    gl: spec.get("gl").unwrap_or(defaults.gl),
                    el: spec.get("el").unwrap_or(defaults.el),
                };
                for cv in model.segment_range(*segment) {
                    node_index.push(CvIndex(cv));
                    params.push(seg_params);
                }
            }
            Ok(Mechanism::Hh(HhMechanism::new(node_index, params)))
        }
        _ => Err(CellError::UnknownMechanism {
            name: name.to_string(),
            segment: specs.first().map_or(0, |(segment, _)| *segment),
        }),
    }
}

fn update_u64(hasher: &mut blake3::Hasher, value: u64) {
    hasher.update(&value.to_le_bytes());
}

fn update_f64(hasher: &mut blake3::Hasher, value: f64) {
    hasher.update(&value.to_bits().to_le_bytes());
}
