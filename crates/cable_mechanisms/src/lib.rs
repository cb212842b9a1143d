#![forbid(unsafe_code)]

//! Mechanism instances and shared ion state.
//!
//! A mechanism instance is bound at construction to a strictly increasing
//! list of CV indices. Each capability call receives the cell-wide voltage
//! and current vectors as borrows; mechanisms accumulate into the current
//! vector and never write voltage. Ion state is owned by the integrator and
//! shared between all mechanisms referencing the species: every mechanism
//! holds a translation table from its own CV list into the ion's sorted
//! index union, so a write through one mechanism is visible to the others.

use std::collections::{BTreeMap, BTreeSet};

use cable_channels::{hh_current, leak_current, GatingState, HhParams, Leak};
use cable_core::{ion_defaults, CvIndex, IonKind, TargetId, POINT_CURRENT_SCALE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MechanismError {
    #[error("ion {} is not bound", .0.name())]
    UnknownIon(IonKind),
    #[error("ion {} does not cover cv {}", kind.name(), cv.0)]
    IonIndexMismatch { kind: IonKind, cv: CvIndex },
    #[error("event target {} out of range for {size} targets", target.0)]
    OutOfRangeTarget { target: TargetId, size: usize },
    #[error("{0} does not receive events")]
    NotAPointProcess(&'static str),
}

/// Per-species ion state over the sorted union of CVs that reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct IonState {
    kind: IonKind,
    node_index: Vec<CvIndex>,
    internal_concentration: Vec<f64>,
    external_concentration: Vec<f64>,
    reversal_potential: Vec<f64>,
}

impl IonState {
    /// Builds the state over `node_index` with the default concentrations
    /// and reversal potential of the species.
    pub fn new(kind: IonKind, node_index: Vec<CvIndex>) -> Self {
        assert!(
            node_index.windows(2).all(|w| w[0] < w[1]),
            "ion node index must be strictly increasing"
        );
        let defaults = ion_defaults(kind);
        let size = node_index.len();
        Self {
            kind,
            node_index,
            internal_concentration: vec![defaults.internal_concentration; size],
            external_concentration: vec![defaults.external_concentration; size],
            reversal_potential: vec![defaults.reversal_potential; size],
        }
    }

    pub fn kind(&self) -> IonKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.node_index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_index.is_empty()
    }

    pub fn node_index(&self) -> &[CvIndex] {
        &self.node_index
    }

    /// Position of `cv` within this ion's vectors.
    pub fn position(&self, cv: CvIndex) -> Option<usize> {
        self.node_index.binary_search(&cv).ok()
    }

    pub fn internal_concentration(&self) -> &[f64] {
        &self.internal_concentration
    }

    pub fn internal_concentration_mut(&mut self) -> &mut [f64] {
        &mut self.internal_concentration
    }

    pub fn external_concentration(&self) -> &[f64] {
        &self.external_concentration
    }

    pub fn external_concentration_mut(&mut self) -> &mut [f64] {
        &mut self.external_concentration
    }

    pub fn reversal_potential(&self) -> &[f64] {
        &self.reversal_potential
    }

    pub fn reversal_potential_mut(&mut self) -> &mut [f64] {
        &mut self.reversal_potential
    }
}

/// Ion states of one cell, keyed by species.
pub type IonMap = BTreeMap<IonKind, IonState>;

/// Sorted union of the node indices of all mechanisms that use `kind`.
pub fn ion_node_union(mechanisms: &[Mechanism], kind: IonKind) -> Vec<CvIndex> {
    let mut union = BTreeSet::new();
    for mechanism in mechanisms {
        if mechanism.uses_ion(kind) {
            union.extend(mechanism.node_index().iter().copied());
        }
    }
    union.into_iter().collect()
}

fn assert_node_index(node_index: &[CvIndex]) {
    assert!(
        node_index.windows(2).all(|w| w[0] < w[1]),
        "mechanism node index must be strictly increasing"
    );
}

/// Passive leak over a set of CVs, with per-CV parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasMechanism {
    node_index: Vec<CvIndex>,
    g: Vec<f64>,
    e: Vec<f64>,
}

impl PasMechanism {
    pub fn new(node_index: Vec<CvIndex>, g: Vec<f64>, e: Vec<f64>) -> Self {
        assert_node_index(&node_index);
        assert_eq!(node_index.len(), g.len(), "one conductance per cv");
        assert_eq!(node_index.len(), e.len(), "one reversal per cv");
        Self { node_index, g, e }
    }

    /// Uniform parameters over all CVs.
    pub fn uniform(node_index: Vec<CvIndex>, leak: Leak) -> Self {
        let size = node_index.len();
        Self::new(node_index, vec![leak.g; size], vec![leak.e; size])
    }

    fn current(&self, voltage: &[f64], current: &mut [f64]) {
        for (k, &cv) in self.node_index.iter().enumerate() {
            let leak = Leak { g: self.g[k], e: self.e[k] };
            current[cv.0] += leak_current(leak, voltage[cv.0]);
        }
    }
}

/// Hodgkin–Huxley sodium, potassium and leak channels over a set of CVs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HhMechanism {
    node_index: Vec<CvIndex>,
    params: Vec<HhParams>,
    gates: Vec<GatingState>,
    na_index: Vec<usize>,
    k_index: Vec<usize>,
}

impl HhMechanism {
    pub fn new(node_index: Vec<CvIndex>, params: Vec<HhParams>) -> Self {
        assert_node_index(&node_index);
        assert_eq!(node_index.len(), params.len(), "one parameter set per cv");
        let gates = vec![GatingState::steady(0.0); node_index.len()];
        Self {
            node_index,
            params,
            gates,
            na_index: Vec::new(),
            k_index: Vec::new(),
        }
    }

    pub fn uniform(node_index: Vec<CvIndex>, params: HhParams) -> Self {
        let size = node_index.len();
        Self::new(node_index, vec![params; size])
    }

    pub fn gates(&self) -> &[GatingState] {
        &self.gates
    }

    /// Translation of this mechanism's CVs into the vectors of `kind`.
    pub fn ion_index(&self, kind: IonKind) -> &[usize] {
        match kind {
            IonKind::Na => &self.na_index,
            IonKind::K => &self.k_index,
            IonKind::Ca => &[],
        }
    }

    fn bind_ion(&mut self, ion: &IonState) -> Result<(), MechanismError> {
        let kind = ion.kind();
        if !matches!(kind, IonKind::Na | IonKind::K) {
            return Err(MechanismError::UnknownIon(kind));
        }
        let mut table = Vec::with_capacity(self.node_index.len());
        for &cv in &self.node_index {
            let position = ion
                .position(cv)
                .ok_or(MechanismError::IonIndexMismatch { kind, cv })?;
            table.push(position);
        }
        match kind {
            IonKind::Na => self.na_index = table,
            _ => self.k_index = table,
        }
        Ok(())
    }

    fn init(&mut self, voltage: &[f64]) {
        for (k, &cv) in self.node_index.iter().enumerate() {
            self.gates[k] = GatingState::steady(voltage[cv.0]);
        }
    }

    fn current(
        &self,
        voltage: &[f64],
        current: &mut [f64],
        ions: &IonMap,
    ) -> Result<(), MechanismError> {
        let na = ions
            .get(&IonKind::Na)
            .ok_or(MechanismError::UnknownIon(IonKind::Na))?;
        let k = ions
            .get(&IonKind::K)
            .ok_or(MechanismError::UnknownIon(IonKind::K))?;
        assert_eq!(
            self.na_index.len(),
            self.node_index.len(),
            "ion state must be bound before computing currents"
        );
        for (idx, &cv) in self.node_index.iter().enumerate() {
            let e_na = na.reversal_potential()[self.na_index[idx]];
            let e_k = k.reversal_potential()[self.k_index[idx]];
            current[cv.0] +=
                hh_current(self.params[idx], self.gates[idx], voltage[cv.0], e_na, e_k);
        }
        Ok(())
    }

    fn advance_state(&mut self, voltage: &[f64], dt: f64) {
        for (k, &cv) in self.node_index.iter().enumerate() {
            self.gates[k].update(voltage[cv.0], dt);
        }
    }
}

/// Single-exponential conductance synapse, one target per CV.
///
/// A point process injects a total current in nA, so its contribution is
/// divided by the CV surface area to stay commensurable with the density
/// mechanisms' mA/cm².
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpSynMechanism {
    node_index: Vec<CvIndex>,
    tau: Vec<f64>,
    e: Vec<f64>,
    g: Vec<f64>,
    areas: Vec<f64>,
}

/// ExpSyn parameters: decay time constant (ms) and reversal (mV).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpSynParams {
    pub tau: f64,
    pub e: f64,
}

impl Default for ExpSynParams {
    fn default() -> Self {
        Self { tau: 2.0, e: 0.0 }
    }
}

impl ExpSynMechanism {
    pub fn new(node_index: Vec<CvIndex>, params: Vec<ExpSynParams>) -> Self {
        assert_node_index(&node_index);
        assert_eq!(node_index.len(), params.len(), "one parameter set per target");
        let size = node_index.len();
        let tau = params.iter().map(|p| p.tau).collect();
        let e = params.iter().map(|p| p.e).collect();
        Self {
            node_index,
            tau,
            e,
            g: vec![0.0; size],
            areas: Vec::new(),
        }
    }

    pub fn uniform(node_index: Vec<CvIndex>, params: ExpSynParams) -> Self {
        let size = node_index.len();
        Self::new(node_index, vec![params; size])
    }

    pub fn num_targets(&self) -> usize {
        self.node_index.len()
    }

    /// Instantaneous conductances, µS.
    pub fn conductances(&self) -> &[f64] {
        &self.g
    }

    fn set_areas(&mut self, areas: &[f64]) {
        self.areas = self.node_index.iter().map(|&cv| areas[cv.0]).collect();
    }

    fn init(&mut self) {
        self.g.fill(0.0);
    }

    fn current(&self, voltage: &[f64], current: &mut [f64]) {
        assert_eq!(
            self.areas.len(),
            self.node_index.len(),
            "areas must be bound before computing currents"
        );
        for (k, &cv) in self.node_index.iter().enumerate() {
            // g·(v − e) is in nA; scale to a density over the CV surface.
            let i = self.g[k] * (voltage[cv.0] - self.e[k]);
            current[cv.0] += POINT_CURRENT_SCALE * i / self.areas[k];
        }
    }

    fn advance_state(&mut self, dt: f64) {
        for (k, g) in self.g.iter_mut().enumerate() {
            *g *= (-dt / self.tau[k]).exp();
        }
    }

    fn net_receive(&mut self, target: TargetId, weight: f64) -> Result<(), MechanismError> {
        let slot = self
            .g
            .get_mut(target.0 as usize)
            .ok_or(MechanismError::OutOfRangeTarget {
                target,
                size: self.node_index.len(),
            })?;
        *slot += weight;
        Ok(())
    }
}

/// A mechanism instance of one of the known kinds.
///
/// The set of kinds is closed, so dispatch is a match rather than a virtual
/// call in the per-step loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Mechanism {
    Pas(PasMechanism),
    Hh(HhMechanism),
    ExpSyn(ExpSynMechanism),
}

impl Mechanism {
    pub fn name(&self) -> &'static str {
        match self {
            Mechanism::Pas(_) => "pas",
            Mechanism::Hh(_) => "hh",
            Mechanism::ExpSyn(_) => "expsyn",
        }
    }

    pub fn node_index(&self) -> &[CvIndex] {
        match self {
            Mechanism::Pas(m) => &m.node_index,
            Mechanism::Hh(m) => &m.node_index,
            Mechanism::ExpSyn(m) => &m.node_index,
        }
    }

    pub fn is_point_process(&self) -> bool {
        matches!(self, Mechanism::ExpSyn(_))
    }

    pub fn uses_ion(&self, kind: IonKind) -> bool {
        match self {
            Mechanism::Hh(_) => matches!(kind, IonKind::Na | IonKind::K),
            Mechanism::Pas(_) | Mechanism::ExpSyn(_) => false,
        }
    }

    /// Builds this mechanism's translation into the ion's shared vectors.
    pub fn bind_ion(&mut self, ion: &IonState) -> Result<(), MechanismError> {
        match self {
            Mechanism::Hh(m) => m.bind_ion(ion),
            Mechanism::Pas(_) | Mechanism::ExpSyn(_) => {
                Err(MechanismError::UnknownIon(ion.kind()))
            }
        }
    }

    /// Gives point processes the CV surface areas they normalize by.
    pub fn set_areas(&mut self, areas: &[f64]) {
        if let Mechanism::ExpSyn(m) = self {
            m.set_areas(areas);
        }
    }

    /// Resets mechanism state to its steady default at the given voltage.
    pub fn init(&mut self, voltage: &[f64]) {
        match self {
            Mechanism::Pas(_) => {}
            Mechanism::Hh(m) => m.init(voltage),
            Mechanism::ExpSyn(m) => m.init(),
        }
    }

    /// Per-sub-step parameter hook. The kinetics here are time-invariant,
    /// so nothing is stored; time-dependent kinds would capture `t` and
    /// `dt` from this call.
    pub fn set_params(&mut self, _t: f64, _dt: f64) {}

    /// Accumulates this mechanism's transmembrane current density into
    /// `current`.
    pub fn compute_current(
        &mut self,
        voltage: &[f64],
        current: &mut [f64],
        ions: &mut IonMap,
    ) -> Result<(), MechanismError> {
        match self {
            Mechanism::Pas(m) => {
                m.current(voltage, current);
                Ok(())
            }
            Mechanism::Hh(m) => m.current(voltage, current, ions),
            Mechanism::ExpSyn(m) => {
                m.current(voltage, current);
                Ok(())
            }
        }
    }

    /// Advances mechanism-private state over `dt` at the new voltage.
    pub fn advance_state(&mut self, voltage: &[f64], dt: f64) {
        match self {
            Mechanism::Pas(_) => {}
            Mechanism::Hh(m) => m.advance_state(voltage, dt),
            Mechanism::ExpSyn(m) => m.advance_state(dt),
        }
    }

    /// Delivers a synaptic event to a point process.
    pub fn net_receive(&mut self, target: TargetId, weight: f64) -> Result<(), MechanismError> {
        match self {
            Mechanism::ExpSyn(m) => m.net_receive(target, weight),
            Mechanism::Pas(_) | Mechanism::Hh(_) => {
                Err(MechanismError::NotAPointProcess(self.name()))
            }
        }
    }
}
