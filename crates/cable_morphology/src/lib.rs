#![forbid(unsafe_code)]

//! Cell description and its lowering to a control-volume tree.
//!
//! A cell is a sequence of segments: one soma first, then cables, each cable
//! attached to an earlier segment. Lowering produces the parent-index array
//! over control volumes (CVs) and the per-segment CV ranges the integrator
//! discretizes over. Children always receive higher CV indices than their
//! parents, which is what makes the tree matrix solvable in one sweep each
//! direction.

use std::ops::Range;

use cable_core::CvIndex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum MorphologyError {
    #[error("first segment must be a soma")]
    MissingSoma,
    #[error("soma at non-zero segment index {index}")]
    MisplacedSoma { index: usize },
    #[error("cable segment {index} has no compartments")]
    EmptyCable { index: usize },
    #[error("cable segment {child} attaches to segment {parent}, which does not precede it")]
    ParentOrdering { child: usize, parent: usize },
    #[error("location references segment {segment}, cell has {count}")]
    InvalidSegment { segment: usize, count: usize },
    #[error("location position {position} on segment {segment} is outside [0, 1]")]
    InvalidPosition { segment: usize, position: f64 },
}

/// Passive electrical properties of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PassiveProperties {
    /// Specific membrane capacitance, F/m².
    pub c_m: f64,
    /// Axial resistivity of the cytoplasm, Ω·cm.
    pub r_l: f64,
}

impl Default for PassiveProperties {
    fn default() -> Self {
        Self { c_m: 0.01, r_l: 180.0 }
    }
}

/// A named mechanism attached to a segment, with parameter overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismSpec {
    name: String,
    parameters: Vec<(String, f64)>,
}

impl MechanismSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), parameters: Vec::new() }
    }

    /// Sets a named parameter, replacing an earlier value for the same name.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.parameters.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Spherical soma segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soma {
    /// Radius, µm.
    pub radius: f64,
    pub properties: PassiveProperties,
    pub mechanisms: Vec<MechanismSpec>,
}

/// Unbranched cable segment with linear taper, split into compartments of
/// equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cable {
    /// Index of the segment this cable attaches to.
    pub parent: usize,
    /// Length, µm.
    pub length: f64,
    /// Radius at the proximal (parent) end, µm.
    pub radius_proximal: f64,
    /// Radius at the distal end, µm.
    pub radius_distal: f64,
    pub num_compartments: usize,
    pub properties: PassiveProperties,
    pub mechanisms: Vec<MechanismSpec>,
}

/// One cable compartment with interpolated radii at its end points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compartment {
    /// Position within the cable, 0-based.
    pub index: usize,
    /// Length, µm.
    pub length: f64,
    /// Radius at the end closer to the soma, µm.
    pub radius_left: f64,
    /// Radius at the distal end, µm.
    pub radius_right: f64,
}

impl Cable {
    /// Radius at relative position `pos` in `[0, 1]` along the cable.
    pub fn radius_at(&self, pos: f64) -> f64 {
        self.radius_proximal + pos * (self.radius_distal - self.radius_proximal)
    }

    pub fn compartments(&self) -> impl Iterator<Item = Compartment> + '_ {
        let count = self.num_compartments;
        let length = self.length / count as f64;
        (0..count).map(move |index| Compartment {
            index,
            length,
            radius_left: self.radius_at(index as f64 / count as f64),
            radius_right: self.radius_at((index + 1) as f64 / count as f64),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Soma(Soma),
    Cable(Cable),
}

impl Segment {
    pub fn num_compartments(&self) -> usize {
        match self {
            Segment::Soma(_) => 1,
            Segment::Cable(cable) => cable.num_compartments,
        }
    }

    pub fn properties(&self) -> PassiveProperties {
        match self {
            Segment::Soma(soma) => soma.properties,
            Segment::Cable(cable) => cable.properties,
        }
    }

    pub fn mechanisms(&self) -> &[MechanismSpec] {
        match self {
            Segment::Soma(soma) => &soma.mechanisms,
            Segment::Cable(cable) => &cable.mechanisms,
        }
    }

    /// The named mechanism attached to this segment, if any.
    pub fn mechanism(&self, name: &str) -> Option<&MechanismSpec> {
        self.mechanisms().iter().find(|spec| spec.name() == name)
    }

    pub fn as_soma(&self) -> Option<&Soma> {
        match self {
            Segment::Soma(soma) => Some(soma),
            Segment::Cable(_) => None,
        }
    }

    pub fn as_cable(&self) -> Option<&Cable> {
        match self {
            Segment::Cable(cable) => Some(cable),
            Segment::Soma(_) => None,
        }
    }
}

/// A position on a segment: 0 at the proximal end, 1 at the distal end.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub segment: usize,
    pub position: f64,
}

impl Location {
    pub fn new(segment: usize, position: f64) -> Self {
        Self { segment, position }
    }
}

/// Rectangular current-clamp stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IClamp {
    /// Onset time, ms.
    pub delay: f64,
    /// Pulse width, ms.
    pub duration: f64,
    /// Injected current while active, nA.
    pub amplitude: f64,
}

impl IClamp {
    pub fn new(delay: f64, duration: f64, amplitude: f64) -> Self {
        Self { delay, duration, amplitude }
    }

    /// Injected current at time `t`, nA.
    pub fn amplitude(&self, t: f64) -> f64 {
        if t >= self.delay && t < self.delay + self.duration {
            self.amplitude
        } else {
            0.0
        }
    }
}

/// Morphologically detailed description of one cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CellDescription {
    segments: Vec<Segment>,
    stimuli: Vec<(Location, IClamp)>,
    synapses: Vec<Location>,
}

impl CellDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a soma segment and returns it for mechanism attachment.
    pub fn add_soma(&mut self, radius: f64) -> &mut Soma {
        self.segments.push(Segment::Soma(Soma {
            radius,
            properties: PassiveProperties::default(),
            mechanisms: Vec::new(),
        }));
        match self.segments.last_mut() {
            Some(Segment::Soma(soma)) => soma,
            _ => unreachable!("soma was just pushed"),
        }
    }

    /// Appends a cable attached to segment `parent` and returns it for
    /// mechanism attachment.
    pub fn add_cable(
        &mut self,
        parent: usize,
        length: f64,
        radius_proximal: f64,
        radius_distal: f64,
        num_compartments: usize,
    ) -> &mut Cable {
        self.segments.push(Segment::Cable(Cable {
            parent,
            length,
            radius_proximal,
            radius_distal,
            num_compartments,
            properties: PassiveProperties::default(),
            mechanisms: Vec::new(),
        }));
        match self.segments.last_mut() {
            Some(Segment::Cable(cable)) => cable,
            _ => unreachable!("cable was just pushed"),
        }
    }

    pub fn add_stimulus(&mut self, location: Location, clamp: IClamp) {
        self.stimuli.push((location, clamp));
    }

    pub fn add_synapse(&mut self, location: Location) {
        self.synapses.push(location);
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }

    pub fn num_compartments(&self) -> usize {
        self.segments.iter().map(Segment::num_compartments).sum()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn stimuli(&self) -> &[(Location, IClamp)] {
        &self.stimuli
    }

    pub fn synapses(&self) -> &[Location] {
        &self.synapses
    }

    /// Lowers the segment tree to CV index structures.
    pub fn model(&self) -> Result<CompartmentModel, MorphologyError> {
        if self.segments.is_empty() {
            return Err(MorphologyError::MissingSoma);
        }

        let mut parent_index = Vec::with_capacity(self.num_compartments());
        let mut segment_index = Vec::with_capacity(self.segments.len() + 1);
        segment_index.push(0);

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Soma(_) => {
                    if index != 0 {
                        return Err(MorphologyError::MisplacedSoma { index });
                    }
                    // The root is its own parent sentinel.
                    parent_index.push(CvIndex(0));
                }
                Segment::Cable(cable) => {
                    if index == 0 {
                        return Err(MorphologyError::MissingSoma);
                    }
                    if cable.parent >= index {
                        return Err(MorphologyError::ParentOrdering {
                            child: index,
                            parent: cable.parent,
                        });
                    }
                    if cable.num_compartments == 0 {
                        return Err(MorphologyError::EmptyCable { index });
                    }
                    // The first compartment couples to the last CV of the
                    // parent segment, the rest chain within the cable.
                    let parent_cv = CvIndex(segment_index[cable.parent + 1] - 1);
                    let first = parent_index.len();
                    parent_index.push(parent_cv);
                    for offset in 1..cable.num_compartments {
                        parent_index.push(CvIndex(first + offset - 1));
                    }
                }
            }
            segment_index.push(parent_index.len());
        }

        Ok(CompartmentModel { parent_index, segment_index })
    }
}

/// CV index structures derived from a cell description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompartmentModel {
    /// Parent CV of each CV; entry 0 is the self-sentinel root.
    pub parent_index: Vec<CvIndex>,
    /// Prefix table: segment `s` owns CVs `segment_index[s]..segment_index[s+1]`.
    pub segment_index: Vec<usize>,
}

impl CompartmentModel {
    pub fn num_compartments(&self) -> usize {
        self.parent_index.len()
    }

    pub fn num_segments(&self) -> usize {
        self.segment_index.len() - 1
    }

    pub fn segment_range(&self, segment: usize) -> Range<usize> {
        self.segment_index[segment]..self.segment_index[segment + 1]
    }

    /// Resolves a segment location to the CV containing it.
    pub fn compartment_index(&self, location: Location) -> Result<CvIndex, MorphologyError> {
        let count = self.num_segments();
        if location.segment >= count {
            return Err(MorphologyError::InvalidSegment {
                segment: location.segment,
                count,
            });
        }
        if !(0.0..=1.0).contains(&location.position) {
            return Err(MorphologyError::InvalidPosition {
                segment: location.segment,
                position: location.position,
            });
        }
        let range = self.segment_range(location.segment);
        let within = ((location.position * range.len() as f64) as usize).min(range.len() - 1);
        Ok(CvIndex(range.start + within))
    }
}
