#![forbid(unsafe_code)]

//! Channel kinetics: passive leak and Hodgkin–Huxley.
//!
//! Voltages are mV, time is ms, conductances are S/cm², currents come out
//! in mA/cm². The Hodgkin–Huxley rates are the squid-axon values at 6.3 °C.

use serde::{Deserialize, Serialize};

/// Passive leak parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Leak {
    /// Conductance, S/cm².
    pub g: f64,
    /// Reversal potential, mV.
    pub e: f64,
}

impl Default for Leak {
    fn default() -> Self {
        Self { g: 0.001, e: -65.0 }
    }
}

pub fn leak_current(leak: Leak, v: f64) -> f64 {
    leak.g * (v - leak.e)
}

/// Hodgkin–Huxley maximal conductances (S/cm²) and leak reversal (mV).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HhParams {
    pub gnabar: f64,
    pub gkbar: f64,
    pub gl: f64,
    pub el: f64,
}

impl Default for HhParams {
    fn default() -> Self {
        Self {
            gnabar: 0.12,
            gkbar: 0.036,
            gl: 0.0003,
            el: -54.3,
        }
    }
}

/// Activation and inactivation gates of the Hodgkin–Huxley channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GatingState {
    pub m: f64,
    pub h: f64,
    pub n: f64,
}

impl GatingState {
    /// Gates at their steady state for a fixed voltage.
    pub fn steady(v: f64) -> Self {
        Self {
            m: gate_steady(alpha_m(v), beta_m(v)),
            h: gate_steady(alpha_h(v), beta_h(v)),
            n: gate_steady(alpha_n(v), beta_n(v)),
        }
    }

    /// Advances all gates by `dt` at voltage `v` with the exponential-Euler
    /// update, which is exact for frozen rates.
    pub fn update(&mut self, v: f64, dt: f64) {
        self.m = integrate_gate(self.m, alpha_m(v), beta_m(v), dt);
        self.h = integrate_gate(self.h, alpha_h(v), beta_h(v), dt);
        self.n = integrate_gate(self.n, alpha_n(v), beta_n(v), dt);
    }
}

/// Total Hodgkin–Huxley membrane current density at voltage `v`, mA/cm².
pub fn hh_current(params: HhParams, gates: GatingState, v: f64, e_na: f64, e_k: f64) -> f64 {
    let m3 = gates.m * gates.m * gates.m;
    let n4 = gates.n * gates.n * gates.n * gates.n;
    let i_na = params.gnabar * m3 * gates.h * (v - e_na);
    let i_k = params.gkbar * n4 * (v - e_k);
    let i_l = params.gl * (v - params.el);
    i_na + i_k + i_l
}

pub fn alpha_m(v: f64) -> f64 {
    exprelr(-(v + 40.0) / 10.0)
}

pub fn beta_m(v: f64) -> f64 {
    4.0 * (-(v + 65.0) / 18.0).exp()
}

pub fn alpha_h(v: f64) -> f64 {
    0.07 * (-(v + 65.0) / 20.0).exp()
}

pub fn beta_h(v: f64) -> f64 {
    1.0 / (1.0 + (-(v + 35.0) / 10.0).exp())
}

pub fn alpha_n(v: f64) -> f64 {
    0.1 * exprelr(-(v + 55.0) / 10.0)
}

pub fn beta_n(v: f64) -> f64 {
    0.125 * (-(v + 65.0) / 80.0).exp()
}

fn gate_steady(alpha: f64, beta: f64) -> f64 {
    alpha / (alpha + beta)
}

fn integrate_gate(x: f64, alpha: f64, beta: f64, dt: f64) -> f64 {
    let rate = alpha + beta;
    let steady = alpha / rate;
    x + (1.0 - (-dt * rate).exp()) * (steady - x)
}

/// x / (exp(x) − 1), continued through the removable singularity at 0.
fn exprelr(x: f64) -> f64 {
    if x.abs() < 1e-7 {
        1.0 - x / 2.0
    } else {
        x / (x.exp() - 1.0)
    }
}
