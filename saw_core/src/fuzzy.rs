//! Two-input Mamdani inference over motor current and its change.
//!
//! min for AND, clip implication, max aggregation, centroid of the sampled
//! output universe. Inputs are clamped into their universes first, so
//! readings past the edge count as fully in the edge term.
use crate::error::BuildError;

/// Shape of a linguistic term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Membership {
    Triangle(f64, f64, f64),
    Trapezoid(f64, f64, f64, f64),
}

impl Membership {
    #[inline]
    pub fn degree(&self, x: f64) -> f64 {
        match *self {
            Self::Triangle(a, b, c) => trapezoid(x, a, b, b, c),
            Self::Trapezoid(a, b, c, d) => trapezoid(x, a, b, c, d),
        }
    }
}

/// Degenerate shoulders (`a == b` or `c == d`) are vertical edges.
#[inline]
fn trapezoid(x: f64, a: f64, b: f64, c: f64, d: f64) -> f64 {
    if x < a || x > d {
        0.0
    } else if x < b {
        (x - a) / (b - a)
    } else if x <= c {
        1.0
    } else {
        (d - x) / (d - c)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub name: String,
    pub shape: Membership,
}

/// A fuzzy variable: a closed universe and its terms.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub min: f64,
    pub max: f64,
    pub terms: Vec<Term>,
}

impl Variable {
    pub fn new(name: &str, min: f64, max: f64, terms: &[(&str, Membership)]) -> Self {
        Self {
            name: name.to_string(),
            min,
            max,
            terms: terms
                .iter()
                .map(|(n, shape)| Term {
                    name: (*n).to_string(),
                    shape: *shape,
                })
                .collect(),
        }
    }

    pub fn term_index(&self, name: &str) -> Option<usize> {
        self.terms.iter().position(|t| t.name == name)
    }

    fn fuzzify(&self, x: f64) -> Vec<f64> {
        let x = x.clamp(self.min, self.max);
        self.terms.iter().map(|t| t.shape.degree(x)).collect()
    }
}

/// `IF current IS terms[current] AND delta IS terms[delta] THEN output IS terms[output]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub current: usize,
    pub delta: usize,
    pub output: usize,
}

#[derive(Debug, Clone)]
pub struct FuzzyEngine {
    current: Variable,
    delta: Variable,
    output: Variable,
    rules: Vec<Rule>,
    samples: Vec<f64>,
}

const CURRENT_TERMS: [&str; 5] = ["very_low", "low", "ideal", "high", "very_high"];
const DELTA_TERMS: [&str; 5] = ["nb", "ns", "z", "ps", "pb"];
const OUTPUT_TERMS: [&str; 7] = ["nb", "nm", "ns", "z", "ps", "pm", "pb"];

/// Rows: current term; columns: delta term (`nb ns z ps pb`).
const CANONICAL_GRID: [[&str; 5]; 5] = [
    ["pb", "pb", "pb", "pm", "ps"],
    ["pm", "ps", "ps", "ps", "ps"],
    ["ps", "z", "z", "z", "ns"],
    ["ns", "ns", "ns", "ns", "nm"],
    ["ns", "nm", "nb", "nb", "nb"],
];

pub const DEFAULT_RESOLUTION: f64 = 0.01;

impl FuzzyEngine {
    pub fn new(
        current: Variable,
        delta: Variable,
        output: Variable,
        rules: Vec<Rule>,
        resolution: f64,
    ) -> Result<Self, BuildError> {
        for v in [&current, &delta, &output] {
            if !(v.min.is_finite() && v.max.is_finite() && v.min < v.max) {
                return Err(BuildError::InvalidConfig(format!(
                    "fuzzy variable {} has an empty universe",
                    v.name
                )));
            }
            if v.terms.is_empty() {
                return Err(BuildError::InvalidConfig(format!(
                    "fuzzy variable {} has no terms",
                    v.name
                )));
            }
        }
        if rules.iter().any(|r| {
            r.current >= current.terms.len()
                || r.delta >= delta.terms.len()
                || r.output >= output.terms.len()
        }) {
            return Err(BuildError::InvalidConfig(
                "fuzzy rule refers to an unknown term".into(),
            ));
        }
        let samples = sample_universe(output.min, output.max, resolution)?;
        Ok(Self {
            current,
            delta,
            output,
            rules,
            samples,
        })
    }

    /// Current in amps over [10, 30], current change over [-10, 10],
    /// correction factor over [-3, 3], full 25-rule grid.
    pub fn canonical() -> Self {
        Self::canonical_with_resolution(DEFAULT_RESOLUTION)
    }

    pub fn canonical_with_resolution(resolution: f64) -> Self {
        use Membership::{Trapezoid, Triangle};

        let current = Variable::new(
            "current",
            10.0,
            30.0,
            &[
                (CURRENT_TERMS[0], Trapezoid(10.0, 10.0, 13.0, 16.0)),
                (CURRENT_TERMS[1], Triangle(14.0, 17.0, 20.0)),
                (CURRENT_TERMS[2], Triangle(19.0, 22.0, 25.0)),
                (CURRENT_TERMS[3], Triangle(24.0, 26.0, 28.0)),
                (CURRENT_TERMS[4], Trapezoid(27.0, 29.0, 30.0, 30.0)),
            ],
        );
        let delta = Variable::new(
            "current_delta",
            -10.0,
            10.0,
            &[
                (DELTA_TERMS[0], Trapezoid(-10.0, -10.0, -3.0, -1.0)),
                (DELTA_TERMS[1], Triangle(-3.0, -1.0, 1.0)),
                (DELTA_TERMS[2], Triangle(-1.0, 0.0, 1.0)),
                (DELTA_TERMS[3], Triangle(-1.0, 1.0, 3.0)),
                (DELTA_TERMS[4], Trapezoid(1.0, 3.0, 10.0, 10.0)),
            ],
        );
        let output = Variable::new(
            "correction_factor",
            -3.0,
            3.0,
            &[
                (OUTPUT_TERMS[0], Triangle(-3.0, -3.0, -2.0)),
                (OUTPUT_TERMS[1], Triangle(-3.0, -2.0, -1.0)),
                (OUTPUT_TERMS[2], Triangle(-2.0, -1.0, 0.0)),
                (OUTPUT_TERMS[3], Triangle(-1.0, 0.0, 1.0)),
                (OUTPUT_TERMS[4], Triangle(0.0, 1.0, 2.0)),
                (OUTPUT_TERMS[5], Triangle(1.0, 2.0, 3.0)),
                (OUTPUT_TERMS[6], Triangle(2.0, 3.0, 3.0)),
            ],
        );

        let mut rules = Vec::with_capacity(25);
        for (ci, row) in CANONICAL_GRID.iter().enumerate() {
            for (di, out) in row.iter().enumerate() {
                let output_idx = OUTPUT_TERMS.iter().position(|t| t == out).unwrap_or(3);
                rules.push(Rule {
                    current: ci,
                    delta: di,
                    output: output_idx,
                });
            }
        }

        let resolution = if resolution > 0.0 && resolution.is_finite() {
            resolution
        } else {
            DEFAULT_RESOLUTION
        };
        let samples = sample_universe(output.min, output.max, resolution)
            .unwrap_or_else(|_| vec![output.min, output.max]);
        Self {
            current,
            delta,
            output,
            rules,
            samples,
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn output_range(&self) -> (f64, f64) {
        (self.output.min, self.output.max)
    }

    /// Rule firing strength per output term.
    fn activations(&self, current: f64, delta: f64) -> Vec<f64> {
        let mu_c = self.current.fuzzify(current);
        let mu_d = self.delta.fuzzify(delta);
        let mut act = vec![0.0f64; self.output.terms.len()];
        for r in &self.rules {
            let w = mu_c[r.current].min(mu_d[r.delta]);
            if w > act[r.output] {
                act[r.output] = w;
            }
        }
        act
    }

    /// Correction factor for this current and current change.
    ///
    /// Returns 0.0 when no rule fires or an input is not finite.
    pub fn infer(&self, current: f64, delta: f64) -> f64 {
        if !(current.is_finite() && delta.is_finite()) {
            return 0.0;
        }
        let act = self.activations(current, delta);
        if act.iter().all(|w| *w <= 0.0) {
            return 0.0;
        }

        let mut num = 0.0;
        let mut den = 0.0;
        for &x in &self.samples {
            let mu = self
                .output
                .terms
                .iter()
                .zip(&act)
                .map(|(t, w)| t.shape.degree(x).min(*w))
                .fold(0.0f64, f64::max);
            num += x * mu;
            den += mu;
        }
        if den <= 0.0 {
            return 0.0;
        }
        (num / den).clamp(self.output.min, self.output.max)
    }
}

impl Default for FuzzyEngine {
    fn default() -> Self {
        Self::canonical()
    }
}

fn sample_universe(min: f64, max: f64, resolution: f64) -> Result<Vec<f64>, BuildError> {
    if !(resolution > 0.0 && resolution.is_finite()) {
        return Err(BuildError::InvalidConfig(
            "fuzzy resolution must be > 0".into(),
        ));
    }
    let steps = ((max - min) / resolution).round().max(1.0);
    if steps > 1e6 {
        return Err(BuildError::InvalidConfig(
            "fuzzy resolution is too fine for the output universe".into(),
        ));
    }
    let n = steps as usize;
    let dx = (max - min) / steps;
    Ok((0..=n).map(|i| min + dx * i as f64).collect())
}
