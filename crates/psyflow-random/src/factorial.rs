//! Full factorial designs

use serde_json::Value;

use psyflow_core::{DataMap, FlowResult, SamplingError};

use crate::{unpack, Randomizer, Repetitions};

/// Named factors with their levels, in declaration order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FactorLevels {
    factors: Vec<(String, Vec<Value>)>,
}

impl FactorLevels {
    pub fn new() -> Self {
        FactorLevels::default()
    }

    /// Add a factor. Declaring a name twice replaces its levels.
    pub fn factor<V: Into<Value>>(
        mut self,
        name: impl Into<String>,
        levels: impl IntoIterator<Item = V>,
    ) -> Self {
        let name = name.into();
        let levels: Vec<Value> = levels.into_iter().map(Into::into).collect();
        match self.factors.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = levels,
            None => self.factors.push((name, levels)),
        }
        self
    }

    /// Parse `{"factor": [levels..], ..}`
    pub fn from_map(map: &DataMap) -> Option<Self> {
        let mut out = FactorLevels::new();
        for (name, levels) in map {
            out = out.factor(name.clone(), levels.as_array()?.iter().cloned());
        }
        Some(out)
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of cells in the design
    pub fn cells(&self) -> usize {
        if self.factors.is_empty() {
            return 0;
        }
        self.factors.iter().map(|(_, levels)| levels.len()).product()
    }

    /// Every combination of levels; the first factor varies slowest
    pub fn combinations(&self) -> Vec<DataMap> {
        let mut out = vec![DataMap::new()];
        for (name, levels) in &self.factors {
            let mut next = Vec::with_capacity(out.len() * levels.len());
            for partial in &out {
                for level in levels {
                    let mut cell = partial.clone();
                    cell.insert(name.clone(), level.clone());
                    next.push(cell);
                }
            }
            out = next;
        }
        if self.factors.is_empty() {
            out.clear();
        }
        out
    }
}

impl Randomizer {
    /// Shuffled full factorial design, each cell `repetitions` times
    pub fn factorial(
        &mut self,
        design: &FactorLevels,
        repetitions: impl Into<Repetitions>,
    ) -> FlowResult<Vec<DataMap>> {
        let cells = design.combinations();
        if cells.is_empty() {
            return Err(SamplingError::EmptyDesign.into());
        }
        self.repeat(&cells, repetitions)
    }

    /// [`factorial`](Self::factorial) as one record of parallel arrays
    pub fn factorial_unpacked(
        &mut self,
        design: &FactorLevels,
        repetitions: impl Into<Repetitions>,
    ) -> FlowResult<DataMap> {
        Ok(unpack(&self.factorial(design, repetitions)?))
    }
}
