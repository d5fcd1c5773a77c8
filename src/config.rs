//! Process-wide configuration: speciation coefficients, mutation parameters,
//! and the parameters that shape a generation run (LSES = "lifecycle
//! scheduling of evaluation and speciation").

use std::cell::Cell;
use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gene::GeneMutateFlag;

/// Tagged classification of how a gene was inherited during crossover; keys
/// the state-perturbation table in [`MutationParams::parent_gene_cross_chance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    BothActive,
    BothInactive,
    Inversed,
    DominantActive,
    DominantInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionMode {
    Random,
    LogarithmicRankedPick,
}

/// Speciation distance coefficients plus the dynamic delta threshold. Owned
/// by the [`crate::registry::InnovationRegistry`] and shared by every
/// network in a run.
#[derive(Debug, Serialize, Deserialize)]
pub struct SpeciationCoefficients {
    pub c_disjoint: f64,
    pub c_excess: f64,
    pub c_avg_weight: f64,
    /// Mutable at runtime to support dynamic speciation pressure.
    delta_threshold: Cell<f64>,
}

impl SpeciationCoefficients {
    pub fn new(c_disjoint: f64, c_excess: f64, c_avg_weight: f64, delta_threshold: f64) -> Self {
        SpeciationCoefficients {
            c_disjoint,
            c_excess,
            c_avg_weight,
            delta_threshold: Cell::new(delta_threshold),
        }
    }

    pub fn delta_threshold(&self) -> f64 {
        self.delta_threshold.get()
    }

    pub fn set_delta_threshold(&self, value: f64) {
        self.delta_threshold.set(value);
    }
}

impl Default for SpeciationCoefficients {
    fn default() -> Self {
        // Disjoint coefficient 1.0, weight coefficient 0.3 split across
        // excess/disjoint.
        SpeciationCoefficients::new(1.0, 1.0, 0.3, 3.0)
    }
}

impl Clone for SpeciationCoefficients {
    fn clone(&self) -> Self {
        SpeciationCoefficients::new(
            self.c_disjoint,
            self.c_excess,
            self.c_avg_weight,
            self.delta_threshold(),
        )
    }
}

/// Operators a gene's weight may be subjected to during weight mutation, and
/// the crossover state-perturbation chances, shared process-wide via the
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationParams {
    pub topology_mutate_chance: f64,
    pub gene_mutate_chance: f64,
    pub gene_mutate_flags: Vec<GeneMutateFlag>,
    pub parent_gene_cross_chance_default: f64,
    pub parent_gene_cross_chance_lookup: HashMap<Comparison, f64>,
}

impl MutationParams {
    pub fn chance_for(&self, comparison: Comparison) -> f64 {
        *self
            .parent_gene_cross_chance_lookup
            .get(&comparison)
            .unwrap_or(&self.parent_gene_cross_chance_default)
    }
}

impl Default for MutationParams {
    fn default() -> Self {
        MutationParams {
            topology_mutate_chance: 0.08,
            gene_mutate_chance: 0.8,
            gene_mutate_flags: GeneMutateFlag::ALL.to_vec(),
            parent_gene_cross_chance_default: 0.25,
            parent_gene_cross_chance_lookup: HashMap::new(),
        }
    }
}

/// Parameters governing one evolutionary run's population lifecycle.
#[derive(Debug, Clone)]
pub struct LsesParams {
    pub selection_mode: SelectionMode,
    pub population_size: usize,
    pub generation_test_time: Duration,
    /// Includes the bias input.
    pub number_of_input_perceptrons: usize,
    pub number_of_output_perceptrons: usize,
    pub elite: f32,
    pub beta: f32,
    pub remove_worst: f32,
}

impl Default for LsesParams {
    fn default() -> Self {
        LsesParams {
            selection_mode: SelectionMode::LogarithmicRankedPick,
            population_size: 150,
            generation_test_time: Duration::from_secs(20),
            number_of_input_perceptrons: 3,
            number_of_output_perceptrons: 1,
            elite: 0.1,
            beta: 1.0,
            remove_worst: 0.5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_default_chance() {
        let params = MutationParams::default();
        assert_eq!(
            params.chance_for(Comparison::BothActive),
            params.parent_gene_cross_chance_default
        );
    }

    #[test]
    fn delta_threshold_is_mutable_in_place() {
        let coeffs = SpeciationCoefficients::default();
        coeffs.set_delta_threshold(5.0);
        assert_eq!(coeffs.delta_threshold(), 5.0);
    }
}
