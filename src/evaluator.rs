//! The built network: a derived, array-indexed structure used for the
//! single-pass feed-forward activation.

use crate::gene::ConnectionGene;
use crate::genome::Genome;

#[derive(Debug, Clone, Copy)]
struct Neuron {
    value: f32,
}

/// A genome compiled into a flat array of neurons with cached incoming-gene
/// lists, ready for repeated `fire` calls. Must be rebuilt after any
/// mutation to the source genome.
pub struct Evaluator {
    num_inputs: usize,
    num_outputs: usize,
    neurons: Vec<Neuron>,
    // Indexed by neuron id; each entry is the neuron's active incoming genes
    // sorted ascending by `in_node`.
    incoming: Vec<Vec<ConnectionGene>>,
}

impl Evaluator {
    /// Builds the evaluator from `genome`, deriving per-output incoming-gene
    /// lists once so repeated `fire` calls never re-walk the gene list.
    pub fn build(genome: &Genome) -> Self {
        let num_inputs = genome.num_inputs();
        let num_outputs = genome.num_outputs();

        let height = genome
            .genes()
            .iter()
            .map(|g| g.in_node.max(g.out_node))
            .max()
            .map(|m| m + 1)
            .unwrap_or(num_inputs + num_outputs)
            .max(num_inputs + num_outputs);

        let mut incoming: Vec<Vec<ConnectionGene>> = vec![Vec::new(); height];
        for gene in genome.genes() {
            if gene.active {
                incoming[gene.out_node].push(*gene);
            }
        }
        for list in &mut incoming {
            list.sort_by_key(|g| g.in_node);
        }

        Evaluator {
            num_inputs,
            num_outputs,
            neurons: vec![Neuron { value: 0.0 }; height],
            incoming,
        }
    }

    /// One snapshot-then-update feed-forward pass. `inputs` must have
    /// `num_inputs` entries (the last of which is conventionally ignored,
    /// since the bias neuron is always forced to 1.0).
    pub fn fire(&mut self, inputs: &[f32]) -> Vec<f32> {
        debug_assert_eq!(inputs.len(), self.num_inputs);

        for (i, &value) in inputs.iter().enumerate().take(self.num_inputs) {
            self.neurons[i].value = value;
        }
        self.neurons[self.num_inputs - 1].value = 1.0;

        // Snapshot happens here: every neuron below reads this frozen copy,
        // never another neuron's freshly computed value in the same pass.
        let snapshot: Vec<f32> = self.neurons.iter().map(|n| n.value).collect();

        for i in 0..self.neurons.len() {
            if self.incoming[i].is_empty() {
                continue;
            }
            let sum: f32 = self.incoming[i]
                .iter()
                .map(|g| g.weight * snapshot[g.in_node])
                .sum();
            self.neurons[i].value = sum.tanh();
        }

        self.neurons[self.num_inputs..self.num_inputs + self.num_outputs]
            .iter()
            .map(|n| n.value)
            .collect()
    }
}
