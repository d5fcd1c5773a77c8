//! The innovation registry ("consultor"): a monotonic, process-wide
//! assignment of innovation numbers to directed `(in, out)` connections,
//! plus the speciation coefficients and mutation parameters every genome in
//! a run shares.

use std::collections::HashMap;

use crate::config::{MutationParams, SpeciationCoefficients};

/// Shared by every [`crate::genome::Genome`] in one evolutionary run. Never
/// retrieved via ambient/global state — always passed explicitly.
#[derive(Debug)]
pub struct InnovationRegistry {
    counter: usize,
    pairs: HashMap<(usize, usize), usize>,
    pub coefficients: SpeciationCoefficients,
    pub mutation: MutationParams,
}

impl InnovationRegistry {
    pub fn new(coefficients: SpeciationCoefficients, mutation: MutationParams) -> Self {
        InnovationRegistry {
            counter: 0,
            pairs: HashMap::new(),
            coefficients,
            mutation,
        }
    }

    /// Returns the innovation for `(in_node, out_node)`, allocating a new one
    /// if this is the first time the pair has been seen in this run.
    pub fn acquire(&mut self, in_node: usize, out_node: usize) -> usize {
        if let Some(&innovation) = self.pairs.get(&(in_node, out_node)) {
            return innovation;
        }
        let innovation = self.counter;
        self.pairs.insert((in_node, out_node), innovation);
        self.counter += 1;
        log::debug!("registry: new innovation {innovation} for ({in_node} -> {out_node})");
        innovation
    }

    /// Primes the registry by connecting every input (including bias) to
    /// every output, in input-major, output-minor order, as required by the
    /// primitive genome construction. Must be called once, before any other
    /// `acquire` call, on a fresh registry.
    pub fn prime(&mut self, num_inputs: usize, num_outputs: usize) {
        for in_id in 0..num_inputs {
            for out_id in num_inputs..num_inputs + num_outputs {
                self.acquire(in_id, out_id);
            }
        }
    }

    pub fn innovation_count(&self) -> usize {
        self.counter
    }

    /// Snapshot of every `(in, out) -> innovation` pair known so far, used
    /// when serializing a packet so that a fresh registry can be replayed
    /// into the same state on load.
    pub fn pairs_by_innovation(&self) -> Vec<(usize, usize, usize)> {
        let mut out: Vec<(usize, usize, usize)> = self
            .pairs
            .iter()
            .map(|(&(a, b), &innov)| (a, b, innov))
            .collect();
        out.sort_by_key(|&(_, _, innov)| innov);
        out
    }
}
