//! Genome (network) construction and mutation.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::MutationParams;
use crate::distance;
use crate::gene::{ConnectionGene, GeneMutateFlag};
use crate::node::{Node, NodeKind};
use crate::registry::InnovationRegistry;

/// A variable-topology genome: an ordered node list, an innovation-ordered
/// gene list, and a fitness score reset at the start of every generation.
///
/// The registry is never stored on the genome (see the "global-ish registry"
/// design note) — it is threaded explicitly through every call that needs to
/// mint new innovations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genome {
    pub(crate) num_inputs: usize,
    pub(crate) num_outputs: usize,
    pub(crate) nodes: Vec<Node>,
    pub(crate) genes: Vec<ConnectionGene>,
    pub fitness: f64,
    pub id: u64,
}

impl Genome {
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn genes(&self) -> &[ConnectionGene] {
        &self.genes
    }

    pub fn gene_count(&self) -> usize {
        self.genes.len()
    }

    /// Fresh, fully-connected input -> output wiring. `num_inputs` must
    /// already include the bias slot.
    pub fn primitive(
        num_inputs: usize,
        num_outputs: usize,
        registry: &mut InnovationRegistry,
        rng: &mut impl Rng,
        id: u64,
    ) -> Self {
        let mut nodes = Vec::with_capacity(num_inputs + num_outputs);
        for i in 0..num_inputs {
            let kind = if i == num_inputs - 1 {
                NodeKind::InputBias
            } else {
                NodeKind::Input
            };
            nodes.push(Node::new(i, kind));
        }
        for o in 0..num_outputs {
            nodes.push(Node::new(num_inputs + o, NodeKind::Output));
        }

        let mut genome = Genome {
            num_inputs,
            num_outputs,
            nodes,
            genes: Vec::with_capacity(num_inputs * num_outputs),
            fitness: 0.0,
            id,
        };

        for in_id in 0..num_inputs {
            for out_id in num_inputs..num_inputs + num_outputs {
                let innovation = registry.acquire(in_id, out_id);
                let weight = rng.random_range(-1.0..=1.0);
                genome.ordered_insert(ConnectionGene::new(innovation, in_id, out_id, weight));
            }
        }
        genome
    }

    /// Builds a genome with an explicit node list and no genes yet, used
    /// when reconstructing from a persisted packet.
    pub(crate) fn empty(num_inputs: usize, num_outputs: usize, nodes: Vec<Node>, id: u64) -> Self {
        Genome {
            num_inputs,
            num_outputs,
            nodes,
            genes: Vec::new(),
            fitness: 0.0,
            id,
        }
    }

    /// Inserts `gene` keeping `genes` strictly ascending by innovation.
    /// Duplicates cannot occur because the registry guarantees a unique
    /// innovation per `(in, out)` pair.
    pub(crate) fn ordered_insert(&mut self, gene: ConnectionGene) {
        let slot = self
            .genes
            .binary_search_by_key(&gene.innovation, |g| g.innovation)
            .unwrap_or_else(|slot| slot);
        self.genes.insert(slot, gene);
    }

    fn has_connection(&self, in_node: usize, out_node: usize) -> bool {
        self.genes
            .iter()
            .any(|g| g.in_node == in_node && g.out_node == out_node)
    }

    fn is_input(&self, node_id: usize) -> bool {
        node_id < self.num_inputs
    }

    /// Runs topology mutation (add-connection, falling through to add-node on
    /// failure, gated by `topology_mutate_chance`) followed unconditionally
    /// by weight mutation.
    pub fn mutate(&mut self, registry: &mut InnovationRegistry, rng: &mut impl Rng) {
        let topology_chance = registry.mutation.topology_mutate_chance;
        if rng.random::<f64>() < topology_chance {
            let added = self.try_add_connection(registry, rng);
            if !added {
                self.add_node(registry, rng);
            }
        }
        self.mutate_weights(registry, rng);
    }

    /// Up to `|nodes|^2` attempts to find an unconnected pair. Returns
    /// whether a new connection was created.
    fn try_add_connection(
        &mut self,
        registry: &mut InnovationRegistry,
        rng: &mut impl Rng,
    ) -> bool {
        let n = self.nodes.len();
        let attempts = n.saturating_mul(n).max(1);
        let b_candidates: Vec<usize> = self
            .nodes
            .iter()
            .filter(|node| !self.is_input(node.id()))
            .map(|node| node.id())
            .collect();
        if b_candidates.is_empty() {
            return false;
        }
        for _ in 0..attempts {
            let a = self.nodes[rng.random_range(0..n)].id();
            let b = b_candidates[rng.random_range(0..b_candidates.len())];
            if a == b {
                continue;
            }
            if !self.has_connection(a, b) {
                let innovation = registry.acquire(a, b);
                self.ordered_insert(ConnectionGene::new(innovation, a, b, 1.0));
                return true;
            }
            if !self.is_input(a) && !self.has_connection(b, a) {
                let innovation = registry.acquire(b, a);
                self.ordered_insert(ConnectionGene::new(innovation, b, a, 1.0));
                return true;
            }
        }
        false
    }

    /// Splits a random active gene with a new hidden node.
    fn add_node(&mut self, registry: &mut InnovationRegistry, rng: &mut impl Rng) {
        let active_indices: Vec<usize> = self
            .genes
            .iter()
            .enumerate()
            .filter(|(_, g)| g.active)
            .map(|(i, _)| i)
            .collect();
        if active_indices.is_empty() {
            return;
        }
        let idx = active_indices[rng.random_range(0..active_indices.len())];
        let (old_in, old_out, old_weight) = {
            let gene = &mut self.genes[idx];
            gene.active = false;
            (gene.in_node, gene.out_node, gene.weight)
        };

        let new_node_id = self.nodes.len();
        self.nodes.push(Node::new(new_node_id, NodeKind::Hidden));

        let in_innovation = registry.acquire(old_in, new_node_id);
        let out_innovation = registry.acquire(new_node_id, old_out);
        self.ordered_insert(ConnectionGene::new(in_innovation, old_in, new_node_id, 1.0));
        self.ordered_insert(ConnectionGene::new(
            out_innovation,
            new_node_id,
            old_out,
            old_weight,
        ));
    }

    fn mutate_weights(&mut self, registry: &InnovationRegistry, rng: &mut impl Rng) {
        let chance = registry.mutation.gene_mutate_chance;
        let flags = &registry.mutation.gene_mutate_flags;
        if flags.is_empty() {
            return;
        }
        for gene in &mut self.genes {
            if rng.random::<f64>() < chance {
                let flag = flags[rng.random_range(0..flags.len())];
                apply_gene_mutation(gene, flag, rng);
            }
        }
    }

    /// Distance to `other` under the registry's speciation coefficients.
    pub fn distance(&self, other: &Genome, registry: &InnovationRegistry) -> f64 {
        distance::compute(self, other, &registry.coefficients)
    }

    /// Innovation-aligned crossover, see [`distance::crossover`].
    pub fn crossover(&self, other: &Genome, mutation: &MutationParams, rng: &mut impl Rng) -> Genome {
        distance::crossover(self, other, mutation, rng)
    }
}

fn apply_gene_mutation(gene: &mut ConnectionGene, flag: GeneMutateFlag, rng: &mut impl Rng) {
    match flag {
        GeneMutateFlag::FlipSign => gene.weight = -gene.weight,
        GeneMutateFlag::ToggleState => gene.active = !gene.active,
        GeneMutateFlag::SetRandom => gene.weight = rng.random_range(-1.0..=1.0),
        GeneMutateFlag::ScaleUp => gene.weight *= 1.0 + rng.random::<f32>(),
        GeneMutateFlag::ScaleDown => gene.weight *= rng.random::<f32>(),
    }
}
