//! A single species-cluster: a labeled list of genomes judged same-species.

use rand::seq::IteratorRandom;
use rand::Rng;

use crate::genome::Genome;
use crate::registry::InnovationRegistry;

/// One species cluster. `id` is a human-readable label (a hex colour by
/// convention) rather than a bare integer, so it survives across
/// generations for telemetry.
#[derive(Debug, Clone)]
pub struct Population {
    pub id: String,
    genomes: Vec<Genome>,
}

impl Population {
    pub fn new(id: String, founder: Genome) -> Self {
        Population {
            id,
            genomes: vec![founder],
        }
    }

    pub fn empty(id: String) -> Self {
        Population {
            id,
            genomes: Vec::new(),
        }
    }

    pub fn genomes(&self) -> &[Genome] {
        &self.genomes
    }

    pub fn genomes_mut(&mut self) -> &mut [Genome] {
        &mut self.genomes
    }

    pub fn len(&self) -> usize {
        self.genomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.genomes.is_empty()
    }

    pub fn push(&mut self, genome: Genome) {
        self.genomes.push(genome);
    }

    /// Ascending by fitness; the last element after sorting is the best.
    pub fn sort_by_fitness(&mut self) {
        self.genomes
            .sort_by(|a, b| a.fitness.partial_cmp(&b.fitness).expect("NaN fitness"));
    }

    pub fn best(&self) -> Option<&Genome> {
        self.genomes
            .iter()
            .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).expect("NaN fitness"))
    }

    /// A population accepts `genome` if it is empty, or a randomly chosen
    /// existing member is same-species under `registry`'s delta threshold.
    pub fn accepts(&self, genome: &Genome, registry: &InnovationRegistry, rng: &mut impl Rng) -> bool {
        if self.genomes.is_empty() {
            return true;
        }
        match self.genomes.iter().choose(rng) {
            Some(representative) => {
                representative.distance(genome, registry) <= registry.coefficients.delta_threshold()
            }
            None => true,
        }
    }

    /// Shared-fitness distribution for this population: the sum, over every
    /// member, of its non-negative fitness raised to `beta`, divided by the
    /// count of its same-species peers (at least 1).
    pub fn shared_fitness_distribution(&self, beta: f32) -> f64 {
        let n = self.genomes.len();
        self.genomes
            .iter()
            .map(|g| {
                let peers = (n.saturating_sub(1)).max(1) as f64;
                g.fitness.max(0.0).powf(beta as f64) / peers
            })
            .sum()
    }

    /// Removes the worst members, sorting ascending by fitness and keeping
    /// the top `ceil(count * (1 - remove_worst))`. When exactly 2 members
    /// remain and `remove_worst > 0.0`, the worst one is dropped regardless
    /// of the ceiling computation landing on "keep both".
    pub fn remove_worst(&mut self, remove_worst: f32) {
        self.sort_by_fitness();
        let count = self.genomes.len();
        if count == 2 && remove_worst > 0.0 {
            self.genomes.remove(0);
            return;
        }
        let keep = (count as f32 * (1.0 - remove_worst)).ceil() as usize;
        let keep = keep.clamp(0, count);
        let drop = count - keep;
        self.genomes.drain(0..drop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MutationParams, SpeciationCoefficients};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn registry() -> InnovationRegistry {
        InnovationRegistry::new(SpeciationCoefficients::default(), MutationParams::default())
    }

    fn genome_with_fitness(fitness: f64) -> Genome {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        let mut g = Genome::primitive(3, 1, &mut reg, &mut rng, 0);
        g.fitness = fitness;
        g
    }

    #[test]
    fn empty_population_accepts_anything() {
        let pop = Population::empty("abc123".into());
        let reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(pop.accepts(&genome_with_fitness(0.0), &reg, &mut rng));
    }

    #[test]
    fn remove_worst_keeps_ceiling_fraction() {
        let mut pop = Population::empty("x".into());
        for i in 0..4 {
            pop.push(genome_with_fitness(i as f64));
        }
        pop.remove_worst(0.5);
        assert_eq!(pop.len(), 2);
        assert_eq!(pop.genomes()[0].fitness, 2.0);
        assert_eq!(pop.genomes()[1].fitness, 3.0);
    }

    #[test]
    fn remove_worst_drops_one_of_exactly_two() {
        let mut pop = Population::empty("x".into());
        pop.push(genome_with_fitness(1.0));
        pop.push(genome_with_fitness(2.0));
        pop.remove_worst(0.1);
        assert_eq!(pop.len(), 1);
        assert_eq!(pop.genomes()[0].fitness, 2.0);
    }
}
