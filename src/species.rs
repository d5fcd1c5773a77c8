//! The species manager: speciation, fitness sharing, reproductive quota
//! allocation, and next-generation assembly across every [`Population`].

use rand::Rng;

use crate::config::{LsesParams, SelectionMode};
use crate::genome::Genome;
use crate::population::Population;
use crate::registry::InnovationRegistry;

/// An ordered list of [`Population`] clusters plus a PRNG-backed id
/// generator for newly formed populations.
#[derive(Debug, Default)]
pub struct Species {
    populations: Vec<Population>,
}

impl Species {
    pub fn new() -> Self {
        Species {
            populations: Vec::new(),
        }
    }

    pub fn populations(&self) -> &[Population] {
        &self.populations
    }

    pub fn populations_mut(&mut self) -> &mut [Population] {
        &mut self.populations
    }

    pub fn total_size(&self) -> usize {
        self.populations.iter().map(Population::len).sum()
    }

    pub fn species_info(&self) -> (Vec<String>, Vec<usize>) {
        let ids = self.populations.iter().map(|p| p.id.clone()).collect();
        let counts = self.populations.iter().map(Population::len).collect();
        (ids, counts)
    }

    fn random_hex_id(rng: &mut impl Rng) -> String {
        format!("#{:06x}", rng.random::<u32>() & 0x00ff_ffff)
    }

    /// Add-if-match: tries each population in order, joining the
    /// first that accepts the genome. If none accept, the closest existing
    /// population adopts it regardless of threshold; with no populations at
    /// all, a fresh one is created.
    pub fn add_or_create(&mut self, genome: Genome, registry: &InnovationRegistry, rng: &mut impl Rng) {
        for population in &mut self.populations {
            if population.accepts(&genome, registry, rng) {
                population.push(genome);
                return;
            }
        }

        if let Some(closest) = self.closest_population_mut(&genome, registry) {
            closest.push(genome);
            return;
        }

        let id = Self::random_hex_id(rng);
        self.populations.push(Population::new(id, genome));
    }

    fn closest_population_mut(
        &mut self,
        genome: &Genome,
        registry: &InnovationRegistry,
    ) -> Option<&mut Population> {
        let mut best_idx = None;
        let mut best_distance = f64::MAX;
        for (idx, population) in self.populations.iter().enumerate() {
            if let Some(representative) = population.genomes().first() {
                let d = representative.distance(genome, registry);
                if d < best_distance {
                    best_distance = d;
                    best_idx = Some(idx);
                }
            }
        }
        best_idx.map(move |idx| &mut self.populations[idx])
    }

    /// Produces the next generation in place: removes the worst members of
    /// every population, computes reproductive quotas, fills them with elite
    /// copies and crossover offspring, then re-speciates everything.
    pub fn generate_new_generation(
        &mut self,
        lses: &LsesParams,
        registry: &mut InnovationRegistry,
        rng: &mut impl Rng,
    ) {
        for population in &mut self.populations {
            population.remove_worst(lses.remove_worst);
        }
        self.populations.retain(|p| !p.is_empty());

        let distributions: Vec<f64> = self
            .populations
            .iter()
            .map(|p| p.shared_fitness_distribution(lses.beta))
            .collect();
        let total: f64 = distributions.iter().sum();

        let mut quotas: Vec<i64> = if total <= 0.0 {
            vec![0; self.populations.len()]
        } else {
            distributions
                .iter()
                .map(|&d| ((d / total) * lses.population_size as f64).floor() as i64)
                .collect()
        };

        Self::correct_quotas(&mut quotas, lses.population_size, rng);

        let mut offspring: Vec<Genome> = Vec::with_capacity(lses.population_size);
        let eligible: Vec<(&Population, usize)> = self
            .populations
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let q = quotas[i];
                if q > 0 && !p.is_empty() {
                    Some((p, q as usize))
                } else {
                    None
                }
            })
            .collect();

        for (population, quota) in eligible {
            let mut sorted = population.clone();
            sorted.sort_by_fitness();
            for j in 0..quota {
                if (j as f32) <= quota as f32 * lses.elite {
                    if let Some(best) = sorted.best() {
                        offspring.push(best.clone());
                    }
                } else {
                    let child = Self::make_child(&sorted, lses, registry, rng);
                    offspring.push(child);
                }
            }
        }

        self.populations.clear();
        for genome in offspring {
            self.add_or_create(genome, registry, rng);
        }
        log::info!(
            "reproduction complete: {} populations, {} genomes",
            self.populations.len(),
            self.total_size()
        );
    }

    fn make_child(
        population: &Population,
        lses: &LsesParams,
        registry: &mut InnovationRegistry,
        rng: &mut impl Rng,
    ) -> Genome {
        let (a, b) = Self::select_parents(population, lses.selection_mode, rng);
        let mut child = a.crossover(b, &registry.mutation, rng);
        child.mutate(registry, rng);
        child
    }

    fn select_parents<'p>(
        population: &'p Population,
        mode: SelectionMode,
        rng: &mut impl Rng,
    ) -> (&'p Genome, &'p Genome) {
        let genomes = population.genomes();
        match mode {
            SelectionMode::Random => {
                let a = &genomes[rng.random_range(0..genomes.len())];
                let b = &genomes[rng.random_range(0..genomes.len())];
                (a, b)
            }
            SelectionMode::LogarithmicRankedPick => {
                let a = &genomes[rng.random_range(0..genomes.len())];
                let b_idx = logarithmic_ranked_index(genomes.len(), rng);
                (a, &genomes[b_idx])
            }
        }
    }

    /// Corrects floor-rounded quotas so they sum exactly to `target`:
    /// under-fill grows a random index in the upper half of the list
    /// (a known bias toward later-indexed populations); over-fill shrinks
    /// any index that still has quota left.
    fn correct_quotas(quotas: &mut [i64], target: usize, rng: &mut impl Rng) {
        if quotas.is_empty() {
            return;
        }
        let target = target as i64;
        loop {
            let sum: i64 = quotas.iter().sum();
            if sum == target {
                return;
            }
            if sum < target {
                let half = quotas.len() / 2;
                let idx = half + rng.random_range(0..(quotas.len() - half));
                quotas[idx] += 1;
            } else {
                let candidates: Vec<usize> = quotas
                    .iter()
                    .enumerate()
                    .filter(|(_, &q)| q > 0)
                    .map(|(i, _)| i)
                    .collect();
                if candidates.is_empty() {
                    return;
                }
                let idx = candidates[rng.random_range(0..candidates.len())];
                quotas[idx] -= 1;
            }
        }
    }
}

fn logarithmic_ranked_index(len: usize, rng: &mut impl Rng) -> usize {
    if len <= 1 {
        return 0;
    }
    let base = (len - 1) as f64;
    let r = rng.random_range(1..=100) as f64;
    let exponent = base.ln() / 100f64.ln();
    let powed = r.powf(exponent);
    let idx = (base - powed).abs().round() as usize;
    idx.min(len - 1)
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

    fn genome(fitness: f64, id: u64, registry: &mut InnovationRegistry, rng: &mut impl Rng) -> Genome {
        let mut g = Genome::primitive(3, 1, registry, rng, id);
        g.fitness = fitness;
        g
    }

    #[test]
    fn quota_correction_sums_to_target() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut quotas = vec![24, 24, 24, 24];
        Species::correct_quotas(&mut quotas, 100, &mut rng);
        assert_eq!(quotas.iter().sum::<i64>(), 100);
    }

    #[test]
    fn quota_correction_handles_overflow() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut quotas = vec![30, 30, 30, 30];
        Species::correct_quotas(&mut quotas, 100, &mut rng);
        assert_eq!(quotas.iter().sum::<i64>(), 100);
    }

    #[test]
    fn reproduction_preserves_population_size() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(3);
        let lses = LsesParams {
            population_size: 40,
            ..LsesParams::default()
        };
        let mut species = Species::new();
        for i in 0..lses.population_size as u64 {
            let mut g = genome(0.0, i, &mut reg, &mut rng);
            g.fitness = (i % 5) as f64;
            species.add_or_create(g, &reg, &mut rng);
        }
        species.generate_new_generation(&lses, &mut reg, &mut rng);
        assert_eq!(species.total_size(), lses.population_size);
    }

    #[test]
    fn logarithmic_index_stays_in_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        for len in [1, 2, 3, 10, 100] {
            for _ in 0..20 {
                let idx = logarithmic_ranked_index(len, &mut rng);
                assert!(idx < len.max(1));
            }
        }
    }
}
