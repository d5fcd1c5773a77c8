//! Innovation-aligned distance and crossover.

use std::collections::BTreeMap;

use rand::Rng;

use crate::config::{Comparison, MutationParams, SpeciationCoefficients};
use crate::gene::ConnectionGene;
use crate::genome::Genome;

#[derive(Default, Clone, Copy)]
struct Slot {
    a: Option<ConnectionGene>,
    b: Option<ConnectionGene>,
}

/// Keyed by innovation number; each entry carries the gene from parent A
/// and/or parent B at that innovation. `BTreeMap` keeps entries ordered by
/// innovation, which both the distance formula (descending) and crossover
/// (ascending) need.
fn align(a: &Genome, b: &Genome) -> BTreeMap<usize, Slot> {
    let mut table: BTreeMap<usize, Slot> = BTreeMap::new();
    for gene in a.genes() {
        table.entry(gene.innovation).or_default().a = Some(*gene);
    }
    for gene in b.genes() {
        table.entry(gene.innovation).or_default().b = Some(*gene);
    }
    table
}

/// Compatibility distance between two genomes under `coeffs`.
pub fn compute(a: &Genome, b: &Genome, coeffs: &SpeciationCoefficients) -> f64 {
    let table = align(a, b);
    if table.is_empty() {
        return 0.0;
    }

    let mut excess = 0usize;
    let mut disjoint = 0usize;
    let mut equal_count = 0usize;
    let mut weight_diff_sum = 0.0f64;

    // Determine which parent "owns" the trailing excess run from the
    // highest-innovation entry.
    let mut excess_owner: Option<bool> = None; // true = parent A, false = parent B
    let mut counting_excess = true;

    for (_, slot) in table.iter().rev() {
        match (slot.a, slot.b) {
            (Some(ga), Some(gb)) => {
                equal_count += 1;
                weight_diff_sum += (ga.weight - gb.weight).abs() as f64;
                counting_excess = false;
            }
            (Some(_), None) => {
                if counting_excess && excess_owner.unwrap_or(true) {
                    excess_owner = Some(true);
                    excess += 1;
                } else {
                    counting_excess = false;
                    disjoint += 1;
                }
            }
            (None, Some(_)) => {
                if counting_excess && !excess_owner.unwrap_or(false) {
                    excess_owner = Some(false);
                    excess += 1;
                } else {
                    counting_excess = false;
                    disjoint += 1;
                }
            }
            (None, None) => unreachable!("alignment slot with no gene from either parent"),
        }
    }

    let n = a.gene_count().max(b.gene_count()).max(1) as f64;
    let avg_weight_diff = if equal_count > 0 {
        weight_diff_sum / equal_count as f64
    } else {
        0.0
    };

    coeffs.c_avg_weight * avg_weight_diff
        + coeffs.c_disjoint * (disjoint as f64) / n
        + coeffs.c_excess * (excess as f64) / n
}

fn classify_both(a: ConnectionGene, b: ConnectionGene) -> Comparison {
    match (a.active, b.active) {
        (true, true) => Comparison::BothActive,
        (false, false) => Comparison::BothInactive,
        _ => Comparison::Inversed,
    }
}

/// Innovation-aligned crossover producing one offspring.
pub fn crossover(a: &Genome, b: &Genome, mutation: &MutationParams, rng: &mut impl Rng) -> Genome {
    assert_eq!(a.num_inputs(), b.num_inputs(), "crossover parents must share input count");
    assert_eq!(a.num_outputs(), b.num_outputs(), "crossover parents must share output count");

    let table = align(a, b);
    let mut child_genes: Vec<ConnectionGene> = Vec::with_capacity(table.len());

    for (_, slot) in table.iter() {
        let (mut chosen, comparison) = match (slot.a, slot.b) {
            (Some(ga), Some(gb)) => {
                let comparison = classify_both(ga, gb);
                let chosen = if rng.random_bool(0.5) { ga } else { gb };
                (chosen, comparison)
            }
            (Some(ga), None) => {
                if a.fitness >= b.fitness {
                    (ga, dominant_comparison(ga))
                } else {
                    continue;
                }
            }
            (None, Some(gb)) => {
                if b.fitness > a.fitness {
                    (gb, dominant_comparison(gb))
                } else {
                    continue;
                }
            }
            (None, None) => unreachable!("alignment slot with no gene from either parent"),
        };

        let chance = mutation.chance_for(comparison);
        if rng.random::<f64>() < chance {
            match comparison {
                Comparison::BothInactive => chosen.active = false,
                Comparison::Inversed => chosen.active = true,
                Comparison::BothActive | Comparison::DominantActive | Comparison::DominantInactive => {
                    chosen.active = !chosen.active
                }
            }
        }
        child_genes.push(chosen);
    }

    child_genes.sort_by_key(|g| g.innovation);

    let nodes = if a.nodes().len() >= b.nodes().len() {
        a.nodes().to_vec()
    } else {
        b.nodes().to_vec()
    };

    Genome {
        num_inputs: a.num_inputs(),
        num_outputs: a.num_outputs(),
        nodes,
        genes: child_genes,
        fitness: 0.0,
        id: rng.random::<u64>(),
    }
}

fn dominant_comparison(gene: ConnectionGene) -> Comparison {
    if gene.active {
        Comparison::DominantActive
    } else {
        Comparison::DominantInactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MutationParams;
    use crate::registry::InnovationRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn registry() -> InnovationRegistry {
        InnovationRegistry::new(SpeciationCoefficients::default(), MutationParams::default())
    }

    #[test]
    fn distance_to_self_is_zero() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        let g = Genome::primitive(3, 2, &mut reg, &mut rng, 0);
        assert_eq!(compute(&g, &g, &reg.coefficients), 0.0);
    }

    #[test]
    fn distance_is_symmetric() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        let a = Genome::primitive(3, 2, &mut reg, &mut rng, 0);
        let mut b = a.clone();
        b.genes[0].weight += 5.0;
        let d_ab = compute(&a, &b, &reg.coefficients);
        let d_ba = compute(&b, &a, &reg.coefficients);
        assert!((d_ab - d_ba).abs() < 1e-9);
    }

    #[test]
    fn equal_size_matched_tail_has_no_excess_all_disjoint() {
        // Both genomes have the same gene count and share the
        // highest-innovation entry; the single-parent entries below it
        // should all classify as disjoint, never excess.
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(9);
        let base = Genome::primitive(2, 1, &mut reg, &mut rng, 0);

        let mut a = base.clone();
        a.genes.push(ConnectionGene::new(2, 0, 2, 0.2));
        a.genes.push(ConnectionGene::new(5, 2, 2, 0.1));
        a.genes.sort_by_key(|g| g.innovation);

        let mut b = base.clone();
        b.genes.push(ConnectionGene::new(3, 1, 2, 0.3));
        b.genes.push(ConnectionGene::new(5, 2, 2, 0.1));
        b.genes.sort_by_key(|g| g.innovation);

        assert_eq!(a.gene_count(), b.gene_count());

        // Reconstruct the excess/disjoint split the way `compute` does, to
        // assert on counts directly rather than just the final scalar.
        let table = align(&a, &b);
        let mut excess = 0usize;
        let mut disjoint = 0usize;
        let mut counting_excess = true;
        for (_, slot) in table.iter().rev() {
            match (slot.a, slot.b) {
                (Some(_), Some(_)) => counting_excess = false,
                (Some(_), None) | (None, Some(_)) => {
                    if counting_excess {
                        excess += 1;
                    } else {
                        disjoint += 1;
                    }
                }
                (None, None) => unreachable!(),
            }
        }
        assert_eq!(excess, 0);
        assert_eq!(disjoint, 2);
    }

    #[test]
    fn identical_parents_crossover_preserves_gene_set() {
        let mut reg = registry();
        reg.mutation.parent_gene_cross_chance_default = 0.0;
        let mut rng = StdRng::seed_from_u64(3);
        let a = Genome::primitive(3, 2, &mut reg, &mut rng, 0);
        let b = a.clone();
        let child = crossover(&a, &b, &reg.mutation, &mut rng);
        assert_eq!(child.gene_count(), a.gene_count());
        for (c, orig) in child.genes().iter().zip(a.genes().iter()) {
            assert_eq!(c.innovation, orig.innovation);
            assert_eq!(c.active, orig.active);
        }
    }

    #[test]
    fn crossover_child_genes_are_subset_of_parent_innovations() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(11);
        let mut a = Genome::primitive(3, 1, &mut reg, &mut rng, 0);
        let mut b = Genome::primitive(3, 1, &mut reg, &mut rng, 1);
        for _ in 0..5 {
            a.mutate(&mut reg, &mut rng);
            b.mutate(&mut reg, &mut rng);
        }
        a.fitness = 2.0;
        b.fitness = 1.0;
        let child = crossover(&a, &b, &reg.mutation, &mut rng);
        assert!(child.gene_count() <= a.gene_count().max(b.gene_count()));
        let parent_innovations: std::collections::HashSet<usize> = a
            .genes()
            .iter()
            .chain(b.genes().iter())
            .map(|g| g.innovation)
            .collect();
        for g in child.genes() {
            assert!(parent_innovations.contains(&g.innovation));
        }
    }
}
