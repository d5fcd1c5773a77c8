//! Evolves a network against XOR without going through the threaded
//! `Runner`, driving `Species` and `Evaluator` directly generation by
//! generation.

use augtop::{Evaluator, Genome, InnovationRegistry, LsesParams, MutationParams, Species};
use rand::rngs::StdRng;
use rand::SeedableRng;

const CASES: [([f32; 2], f32); 4] = [
    ([1.0, 0.0], 1.0),
    ([1.0, 1.0], 0.0),
    ([0.0, 0.0], 0.0),
    ([0.0, 1.0], 1.0),
];

fn evaluate(genome: &Genome) -> f64 {
    let mut network = Evaluator::build(genome);
    let mut error = 0.0f32;
    for (inputs, expected) in CASES {
        let output = network.fire(&[inputs[0], inputs[1], 1.0]);
        error += (output[0] - expected).powi(2);
    }
    (4.0 - error) as f64
}

fn main() {
    env_logger::init();

    let lses = LsesParams {
        population_size: 150,
        number_of_input_perceptrons: 3,
        number_of_output_perceptrons: 1,
        ..LsesParams::default()
    };
    let mut registry = InnovationRegistry::new(Default::default(), MutationParams::default());
    registry.prime(lses.number_of_input_perceptrons, lses.number_of_output_perceptrons);
    let mut rng = StdRng::seed_from_u64(0);

    let mut species = Species::new();
    for i in 0..lses.population_size as u64 {
        let genome = Genome::primitive(
            lses.number_of_input_perceptrons,
            lses.number_of_output_perceptrons,
            &mut registry,
            &mut rng,
            i,
        );
        species.add_or_create(genome, &registry, &mut rng);
    }

    for generation in 0..35 {
        for population in species.populations_mut() {
            for genome in population.genomes_mut() {
                genome.fitness = evaluate(genome);
            }
        }
        let (ids, counts) = species.species_info();
        log::info!("generation {generation}: {} populations {:?}/{:?}", ids.len(), ids, counts);
        species.generate_new_generation(&lses, &mut registry, &mut rng);
    }

    let champion = species
        .populations()
        .iter()
        .filter_map(|p| p.best())
        .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).unwrap());

    if let Some(genome) = champion {
        println!("champion fitness: {:.4}", genome.fitness);
        let mut network = Evaluator::build(genome);
        for (inputs, expected) in CASES {
            let output = network.fire(&[inputs[0], inputs[1], 1.0]);
            println!("{:?} -> {:.4} (expected {})", inputs, output[0], expected);
        }
    }
}
