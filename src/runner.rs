//! The generation runner: timed evaluation, per-agent lifecycle, and
//! reproduction into the next generation.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::LsesParams;
use crate::evaluator::Evaluator;
use crate::genome::Genome;
use crate::registry::InnovationRegistry;
use crate::species::Species;

/// Where a network lives, so its fitness can be written back after
/// evaluation: which population and which slot within it.
#[derive(Debug, Clone, Copy)]
pub struct Origin {
    pub population_idx: usize,
    pub genome_idx: usize,
}

/// Read-only handle an agent can use to query how long the current
/// generation's evaluation window has been running. A capability passed at
/// evaluation time rather than a back-reference from the network to the
/// runner.
#[derive(Clone)]
pub struct ElapsedClock {
    started_at: Instant,
}

impl ElapsedClock {
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Implemented by the simulation host. `activate` is called once per agent
/// at generation start; the agent is then driven by the host's own loop and
/// may call back into its [`FinishHandle`] at any time, from any thread —
/// including synchronously, before `activate` itself returns.
pub trait Agent: Send {
    fn activate(
        &mut self,
        specie_id: &str,
        finisher: FinishHandle,
        agent_id: u64,
        network: Evaluator,
        elapsed: ElapsedClock,
    );

    /// Called once, either by the agent's own voluntary finish or by the
    /// runner's timeout sweep — never both.
    fn calculate_fitness(&mut self) -> f64;

    fn on_finished(&mut self);
}

/// Implemented by the simulation host to bracket each generation and spawn
/// agents.
pub trait Environment: Send {
    fn before_generation(&mut self);
    fn create_agent(&mut self, specie_id: &str, spawn_index: usize) -> Box<dyn Agent>;
    fn after_generation(&mut self);
    fn on_generation_complete(&mut self);
}

/// Bookkeeping and the live agent objects shared between the thread driving
/// `run_one_generation`, the one-shot timeout thread, and any thread a host
/// uses to call [`FinishHandle::finish`] asynchronously.
///
/// An agent's `Box<dyn Agent>` is never reachable from two places at once:
/// while `activate` is running, the calling thread owns it outright (not
/// stored here), so a *synchronous* finish request — the agent calling back
/// into its own `FinishHandle` before `activate` returns — can only be
/// recorded (`sync_requests`), never acted on immediately; the thread
/// running `activate` checks that flag the moment it gets `&mut Agent` back
/// and finalizes then. Once `activate` returns without a pending request,
/// the agent is moved into `parked`, where a later asynchronous finish or
/// the timeout sweep can take sole ownership of it to finalize.
struct Shared {
    pending: Mutex<HashMap<u64, Origin>>,
    parked: Mutex<HashMap<u64, Box<dyn Agent>>>,
    sync_requests: Mutex<HashSet<u64>>,
    finished: Mutex<HashMap<u64, (Origin, f64)>>,
    condvar: Condvar,
}

impl Shared {
    fn register(&self, agent_id: u64, origin: Origin) {
        self.pending
            .lock()
            .expect("runner lock poisoned")
            .insert(agent_id, origin);
    }

    fn park(&self, agent_id: u64, agent: Box<dyn Agent>) {
        self.parked
            .lock()
            .expect("runner lock poisoned")
            .insert(agent_id, agent);
    }

    /// Consumes a synchronous finish request recorded while `agent_id`'s
    /// `activate` call was still on the stack, if one arrived.
    fn take_sync_request(&self, agent_id: u64) -> bool {
        self.sync_requests
            .lock()
            .expect("runner lock poisoned")
            .remove(&agent_id)
    }

    /// Entry point for [`FinishHandle::finish`]. If the agent is already
    /// parked (it finished `activate` and is being driven/finished from
    /// another thread), finalizes it immediately; otherwise the caller is
    /// racing (or nested inside) the still-running `activate` call, so the
    /// request is only recorded — the thread running `activate` finalizes
    /// it as soon as it regains ownership of the agent.
    fn request_finish(&self, agent_id: u64) {
        let parked_agent = self
            .parked
            .lock()
            .expect("runner lock poisoned")
            .remove(&agent_id);
        match parked_agent {
            Some(agent) => self.finalize(agent_id, agent),
            None => {
                self.sync_requests
                    .lock()
                    .expect("runner lock poisoned")
                    .insert(agent_id);
            }
        }
    }

    /// Finalizes `agent_id` using the caller's owned agent: computes its
    /// fitness, calls its finish hook, and records the result. A no-op if
    /// `agent_id` was already finalized through another path. Panics inside
    /// `calculate_fitness`/`on_finished` are caught so one broken agent
    /// cannot wedge the generation; its fitness defaults to 0.0.
    fn finalize(&self, agent_id: u64, mut agent: Box<dyn Agent>) {
        let origin = {
            let mut pending = self.pending.lock().expect("runner lock poisoned");
            match pending.remove(&agent_id) {
                Some(origin) => origin,
                None => return,
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            let fitness = agent.calculate_fitness();
            agent.on_finished();
            fitness
        }));
        let fitness = match result {
            Ok(fitness) => fitness,
            Err(_) => {
                log::warn!(
                    "agent {agent_id} (origin {origin:?}) panicked during calculate_fitness/on_finished, defaulting fitness to 0.0"
                );
                0.0
            }
        };

        self.record(agent_id, origin, fitness);
    }

    /// Finalizes `agent_id` with a fixed fitness, without touching the
    /// agent at all. Used when the agent itself panicked during `activate`
    /// and cannot be trusted to run any further method on.
    fn finalize_default(&self, agent_id: u64, fitness: f64) {
        let origin = {
            let mut pending = self.pending.lock().expect("runner lock poisoned");
            match pending.remove(&agent_id) {
                Some(origin) => origin,
                None => return,
            }
        };
        self.record(agent_id, origin, fitness);
    }

    fn record(&self, agent_id: u64, origin: Origin, fitness: f64) {
        self.finished
            .lock()
            .expect("runner lock poisoned")
            .insert(agent_id, (origin, fitness));
        if self.pending.lock().expect("runner lock poisoned").is_empty() {
            self.condvar.notify_all();
        }
    }
}

/// Thread-safe handle agents use to voluntarily report completion. Cheap to
/// clone; every clone shares the same underlying bookkeeping.
#[derive(Clone)]
pub struct FinishHandle {
    shared: Arc<Shared>,
}

impl FinishHandle {
    pub fn finish(&self, agent_id: u64) {
        self.shared.request_finish(agent_id);
    }
}

/// Produces the genome population for a fresh run, either primitive
/// networks or networks reconstructed from persisted packets. Closing over
/// its own dependencies keeps initialization strategy a matter of which
/// closure is supplied, rather than a family of runner subclasses.
pub type InitialNetworkFactory =
    Box<dyn FnMut(&mut InnovationRegistry, &mut StdRng, u64) -> Genome + Send>;

pub struct Runner {
    species: Species,
    registry: InnovationRegistry,
    lses: LsesParams,
    environment: Box<dyn Environment>,
    factory: InitialNetworkFactory,
    rng: StdRng,
    generation_number: usize,
    generations_remaining: usize,
    best: Option<Genome>,
    next_agent_id: u64,
}

impl Runner {
    pub fn new(
        lses: LsesParams,
        registry: InnovationRegistry,
        environment: Box<dyn Environment>,
        factory: InitialNetworkFactory,
        seed: u64,
    ) -> Self {
        Runner {
            species: Species::new(),
            registry,
            lses,
            environment,
            factory,
            rng: StdRng::seed_from_u64(seed),
            generation_number: 0,
            generations_remaining: 0,
            best: None,
            next_agent_id: 0,
        }
    }

    pub fn generation_number(&self) -> usize {
        self.generation_number
    }

    pub fn generations_remaining(&self) -> usize {
        self.generations_remaining
    }

    pub fn best_network(&self) -> Option<&Genome> {
        self.best.as_ref()
    }

    pub fn species_info(&self) -> (Vec<String>, Vec<usize>) {
        self.species.species_info()
    }

    /// Rebuilds the species from scratch: `population_size` initial
    /// networks from `factory`, each assigned to the closest matching
    /// species or a new one.
    pub fn reset(&mut self) {
        self.generation_number = 0;
        self.species = Species::new();
        for i in 0..self.lses.population_size {
            let genome = (self.factory)(&mut self.registry, &mut self.rng, i as u64);
            self.species.add_or_create(genome, &self.registry, &mut self.rng);
        }
    }

    /// Starts a run of `n` generations. Returns `false` without doing
    /// anything if a run is already in progress.
    pub fn action_generation(&mut self, n: usize) -> bool {
        if self.generations_remaining > 0 {
            return false;
        }
        self.generations_remaining = n;
        self.run_one_generation();
        true
    }

    fn run_one_generation(&mut self) {
        self.environment.before_generation();

        let mut origins: Vec<(usize, Origin)> = Vec::new();
        for (pop_idx, population) in self.species.populations().iter().enumerate() {
            for genome_idx in 0..population.len() {
                origins.push((
                    pop_idx,
                    Origin {
                        population_idx: pop_idx,
                        genome_idx,
                    },
                ));
            }
        }
        shuffle(&mut origins, &mut self.rng);

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            parked: Mutex::new(HashMap::new()),
            sync_requests: Mutex::new(HashSet::new()),
            finished: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
        });

        let started_at = Instant::now();
        let clock = ElapsedClock { started_at };

        for (pop_idx, origin) in origins {
            let population = &self.species.populations()[pop_idx];
            let specie_id = population.id.clone();
            let genome = &population.genomes()[origin.genome_idx];
            let network = Evaluator::build(genome);

            let agent_id = self.next_agent_id;
            self.next_agent_id += 1;

            // Register before calling `activate`, so a voluntary finish
            // the agent issues from inside that very call is never lost.
            shared.register(agent_id, origin);

            let mut agent = self.environment.create_agent(&specie_id, origin.genome_idx);
            let finisher = FinishHandle {
                shared: Arc::clone(&shared),
            };

            let activated = catch_unwind(AssertUnwindSafe(|| {
                agent.activate(&specie_id, finisher, agent_id, network, clock.clone());
            }));

            match activated {
                Ok(()) => {
                    if shared.take_sync_request(agent_id) {
                        shared.finalize(agent_id, agent);
                    } else {
                        shared.park(agent_id, agent);
                    }
                }
                Err(_) => {
                    log::warn!(
                        "agent {agent_id} (origin {origin:?}) panicked during activate, defaulting fitness to 0.0"
                    );
                    shared.finalize_default(agent_id, 0.0);
                }
            }
        }

        self.environment.after_generation();

        let timeout_shared = Arc::clone(&shared);
        let test_time = self.lses.generation_test_time;
        thread::spawn(move || {
            thread::sleep(test_time);
            let still_pending: Vec<u64> = timeout_shared
                .pending
                .lock()
                .expect("runner lock poisoned")
                .keys()
                .copied()
                .collect();
            for agent_id in still_pending {
                let parked_agent = timeout_shared
                    .parked
                    .lock()
                    .expect("runner lock poisoned")
                    .remove(&agent_id);
                match parked_agent {
                    Some(agent) => timeout_shared.finalize(agent_id, agent),
                    None => {
                        // Still mid-`activate` (or never parked) when the
                        // timer fired; there is no safe way to reach into
                        // it, so it is treated the same as any other
                        // timed-out agent.
                        timeout_shared.finalize_default(agent_id, 0.0);
                    }
                }
            }
        });

        let pending_guard = shared.pending.lock().expect("runner lock poisoned");
        let _done = shared
            .condvar
            .wait_while(pending_guard, |pending| !pending.is_empty())
            .expect("runner lock poisoned");
        drop(_done);

        self.apply_results(&shared);
        self.finish_generation();
    }

    fn apply_results(&mut self, shared: &Shared) {
        let finished = shared.finished.lock().expect("runner lock poisoned");
        for (origin, fitness) in finished.values() {
            if let Some(population) = self.species.populations_mut().get_mut(origin.population_idx) {
                if let Some(genome) = population.genomes_mut().get_mut(origin.genome_idx) {
                    genome.fitness = *fitness;
                }
            } else {
                log::error!(
                    "dropped fitness report for stale origin {:?}: population no longer exists",
                    origin
                );
            }
        }
    }

    fn finish_generation(&mut self) {
        let overall_best = self
            .species
            .populations()
            .iter()
            .filter_map(|p| p.best())
            .max_by(|a, b| a.fitness.partial_cmp(&b.fitness).expect("NaN fitness"))
            .cloned();
        if let Some(candidate) = overall_best {
            let improved = match &self.best {
                Some(current) => candidate.fitness > current.fitness,
                None => true,
            };
            if improved {
                self.best = Some(candidate);
            }
        }

        if self.generations_remaining > 0 {
            self.generation_number += 1;
            self.species
                .generate_new_generation(&self.lses, &mut self.registry, &mut self.rng);
            self.generations_remaining -= 1;
            log::info!(
                "generation {} complete, best fitness so far {:?}",
                self.generation_number,
                self.best.as_ref().map(|g| g.fitness)
            );
        }

        self.environment.on_generation_complete();

        if self.generations_remaining > 0 {
            self.run_one_generation();
        }
    }
}

fn shuffle<T>(items: &mut [T], rng: &mut impl Rng) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MutationParams, SpeciationCoefficients};
    use crate::genome::Genome;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAgent {
        finisher: Option<FinishHandle>,
        id: u64,
    }

    impl Agent for CountingAgent {
        fn activate(
            &mut self,
            _specie_id: &str,
            finisher: FinishHandle,
            agent_id: u64,
            _network: Evaluator,
            _elapsed: ElapsedClock,
        ) {
            self.id = agent_id;
            // Finish immediately so the test does not depend on the timeout.
            finisher.finish(agent_id);
            self.finisher = Some(finisher);
        }

        fn calculate_fitness(&mut self) -> f64 {
            1.0
        }

        fn on_finished(&mut self) {}
    }

    struct PanickingAgent;

    impl Agent for PanickingAgent {
        fn activate(
            &mut self,
            _specie_id: &str,
            _finisher: FinishHandle,
            _agent_id: u64,
            _network: Evaluator,
            _elapsed: ElapsedClock,
        ) {
            panic!("simulated host failure during activate");
        }

        fn calculate_fitness(&mut self) -> f64 {
            1.0
        }

        fn on_finished(&mut self) {}
    }

    struct CountingEnvironment {
        created: Arc<AtomicUsize>,
    }

    impl Environment for CountingEnvironment {
        fn before_generation(&mut self) {}
        fn create_agent(&mut self, _specie_id: &str, _spawn_index: usize) -> Box<dyn Agent> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Box::new(CountingAgent {
                finisher: None,
                id: 0,
            })
        }
        fn after_generation(&mut self) {}
        fn on_generation_complete(&mut self) {}
    }

    struct PanickingEnvironment;

    impl Environment for PanickingEnvironment {
        fn before_generation(&mut self) {}
        fn create_agent(&mut self, _specie_id: &str, _spawn_index: usize) -> Box<dyn Agent> {
            Box::new(PanickingAgent)
        }
        fn after_generation(&mut self) {}
        fn on_generation_complete(&mut self) {}
    }

    #[test]
    fn one_generation_assigns_fitness_and_advances() {
        let registry =
            InnovationRegistry::new(SpeciationCoefficients::default(), MutationParams::default());
        let lses = LsesParams {
            population_size: 8,
            generation_test_time: Duration::from_millis(200),
            number_of_input_perceptrons: 3,
            number_of_output_perceptrons: 1,
            ..LsesParams::default()
        };
        let created = Arc::new(AtomicUsize::new(0));
        let environment = Box::new(CountingEnvironment {
            created: Arc::clone(&created),
        });
        let factory: InitialNetworkFactory = Box::new(|registry, rng, id| {
            Genome::primitive(3, 1, registry, rng, id)
        });

        let mut runner = Runner::new(lses, registry, environment, factory, 1);
        runner.reset();
        assert!(runner.action_generation(1));
        assert_eq!(created.load(Ordering::SeqCst), 8);
        assert_eq!(runner.generation_number(), 1);
        assert!(runner.best_network().is_some());
        assert_eq!(runner.best_network().unwrap().fitness, 1.0);
    }

    #[test]
    fn action_generation_rejects_concurrent_run() {
        let registry =
            InnovationRegistry::new(SpeciationCoefficients::default(), MutationParams::default());
        let lses = LsesParams {
            population_size: 4,
            generation_test_time: Duration::from_secs(30),
            ..LsesParams::default()
        };
        let environment = Box::new(CountingEnvironment {
            created: Arc::new(AtomicUsize::new(0)),
        });
        let factory: InitialNetworkFactory =
            Box::new(|registry, rng, id| Genome::primitive(3, 1, registry, rng, id));
        let mut runner = Runner::new(lses, registry, environment, factory, 1);
        runner.reset();
        // Manually mark a run as already in progress without waiting on the
        // real timeout thread.
        runner.generations_remaining = 1;
        assert!(!runner.action_generation(1));
    }

    #[test]
    fn panicking_agent_defaults_to_zero_fitness_and_generation_still_completes() {
        let registry =
            InnovationRegistry::new(SpeciationCoefficients::default(), MutationParams::default());
        let lses = LsesParams {
            population_size: 4,
            generation_test_time: Duration::from_millis(200),
            number_of_input_perceptrons: 3,
            number_of_output_perceptrons: 1,
            ..LsesParams::default()
        };
        let environment = Box::new(PanickingEnvironment);
        let factory: InitialNetworkFactory =
            Box::new(|registry, rng, id| Genome::primitive(3, 1, registry, rng, id));

        let mut runner = Runner::new(lses, registry, environment, factory, 1);
        runner.reset();
        assert!(runner.action_generation(1));
        assert_eq!(runner.generation_number(), 1);
        // Every agent panicked during `activate`, so the best fitness
        // collected for the generation is the defaulted 0.0, not a panic
        // propagated out of `run_one_generation`.
        assert_eq!(runner.best_network().unwrap().fitness, 0.0);
    }
}
