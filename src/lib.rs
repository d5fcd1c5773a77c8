//! A NEAT-style (NeuroEvolution of Augmenting Topologies) evolutionary
//! optimizer core: genomes that grow new connections and nodes over
//! generations, speciated by topological distance, reproduced under a
//! shared-fitness quota, and evaluated as compiled feed-forward networks.
//!
//! The crate is organized so genomes never hold a reference back to the
//! [`InnovationRegistry`] that mints their innovation numbers — it is always
//! threaded explicitly through the calls that need it.

mod config;
mod distance;
mod error;
mod evaluator;
mod gene;
mod genome;
mod node;
mod packet;
mod population;
mod registry;
mod runner;
mod species;

pub use config::{Comparison, LsesParams, MutationParams, SelectionMode, SpeciationCoefficients};
pub use error::{NeatError, Result};
pub use evaluator::Evaluator;
pub use gene::{ConnectionGene, GeneMutateFlag};
pub use genome::Genome;
pub use node::{Node, NodeKind};
pub use packet::{
    decode_consultor_string, decode_gene_string, encode_consultor_string, encode_gene_string,
    from_packet, load_from_file, save_to_file, to_packet, Packet,
};
pub use population::Population;
pub use registry::InnovationRegistry;
pub use runner::{Agent, ElapsedClock, Environment, FinishHandle, InitialNetworkFactory, Origin, Runner};
pub use species::Species;
