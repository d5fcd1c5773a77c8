//! The logical persisted packet and its textual gene encoding.
//!
//! The simulation host owns the actual file format; this module only
//! guarantees the logical packet contract and one concrete, testable
//! encoding built on the same `serde`/`bincode` stack the rest of the crate
//! uses for structured values.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NeatError, Result};
use crate::gene::ConnectionGene;
use crate::genome::Genome;
use crate::node::{Node, NodeKind};
use crate::registry::InnovationRegistry;

/// Enough to reconstruct one genome and replay the registry state it
/// depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Packet {
    pub fitness: f64,
    pub total_node_count: usize,
    pub input_count: usize,
    pub output_count: usize,
    pub total_gene_count: usize,
    pub consultor_gene_count: usize,
    pub genome: String,
    pub consultor_genome: String,
}

/// Encodes genes as `in_out_weight_active` tuples joined by `_`: a flat
/// token stream, 4 tokens per gene, no nested delimiter.
pub fn encode_gene_string(genes: &[ConnectionGene]) -> String {
    let mut tokens = Vec::with_capacity(genes.len() * 4);
    for gene in genes {
        tokens.push(gene.in_node.to_string());
        tokens.push(gene.out_node.to_string());
        tokens.push(gene.weight.to_string());
        tokens.push(if gene.active { "1".to_string() } else { "0".to_string() });
    }
    tokens.join("_")
}

/// Inverse of [`encode_gene_string`]. Errors if the token count is not a
/// multiple of 4 or any token fails to parse.
pub fn decode_gene_string(s: &str) -> Result<Vec<(usize, usize, f32, bool)>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let tokens: Vec<&str> = s.split('_').collect();
    if tokens.len() % 4 != 0 {
        return Err(NeatError::Packet(format!(
            "gene string token count {} is not a multiple of 4",
            tokens.len()
        )));
    }
    let mut genes = Vec::with_capacity(tokens.len() / 4);
    for chunk in tokens.chunks_exact(4) {
        let in_node: usize = chunk[0]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid in_node token: {}", chunk[0])))?;
        let out_node: usize = chunk[1]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid out_node token: {}", chunk[1])))?;
        let weight: f32 = chunk[2]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid weight token: {}", chunk[2])))?;
        let active = match chunk[3] {
            "1" => true,
            "0" => false,
            other => {
                return Err(NeatError::Packet(format!(
                    "invalid active flag token: {other}"
                )))
            }
        };
        genes.push((in_node, out_node, weight, active));
    }
    Ok(genes)
}

/// Encodes the registry's `(in, out, innovation)` triples joined by `_`, 3
/// tokens per pair, in ascending innovation order.
pub fn encode_consultor_string(registry: &InnovationRegistry) -> String {
    let mut tokens = Vec::new();
    for (in_node, out_node, innovation) in registry.pairs_by_innovation() {
        tokens.push(in_node.to_string());
        tokens.push(out_node.to_string());
        tokens.push(innovation.to_string());
    }
    tokens.join("_")
}

pub fn decode_consultor_string(s: &str) -> Result<Vec<(usize, usize, usize)>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    let tokens: Vec<&str> = s.split('_').collect();
    if tokens.len() % 3 != 0 {
        return Err(NeatError::Packet(format!(
            "consultor string token count {} is not a multiple of 3",
            tokens.len()
        )));
    }
    let mut pairs = Vec::with_capacity(tokens.len() / 3);
    for chunk in tokens.chunks_exact(3) {
        let in_node: usize = chunk[0]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid in_node token: {}", chunk[0])))?;
        let out_node: usize = chunk[1]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid out_node token: {}", chunk[1])))?;
        let innovation: usize = chunk[2]
            .parse()
            .map_err(|_| NeatError::Packet(format!("invalid innovation token: {}", chunk[2])))?;
        pairs.push((in_node, out_node, innovation));
    }
    Ok(pairs)
}

/// Builds the logical packet for `genome`, sourcing the registry snapshot
/// from `registry`.
pub fn to_packet(genome: &Genome, registry: &InnovationRegistry) -> Packet {
    Packet {
        fitness: genome.fitness,
        total_node_count: genome.nodes().len(),
        input_count: genome.num_inputs(),
        output_count: genome.num_outputs(),
        total_gene_count: genome.gene_count(),
        consultor_gene_count: registry.innovation_count(),
        genome: encode_gene_string(genome.genes()),
        consultor_genome: encode_consultor_string(registry),
    }
}

/// Reconstructs a genome from `packet`, priming a fresh registry with the
/// packet's consultor snapshot so that subsequently-created genomes keep
/// consistent innovation numbers.
pub fn from_packet(packet: &Packet, registry: &mut InnovationRegistry, id: u64) -> Result<Genome> {
    if packet.input_count == 0 || packet.output_count == 0 {
        return Err(NeatError::Configuration(
            "packet must declare at least one input and one output".into(),
        ));
    }

    for (in_node, out_node, innovation) in decode_consultor_string(&packet.consultor_genome)? {
        let assigned = registry.acquire(in_node, out_node);
        if assigned != innovation {
            return Err(NeatError::Packet(format!(
                "consultor replay mismatch for ({in_node}, {out_node}): expected {innovation}, got {assigned}"
            )));
        }
    }

    let gene_tuples = decode_gene_string(&packet.genome)?;
    if gene_tuples.len() != packet.total_gene_count {
        return Err(NeatError::Packet(format!(
            "declared gene count {} does not match decoded count {}",
            packet.total_gene_count,
            gene_tuples.len()
        )));
    }

    let mut nodes = Vec::with_capacity(packet.total_node_count);
    for i in 0..packet.input_count {
        let kind = if i == packet.input_count - 1 {
            NodeKind::InputBias
        } else {
            NodeKind::Input
        };
        nodes.push(Node::new(i, kind));
    }
    for o in 0..packet.output_count {
        nodes.push(Node::new(packet.input_count + o, NodeKind::Output));
    }
    let wired = packet.input_count + packet.output_count;
    for h in wired..packet.total_node_count {
        nodes.push(Node::new(h, NodeKind::Hidden));
    }

    let mut genome = Genome::empty(packet.input_count, packet.output_count, nodes, id);
    genome.fitness = packet.fitness;
    for (in_node, out_node, weight, active) in gene_tuples {
        let innovation = registry.acquire(in_node, out_node);
        let mut gene = ConnectionGene::new(innovation, in_node, out_node, weight);
        gene.active = active;
        genome.ordered_insert(gene);
    }

    Ok(genome)
}

/// Writes `packet` to `path` using the same bincode encoding the
/// checkpointing round-trip tests exercise. A missing parent directory or
/// other I/O failure surfaces as [`NeatError::Io`].
pub fn save_to_file(packet: &Packet, path: &Path) -> Result<()> {
    let config = bincode::config::standard();
    let bytes = bincode::serde::encode_to_vec(packet, config)
        .map_err(|e| NeatError::Codec(e.to_string()))?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Inverse of [`save_to_file`]. A missing file surfaces as [`NeatError::Io`];
/// bytes that do not decode as a `Packet` surface as [`NeatError::Codec`].
pub fn load_from_file(path: &Path) -> Result<Packet> {
    let bytes = std::fs::read(path)?;
    let config = bincode::config::standard();
    let (packet, _) = bincode::serde::decode_from_slice(&bytes, config)
        .map_err(|e| NeatError::Codec(e.to_string()))?;
    Ok(packet)
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

    #[test]
    fn gene_string_round_trips() {
        let genes = vec![
            ConnectionGene::new(0, 0, 3, 0.5),
            ConnectionGene::new(1, 1, 3, -0.25),
        ];
        let encoded = encode_gene_string(&genes);
        let decoded = decode_gene_string(&encoded).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0], (0, 3, 0.5, true));
        assert_eq!(decoded[1], (1, 3, -0.25, true));
    }

    #[test]
    fn rejects_token_count_not_divisible_by_four() {
        let err = decode_gene_string("1_2_3").unwrap_err();
        assert!(matches!(err, NeatError::Packet(_)));
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        let err = decode_gene_string("a_2_3_1").unwrap_err();
        assert!(matches!(err, NeatError::Packet(_)));
    }

    #[test]
    fn packet_round_trips_through_fresh_registry_s2() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(1);
        let genome = Genome::primitive(3, 2, &mut reg, &mut rng, 7);
        let packet = to_packet(&genome, &reg);

        let mut fresh = registry();
        let reconstructed = from_packet(&packet, &mut fresh, 7).unwrap();

        assert_eq!(reconstructed.gene_count(), genome.gene_count());
        for (a, b) in genome.genes().iter().zip(reconstructed.genes().iter()) {
            assert_eq!(a.in_node, b.in_node);
            assert_eq!(a.out_node, b.out_node);
            assert_eq!(a.weight, b.weight);
            assert_eq!(a.active, b.active);
            assert_eq!(a.innovation, b.innovation);
        }
    }

    #[test]
    fn json_round_trip_for_human_readable_export() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(3);
        let genome = Genome::primitive(3, 1, &mut reg, &mut rng, 0);
        let packet = to_packet(&genome, &reg);

        let json = serde_json::to_string(&packet).unwrap();
        let decoded: Packet = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.genome, packet.genome);
        assert_eq!(decoded.consultor_genome, packet.consultor_genome);
    }

    #[test]
    fn bincode_round_trip_for_checkpointing() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(2);
        let genome = Genome::primitive(2, 1, &mut reg, &mut rng, 0);
        let packet = to_packet(&genome, &reg);

        let config = bincode::config::standard();
        let bytes = bincode::serde::encode_to_vec(&packet, config).unwrap();
        let (decoded, _): (Packet, usize) =
            bincode::serde::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(decoded.genome, packet.genome);
    }

    #[test]
    fn save_and_load_round_trip_through_disk() {
        let mut reg = registry();
        let mut rng = StdRng::seed_from_u64(4);
        let genome = Genome::primitive(3, 1, &mut reg, &mut rng, 0);
        let packet = to_packet(&genome, &reg);

        let mut path = std::env::temp_dir();
        path.push(format!("augtop-packet-test-{}.bin", genome.id));
        save_to_file(&packet, &path).unwrap();
        let loaded = load_from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(loaded.genome, packet.genome);
        assert_eq!(loaded.consultor_genome, packet.consultor_genome);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let mut path = std::env::temp_dir();
        path.push("augtop-packet-test-does-not-exist.bin");
        let err = load_from_file(&path).unwrap_err();
        assert!(matches!(err, NeatError::Io(_)));
    }

    #[test]
    fn load_corrupt_bytes_is_codec_error() {
        let mut path = std::env::temp_dir();
        path.push("augtop-packet-test-corrupt.bin");
        std::fs::write(&path, b"not a packet").unwrap();
        let err = load_from_file(&path).unwrap_err();
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(err, NeatError::Codec(_)));
    }
}
