//! Fixed costs of GGML bookkeeping structures.

/// `sizeof(struct ggml_object)`.
pub const GGML_OBJECT_SIZE: u64 = 32;
/// `sizeof(struct ggml_tensor)`.
pub const GGML_TENSOR_SIZE: u64 = 336;
/// `sizeof(struct ggml_cgraph)`.
const GGML_CGRAPH_SIZE: u64 = 80;
const GGML_MEM_ALIGN: u64 = 16;
const POINTER_SIZE: u64 = 8;
/// Buffers the backend scheduler keeps for split inputs.
pub const SCHEDULER_OVERHEAD: u64 = 4 * 1024 * 1024;

/// Primes ggml picks hash-set sizes from.
static HASH_PRIMES: [u64; 32] = [
    2, 3, 5, 11, 17, 37, 67, 131, 257, 521, 1031, 2053, 4099, 8209, 16411, 32771, 65537, 131101,
    262147, 524309, 1048583, 2097169, 4194319, 8388617, 16777259, 33554467, 67108879, 134217757,
    268435459, 536870923, 1073741827, 2147483659,
];

pub const fn tensor_overhead() -> u64 {
    GGML_OBJECT_SIZE + GGML_TENSOR_SIZE
}

/// Node budget of a model graph with `tensor_count` weights.
pub fn graph_nodes(tensor_count: u64) -> u64 {
    8192u64.max(5 * tensor_count)
}

fn hash_size(min_size: u64) -> u64 {
    let i = HASH_PRIMES.partition_point(|&p| p < min_size);
    HASH_PRIMES.get(i).copied().unwrap_or(min_size | 1)
}

fn bitset_bytes(bits: u64) -> u64 {
    bits.div_ceil(32) * 4
}

/// Bytes of a graph object able to hold `nodes` nodes.
pub fn graph_overhead(nodes: u64) -> u64 {
    let hash = hash_size(nodes * 2);
    let bytes = GGML_CGRAPH_SIZE
        + nodes * POINTER_SIZE
        + nodes * POINTER_SIZE
        + hash * POINTER_SIZE
        + bitset_bytes(hash);
    GGML_OBJECT_SIZE + bytes.next_multiple_of(GGML_MEM_ALIGN)
}

/// Host-side cost of building and scheduling the graph of a model with
/// `tensor_count` tensors and `block_count` blocks.
pub fn compute_footprint(tensor_count: u64, block_count: u64) -> u64 {
    let nodes = graph_nodes(tensor_count);
    let graph_meta = tensor_overhead() * nodes + graph_overhead(nodes);
    let weight_contexts = 2 * tensor_overhead() * (tensor_count + 1 + block_count * 3);
    SCHEDULER_OVERHEAD + graph_meta + weight_contexts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_size_picks_next_prime() {
        assert_eq!(hash_size(16384), 16411);
        assert_eq!(hash_size(16411), 16411);
        assert_eq!(hash_size(u64::MAX - 1), u64::MAX);
    }

    #[test]
    fn small_models_use_the_minimum_graph() {
        assert_eq!(graph_nodes(10), 8192);
        assert_eq!(graph_nodes(3000), 15000);
    }

    #[test]
    fn footprint_grows_with_tensors() {
        assert!(compute_footprint(3000, 32) > compute_footprint(300, 32));
        assert!(compute_footprint(0, 0) > SCHEDULER_OVERHEAD);
    }
}
