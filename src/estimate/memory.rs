//! The closed-formula memory estimator.
//!
//! Given a parsed file and a resolved configuration, computes the
//! resident bytes each side (host RAM, device VRAM) needs for weights,
//! KV cache, compute buffers and graph overhead. The UMA split is the
//! logical placement; the non-UMA split adds the platform footprint and
//! any weights that must be staged through the host.

use serde::Serialize;
use tracing::debug;

use super::plan::{sweep_values, OffloadPlan};
use super::EstimateError;
use crate::config::{EstimateConfig, ResolvedConfig};
use crate::format::file::GgufFile;
use crate::view::architecture::{self, ArchitectureView};

/// Attention-scratch reduction when flash attention tiles KV blocks
/// instead of materializing the full score matrix.
pub const FLASH_ATTN_FACTOR: f64 = 0.25;

/// Per-node graph bookkeeping times the default graph size.
const GRAPH_NODE_OVERHEAD: u64 = 368;
const GRAPH_NODES: u64 = 8192;

/// Fixed per-sequence context bookkeeping, host side.
const SEQUENCE_OVERHEAD: u64 = 1 << 20;

const MIB: f64 = (1u64 << 20) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySplit {
    pub ram: u64,
    pub vram: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSizes {
    pub logical: u64,
    pub physical: u64,
    pub parallel: u64,
}

/// Resident byte totals per component, summed over both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ComponentTotals {
    pub weights: u64,
    pub kv_cache: u64,
    pub compute: u64,
    pub overhead: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerMemory {
    pub layer: u64,
    pub weight_bytes: u64,
    pub kv_bytes: u64,
    pub on_device: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryUsage {
    pub arch: String,
    pub context_size: u64,
    pub batch_sizes: BatchSizes,
    pub flash_attention: bool,
    pub mmap_support: bool,
    pub embedding_only: bool,
    pub offloaded_layers: u64,
    pub total_layers: u64,
    pub full_offloaded: bool,
    /// Host-side weight bytes served from the page cache when mmap is
    /// on; already excluded from the non-UMA staging term.
    pub weight_bytes_mapped: u64,
    pub components: ComponentTotals,
    pub uma: MemorySplit,
    pub non_uma: MemorySplit,
    pub per_layer_breakdown: Vec<LayerMemory>,
}

/// The files one serving configuration loads together.
pub struct EstimateInput<'a> {
    pub main: &'a GgufFile,
    pub draft: Option<&'a GgufFile>,
    pub projector: Option<&'a GgufFile>,
}

impl<'a> EstimateInput<'a> {
    pub fn new(main: &'a GgufFile) -> Self {
        Self {
            main,
            draft: None,
            projector: None,
        }
    }
}

/// Estimate under the configured gpu-layers value.
pub fn estimate(
    input: &EstimateInput<'_>,
    cfg: &EstimateConfig,
) -> Result<MemoryUsage, EstimateError> {
    let arch = recognized_arch(input.main)?;
    let rc = cfg.resolve(&arch);
    build(input, cfg, &arch, &rc, cfg.gpu_layers_main)
}

/// One estimate per sweep step when `gpu_layers_step` is set, otherwise
/// a single-element vector.
pub fn estimate_sweep(
    input: &EstimateInput<'_>,
    cfg: &EstimateConfig,
) -> Result<Vec<MemoryUsage>, EstimateError> {
    let step = match cfg.gpu_layers_step {
        None => return Ok(vec![estimate(input, cfg)?]),
        Some(step) => step,
    };
    let arch = recognized_arch(input.main)?;
    let rc = cfg.resolve(&arch);
    sweep_values(step, arch.block_count)
        .into_iter()
        .map(|gpu_layers| build(input, cfg, &arch, &rc, gpu_layers))
        .collect()
}

fn recognized_arch(file: &GgufFile) -> Result<ArchitectureView, EstimateError> {
    let arch = architecture::project(file)?;
    if !arch.is_recognized() {
        return Err(EstimateError::UnsupportedArchitecture(arch.architecture));
    }
    Ok(arch)
}

fn build(
    input: &EstimateInput<'_>,
    cfg: &EstimateConfig,
    arch: &ArchitectureView,
    rc: &ResolvedConfig,
    gpu_layers: i64,
) -> Result<MemoryUsage, EstimateError> {
    let plan = OffloadPlan::resolve(gpu_layers, arch.block_count);
    let (mut sides, per_layer) = estimate_file(input.main, arch, rc, &plan);

    if let Some(draft) = input.draft {
        let draft_arch = recognized_arch(draft)?;
        // The draft shares the main context window, clamped to its own
        // trained maximum.
        let mut draft_cfg = cfg.clone();
        draft_cfg.context_size = Some(rc.context_size);
        draft_cfg.in_max_ctx_size = true;
        let draft_rc = draft_cfg.resolve(&draft_arch);
        let draft_plan = OffloadPlan::resolve(cfg.gpu_layers_draft, draft_arch.block_count);
        let (draft_sides, _) = estimate_file(draft, &draft_arch, &draft_rc, &draft_plan);
        sides.add(&draft_sides);
    }

    if let Some(projector) = input.projector {
        sides.add(&estimate_projector(projector, plan.device_participates())?);
    }

    let footprint_ram = rc.platform_ram_mib << 20;
    let footprint_vram = rc.platform_vram_mib << 20;

    let uma = MemorySplit {
        ram: sides.host_total(),
        vram: sides.device_total(),
    };
    let staged_weights = if rc.mmap { 0 } else { sides.device_weights };
    let non_uma = MemorySplit {
        ram: uma.ram + footprint_ram + staged_weights,
        vram: uma.vram + footprint_vram,
    };

    let usage = MemoryUsage {
        arch: arch.architecture.clone(),
        context_size: rc.context_size,
        batch_sizes: BatchSizes {
            logical: rc.logical_batch,
            physical: rc.physical_batch,
            parallel: rc.parallel_sequences,
        },
        flash_attention: rc.flash_attention,
        mmap_support: rc.mmap,
        embedding_only: arch.embedding_only,
        offloaded_layers: plan.offloaded_layers(),
        total_layers: arch.block_count,
        full_offloaded: plan.is_full() && !rc.no_kv_offload,
        weight_bytes_mapped: if rc.mmap { sides.host_weights } else { 0 },
        components: sides.totals(),
        uma,
        non_uma,
        per_layer_breakdown: per_layer,
    };

    debug!(
        arch = %usage.arch,
        ctx = usage.context_size,
        offloaded = usage.offloaded_layers,
        uma_ram = usage.uma.ram,
        uma_vram = usage.uma.vram,
        "Estimated memory usage"
    );
    Ok(usage)
}

/// Per-side resident byte accumulator.
#[derive(Debug, Default, Clone, Copy)]
struct Sides {
    host_weights: u64,
    device_weights: u64,
    host_kv: u64,
    device_kv: u64,
    host_compute: u64,
    device_compute: u64,
    host_overhead: u64,
    device_overhead: u64,
}

impl Sides {
    fn add(&mut self, other: &Sides) {
        self.host_weights += other.host_weights;
        self.device_weights += other.device_weights;
        self.host_kv += other.host_kv;
        self.device_kv += other.device_kv;
        self.host_compute += other.host_compute;
        self.device_compute += other.device_compute;
        self.host_overhead += other.host_overhead;
        self.device_overhead += other.device_overhead;
    }

    fn host_total(&self) -> u64 {
        self.host_weights + self.host_kv + self.host_compute + self.host_overhead
    }

    fn device_total(&self) -> u64 {
        self.device_weights + self.device_kv + self.device_compute + self.device_overhead
    }

    fn totals(&self) -> ComponentTotals {
        ComponentTotals {
            weights: self.host_weights + self.device_weights,
            kv_cache: self.host_kv + self.device_kv,
            compute: self.host_compute + self.device_compute,
            overhead: self.host_overhead + self.device_overhead,
        }
    }
}

/// Where a tensor lives in the layer structure, by naming convention.
#[derive(Debug, PartialEq, Eq)]
enum TensorRole {
    Block(usize),
    Input,
    Output,
}

fn tensor_role(name: &str) -> TensorRole {
    if let Some(rest) = name.strip_prefix("blk.") {
        if let Some((index, _)) = rest.split_once('.') {
            if let Ok(index) = index.parse::<usize>() {
                return TensorRole::Block(index);
            }
        }
    }
    if name.starts_with("output") {
        return TensorRole::Output;
    }
    // token_embd, token_types, position_embd, rope_freqs, cls, …
    TensorRole::Input
}

fn estimate_file(
    file: &GgufFile,
    arch: &ArchitectureView,
    rc: &ResolvedConfig,
    plan: &OffloadPlan,
) -> (Sides, Vec<LayerMemory>) {
    let blocks = arch.block_count as usize;

    // Weights, partitioned by role. The input (embedding) layer always
    // stays on the host; the output layer moves only with a full plan.
    let mut layer_weights = vec![0u64; blocks];
    let mut input_weights = 0u64;
    let mut output_weights = 0u64;
    for t in &file.tensors {
        match tensor_role(&t.name) {
            TensorRole::Block(i) if i < blocks => layer_weights[i] += t.size_bytes,
            TensorRole::Block(_) | TensorRole::Output => output_weights += t.size_bytes,
            TensorRole::Input => input_weights += t.size_bytes,
        }
    }

    let offloaded = plan.offloaded_blocks as usize;
    let device_block_weights: u64 = layer_weights[..offloaded].iter().sum();
    let host_block_weights: u64 = layer_weights[offloaded..].iter().sum();

    let mut sides = Sides::default();
    sides.device_weights = device_block_weights;
    sides.host_weights = input_weights + host_block_weights;
    if plan.output_on_device {
        sides.device_weights += output_weights;
    } else {
        sides.host_weights += output_weights;
    }

    // KV cache per layer. Recurrent (SSM) layers hold fixed-size conv
    // and state tensors per sequence instead of a ctx-scaled cache.
    let (kv_k_layer, kv_v_layer) = if arch.embedding_only {
        (0, 0)
    } else if let Some(ssm) = arch.ssm {
        let conv = ssm.conv_kernel.saturating_sub(1) * ssm.inner_size * 4;
        let state = ssm.state_size * ssm.inner_size * 4;
        (
            conv * rc.parallel_sequences,
            state * rc.parallel_sequences,
        )
    } else {
        let k = (rc.context_size as f64
            * arch.embedding_key_gqa as f64
            * rc.cache_type_k.bytes_per_element())
        .ceil() as u64;
        let v = (rc.context_size as f64
            * arch.embedding_value_gqa as f64
            * rc.cache_type_v.bytes_per_element())
        .ceil() as u64;
        (k, v)
    };
    let kv_layer = kv_k_layer + kv_v_layer;

    let kv_device_layers = if rc.no_kv_offload { 0 } else { offloaded };
    sides.device_kv = kv_layer * kv_device_layers as u64;
    sides.host_kv = kv_layer * (blocks - kv_device_layers) as u64;

    // Compute buffers. The host keeps the token/logit staging buffers;
    // the graph scratch follows the offload ratio.
    let ctx = rc.context_size;
    let n_embd = arch.embedding_length;
    let io_out = if arch.embedding_only {
        n_embd * rc.logical_batch * 4
    } else {
        arch.vocabulary_length * rc.logical_batch * 4
    };
    let host_io = rc.logical_batch * 3
        + n_embd * rc.physical_batch
        + rc.physical_batch * ctx
        + ctx
        + io_out;

    let mut attn_scratch = (ctx as f64 / 1024.0 * 2.0 + 0.75)
        * arch.attention_head_count as f64
        * MIB;
    if rc.flash_attention {
        attn_scratch *= FLASH_ATTN_FACTOR;
    }
    let ff_width = match arch.ssm {
        Some(ssm) => 2 * ssm.inner_size,
        None => arch.feed_forward_length,
    };
    let moe_factor = arch.expert_used_count.max(1);
    let ffn_scratch = rc.physical_batch * (n_embd + ff_width) * 4 * moe_factor;

    let graph = attn_scratch.ceil() as u64 + ffn_scratch;
    sides.device_compute = (graph as f64 * plan.device_ratio()).ceil() as u64;
    sides.host_compute = graph - sides.device_compute + host_io;

    // Graph bookkeeping per participating device, plus per-sequence
    // context state on the host.
    sides.host_overhead =
        GRAPH_NODE_OVERHEAD * GRAPH_NODES + SEQUENCE_OVERHEAD * rc.parallel_sequences;
    if plan.device_participates() {
        sides.device_overhead = GRAPH_NODE_OVERHEAD * GRAPH_NODES;
    }

    let per_layer = (0..blocks)
        .map(|i| LayerMemory {
            layer: i as u64,
            weight_bytes: layer_weights[i],
            kv_bytes: kv_layer,
            on_device: i < offloaded,
        })
        .collect();

    (sides, per_layer)
}

/// A multimodal projector runs one forward per image: its weights
/// follow the main plan and its scratch does not scale with context.
fn estimate_projector(
    file: &GgufFile,
    device: bool,
) -> Result<Sides, EstimateError> {
    let arch = architecture::project(file)?;
    let patches = projector_patches(file);

    let weights = file.total_tensor_bytes();
    let attn = (patches as f64 / 1024.0 * 2.0 + 0.75)
        * arch.attention_head_count.max(1) as f64
        * MIB;
    let ffn = patches * (arch.embedding_length + arch.feed_forward_length) * 4;
    let compute = attn.ceil() as u64 + ffn;
    let overhead = GRAPH_NODE_OVERHEAD * GRAPH_NODES;

    let mut sides = Sides::default();
    if device {
        sides.device_weights = weights;
        sides.device_compute = compute;
        sides.device_overhead = overhead;
    } else {
        sides.host_weights = weights;
        sides.host_compute = compute;
        sides.host_overhead = overhead;
    }
    Ok(sides)
}

/// Vision tokens per image, from the encoder's image/patch geometry.
fn projector_patches(file: &GgufFile) -> u64 {
    let image = file
        .metadata
        .get_u64("clip.vision.image_size")
        .unwrap_or(336);
    let patch = file
        .metadata
        .get_u64("clip.vision.patch_size")
        .unwrap_or(14)
        .max(1);
    let side = image / patch;
    side * side
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_roles() {
        assert_eq!(tensor_role("blk.0.attn_q.weight"), TensorRole::Block(0));
        assert_eq!(tensor_role("blk.31.ffn_down.weight"), TensorRole::Block(31));
        assert_eq!(tensor_role("output.weight"), TensorRole::Output);
        assert_eq!(tensor_role("output_norm.weight"), TensorRole::Output);
        assert_eq!(tensor_role("token_embd.weight"), TensorRole::Input);
        assert_eq!(tensor_role("rope_freqs.weight"), TensorRole::Input);
        assert_eq!(tensor_role("blk.x.bad"), TensorRole::Input);
    }

    #[test]
    fn test_projector_patches_default_geometry() {
        let file = GgufFile {
            version: 3,
            alignment: 32,
            tensor_data_offset: 0,
            size: 0,
            metadata: Default::default(),
            tensors: Vec::new(),
        };
        assert_eq!(projector_patches(&file), 576);
    }
}
