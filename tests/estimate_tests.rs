//! Estimator invariants: determinism, the UMA identity, offload
//! monotonicity, and the boundary behaviors around caches and context.

mod common;

use common::{bert_fixture, llama_fixture, GgufBuilder};
use gguf_probe::config::EstimateConfig;
use gguf_probe::estimate::memory::{estimate, estimate_sweep, EstimateInput, MemoryUsage};
use gguf_probe::estimate::EstimateError;
use gguf_probe::format::file::GgufFile;
use gguf_probe::format::ggml::GgmlType;
use gguf_probe::format::metadata::MetadataValue;
use gguf_probe::reader::MemSource;

async fn parse(bytes: Vec<u8>) -> GgufFile {
    let mut src = MemSource::new(bytes);
    GgufFile::parse(&mut src).await.unwrap()
}

fn uma_identity(usage: &MemoryUsage) {
    assert_eq!(
        usage.uma.ram + usage.uma.vram,
        usage.components.weights
            + usage.components.kv_cache
            + usage.components.compute
            + usage.components.overhead,
        "uma split must sum to the component totals"
    );
}

#[tokio::test]
async fn test_estimation_is_deterministic() {
    let file = parse(llama_fixture(3).build()).await;
    let cfg = EstimateConfig::default();
    let a = estimate(&EstimateInput::new(&file), &cfg).unwrap();
    let b = estimate(&EstimateInput::new(&file), &cfg).unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_uma_identity_across_plans() {
    let file = parse(llama_fixture(3).build()).await;
    for gpu_layers in [-1, 0, 1, 2, 3, 4] {
        let cfg = EstimateConfig {
            gpu_layers_main: gpu_layers,
            ..Default::default()
        };
        let usage = estimate(&EstimateInput::new(&file), &cfg).unwrap();
        uma_identity(&usage);
    }
}

#[tokio::test]
async fn test_offload_monotonicity() {
    let file = parse(llama_fixture(3).build()).await;
    let cfg = EstimateConfig {
        gpu_layers_step: Some(1),
        ..Default::default()
    };
    let rows = estimate_sweep(&EstimateInput::new(&file), &cfg).unwrap();
    assert_eq!(rows.len(), 5); // 0..=3 then full

    for pair in rows.windows(2) {
        assert!(
            pair[1].uma.vram >= pair[0].uma.vram,
            "vram must not shrink as layers offload"
        );
        assert!(
            pair[1].uma.ram <= pair[0].uma.ram,
            "ram must not grow as layers offload"
        );
    }
    assert!(rows.last().unwrap().full_offloaded);
    assert!(!rows.first().unwrap().full_offloaded);
}

#[tokio::test]
async fn test_full_offload_predicate() {
    let file = parse(llama_fixture(3).build()).await;

    for (gpu_layers, no_kv_offload, expected) in [
        (-1, false, true),
        (4, false, true),
        (2, false, false),
        (0, false, false),
        (-1, true, false),
    ] {
        let cfg = EstimateConfig {
            gpu_layers_main: gpu_layers,
            no_kv_offload,
            ..Default::default()
        };
        let usage = estimate(&EstimateInput::new(&file), &cfg).unwrap();
        assert_eq!(
            usage.full_offloaded, expected,
            "gpu_layers={gpu_layers} no_kv_offload={no_kv_offload}"
        );
    }

    let full = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig::default(),
    )
    .unwrap();
    assert_eq!(full.offloaded_layers, 5); // 4 blocks + output
    assert_eq!(full.total_layers, 4);
}

#[tokio::test]
async fn test_kv_cache_bytes_exact() {
    let file = parse(llama_fixture(3).build()).await;
    let cfg = EstimateConfig::default();
    let usage = estimate(&EstimateInput::new(&file), &cfg).unwrap();

    // embd_key_gqa = (64/8) * 2 kv heads = 16 per side, F16 cache.
    let per_layer = 4096 * 16 * 2 * 2;
    assert_eq!(usage.components.kv_cache, 4 * per_layer);
    assert_eq!(usage.per_layer_breakdown.len(), 4);
    for layer in &usage.per_layer_breakdown {
        assert_eq!(layer.kv_bytes, per_layer);
    }
}

#[tokio::test]
async fn test_no_kv_offload_keeps_cache_on_host() {
    let file = parse(llama_fixture(3).build()).await;
    let on = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig::default(),
    )
    .unwrap();
    let off = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig {
            no_kv_offload: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(on.components.kv_cache, off.components.kv_cache);
    assert!(off.uma.ram >= on.uma.ram + on.components.kv_cache);
}

#[tokio::test]
async fn test_non_uma_adds_footprint_and_staging() {
    let file = parse(llama_fixture(3).build()).await;

    let mapped = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig::default(),
    )
    .unwrap();
    assert_eq!(mapped.non_uma.ram, mapped.uma.ram + (150 << 20));
    assert_eq!(mapped.non_uma.vram, mapped.uma.vram + (250 << 20));

    let resident = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig {
            mmap: false,
            ..Default::default()
        },
    )
    .unwrap();
    // Same logical split, but device weights are staged through the host.
    assert_eq!(resident.uma, mapped.uma);
    let device_weights: u64 = file
        .tensors
        .iter()
        .filter(|t| t.name.starts_with("blk.") || t.name.starts_with("output"))
        .map(|t| t.size_bytes)
        .sum();
    assert_eq!(
        resident.non_uma.ram,
        resident.uma.ram + (150 << 20) + device_weights
    );
    assert_eq!(resident.weight_bytes_mapped, 0);
    assert!(mapped.weight_bytes_mapped > 0); // token_embd stays host-side, mapped
}

#[tokio::test]
async fn test_quantized_cache_forces_flash_attention() {
    let file = parse(llama_fixture(3).build()).await;
    let usage = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig {
            cache_type_k: GgmlType::Q8_0,
            cache_type_v: GgmlType::Q8_0,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(usage.flash_attention);

    // Q8_0 cache: 34/32 bytes per element instead of 2.
    let per_layer = (4096.0f64 * 16.0 * 34.0 / 32.0).ceil() as u64 * 2;
    assert_eq!(usage.components.kv_cache, 4 * per_layer);
}

#[tokio::test]
async fn test_flash_attention_shrinks_compute() {
    let file = parse(llama_fixture(3).build()).await;
    let plain = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig::default(),
    )
    .unwrap();
    let flash = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig {
            flash_attention: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert!(flash.components.compute < plain.components.compute);
    assert_eq!(flash.components.kv_cache, plain.components.kv_cache);
}

#[tokio::test]
async fn test_context_clamping() {
    let file = parse(llama_fixture(3).build()).await;
    let usage = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig {
            context_size: Some(999_999),
            in_max_ctx_size: true,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(usage.context_size, 4096);
}

#[tokio::test]
async fn test_embedding_only_model() {
    let file = parse(bert_fixture().build()).await;
    let usage = estimate(
        &EstimateInput::new(&file),
        &EstimateConfig::default(),
    )
    .unwrap();

    assert!(usage.embedding_only);
    assert_eq!(usage.batch_sizes.logical, 512);
    assert_eq!(usage.batch_sizes.physical, 512);
    assert_eq!(usage.components.kv_cache, 0);
    assert!(usage.full_offloaded);
    uma_identity(&usage);
}

#[tokio::test]
async fn test_projector_adds_weights() {
    let main = parse(llama_fixture(3).build()).await;
    let projector = parse(
        GgufBuilder::new(3)
            .kv("general.architecture", MetadataValue::String("clip".into()))
            .kv("clip.has_vision_encoder", MetadataValue::Bool(true))
            .kv("clip.vision.embedding_length", MetadataValue::U32(64))
            .kv("clip.vision.block_count", MetadataValue::U32(2))
            .kv("clip.vision.image_size", MetadataValue::U32(224))
            .kv("clip.vision.patch_size", MetadataValue::U32(14))
            .kv(
                "clip.projector_type",
                MetadataValue::String("mlp".into()),
            )
            .tensor("v.blk.0.attn_q.weight", &[64, 64], GgmlType::F16)
            .tensor("mm.0.weight", &[64, 64], GgmlType::F32)
            .build(),
    )
    .await;

    let cfg = EstimateConfig::default();
    let alone = estimate(&EstimateInput::new(&main), &cfg).unwrap();
    let with_proj = estimate(
        &EstimateInput {
            main: &main,
            draft: None,
            projector: Some(&projector),
        },
        &cfg,
    )
    .unwrap();

    assert_eq!(
        with_proj.components.weights,
        alone.components.weights + projector.total_tensor_bytes()
    );
    assert!(with_proj.uma.vram > alone.uma.vram);
    uma_identity(&with_proj);
}

#[tokio::test]
async fn test_draft_model_adds_component_wise() {
    let main = parse(llama_fixture(3).build()).await;
    let draft = parse(llama_fixture(3).build()).await;

    let cfg = EstimateConfig::default();
    let alone = estimate(&EstimateInput::new(&main), &cfg).unwrap();
    let with_draft = estimate(
        &EstimateInput {
            main: &main,
            draft: Some(&draft),
            projector: None,
        },
        &cfg,
    )
    .unwrap();

    assert_eq!(
        with_draft.components.weights,
        2 * alone.components.weights
    );
    assert_eq!(
        with_draft.components.kv_cache,
        2 * alone.components.kv_cache
    );
    uma_identity(&with_draft);
}

#[tokio::test]
async fn test_unsupported_architecture() {
    let file = parse(
        GgufBuilder::new(3)
            .kv(
                "general.architecture",
                MetadataValue::String("frobnicator".into()),
            )
            .kv("frobnicator.context_length", MetadataValue::U32(2048))
            .kv("frobnicator.embedding_length", MetadataValue::U32(64))
            .kv("frobnicator.block_count", MetadataValue::U32(2))
            .kv(
                "frobnicator.attention.head_count",
                MetadataValue::U32(8),
            )
            .tensor("token_embd.weight", &[64, 10], GgmlType::F16)
            .build(),
    )
    .await;

    let err = estimate(&EstimateInput::new(&file), &EstimateConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        EstimateError::UnsupportedArchitecture(name) if name == "frobnicator"
    ));
}
