//! gguf-probe: inspect GGUF model files and estimate memory needs.
//!
//! Answers two questions about a GGUF file without loading the weights:
//! what is inside it (metadata, architecture, tokenizer, tensor catalog),
//! and how much host RAM / device VRAM a runtime would need to serve it
//! under a given configuration (context length, batch sizes, offload
//! plan, cache quantization, flash attention, memory mapping).
//!
//! Works on local files, memory maps, and remote HTTP endpoints via
//! byte-range requests, touching only the bytes it needs.

pub mod config;
pub mod estimate;
pub mod format;
pub mod reader;
pub mod render;
pub mod resolve;
pub mod view;
