//! Resolve an Ollama model reference against a registry.
//!
//! Ollama registries speak the OCI distribution protocol: the image
//! manifest lists layers by media type, and the GGUF weights are the
//! layer tagged `application/vnd.ollama.image.model`. The params layer
//! carries the serving defaults a local Ollama would apply; with usage
//! enabled the well-known keys override the estimate configuration.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::ResolveError;
use crate::config::EstimateConfig;

pub const MEDIA_TYPE_MODEL: &str = "application/vnd.ollama.image.model";
pub const MEDIA_TYPE_PARAMS: &str = "application/vnd.ollama.image.params";
pub const MEDIA_TYPE_TEMPLATE: &str = "application/vnd.ollama.image.template";

/// A parsed `name[:tag]` reference. Bare names resolve to the registry's
/// `library` namespace and the `latest` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaRef {
    pub name: String,
    pub tag: String,
}

impl OllamaRef {
    pub fn parse(reference: &str) -> Result<Self, ResolveError> {
        if reference.is_empty() {
            return Err(ResolveError::InvalidReference(reference.to_string()));
        }
        let (name, tag) = reference
            .rsplit_once(':')
            .unwrap_or((reference, "latest"));
        if name.is_empty() || tag.is_empty() {
            return Err(ResolveError::InvalidReference(reference.to_string()));
        }
        let name = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{name}")
        };
        Ok(Self {
            name,
            tag: tag.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    layers: Vec<Layer>,
}

#[derive(Debug, Deserialize)]
struct Layer {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
}

/// The blob URLs one model reference resolves to.
#[derive(Debug, Clone)]
pub struct OllamaModel {
    pub model_url: Url,
    pub params_url: Option<Url>,
    pub template_url: Option<Url>,
}

/// Fetch the manifest and locate the model (and params/template) blobs.
pub async fn resolve(
    client: &Client,
    base_url: &str,
    reference: &str,
    token: Option<&str>,
) -> Result<OllamaModel, ResolveError> {
    let r = OllamaRef::parse(reference)?;
    let base = base_url.trim_end_matches('/');
    let manifest_url = Url::parse(&format!("{base}/v2/{}/manifests/{}", r.name, r.tag))?;

    debug!(url = %manifest_url, "Fetching Ollama manifest");
    let mut req = client.get(manifest_url).header(
        reqwest::header::ACCEPT,
        "application/vnd.docker.distribution.manifest.v2+json",
    );
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        return Err(ResolveError::Status(resp.status().as_u16()));
    }
    let manifest: Manifest = resp.json().await?;

    let blob_url = |media: &'static str| -> Result<Option<Url>, ResolveError> {
        manifest
            .layers
            .iter()
            .find(|l| l.media_type == media)
            .map(|l| Url::parse(&format!("{base}/v2/{}/blobs/{}", r.name, l.digest)))
            .transpose()
            .map_err(Into::into)
    };

    let model_url =
        blob_url(MEDIA_TYPE_MODEL)?.ok_or(ResolveError::MissingLayer(MEDIA_TYPE_MODEL))?;
    let model = OllamaModel {
        model_url,
        params_url: blob_url(MEDIA_TYPE_PARAMS)?,
        template_url: blob_url(MEDIA_TYPE_TEMPLATE)?,
    };

    info!(model = reference, url = %model.model_url, "Resolved Ollama model");
    Ok(model)
}

/// Serving defaults from the params layer. Only the well-known keys are
/// read; everything else in the layer is ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct OllamaPreset {
    pub num_ctx: Option<u64>,
    pub num_batch: Option<u64>,
    pub num_gpu: Option<i64>,
}

impl OllamaPreset {
    pub fn apply(&self, cfg: &mut EstimateConfig) {
        if let Some(ctx) = self.num_ctx {
            cfg.context_size = Some(ctx);
        }
        if let Some(batch) = self.num_batch {
            cfg.logical_batch_size = batch;
        }
        if let Some(gpu) = self.num_gpu {
            cfg.gpu_layers_main = gpu;
        }
    }
}

/// Fetch and parse the params layer.
pub async fn fetch_preset(
    client: &Client,
    url: Url,
    token: Option<&str>,
) -> Result<OllamaPreset, ResolveError> {
    let mut req = client.get(url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        return Err(ResolveError::Status(resp.status().as_u16()));
    }
    Ok(resp.json().await?)
}
