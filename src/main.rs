//! gguf-probe binary: resolve the input, parse it, project the views,
//! estimate memory, and print the JSON report.
//!
//! Exit codes: 0 success, 1 argument error, 2 parse error,
//! 3 estimation error, 4 I/O error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

use gguf_probe::config::{Cli, EstimateConfig};
use gguf_probe::estimate::memory::{self, EstimateInput};
use gguf_probe::estimate::EstimateError;
use gguf_probe::format::file::GgufFile;
use gguf_probe::format::ParseError;
use gguf_probe::reader::local::FileSource;
use gguf_probe::reader::mmap::MmapSource;
use gguf_probe::reader::remote::{HttpTransport, RemoteSource};
use gguf_probe::reader::AnySource;
use gguf_probe::render::{human_bytes, offload_label, EstimateReport, Report};
use gguf_probe::resolve::{hf, ollama};
use gguf_probe::view::{architecture, model, tokenizer, ViewError};

const EXIT_ARGS: u8 = 1;
const EXIT_PARSE: u8 = 2;
const EXIT_ESTIMATE: u8 = 3;
const EXIT_IO: u8 = 4;

/// Usage problems detected after clap, e.g. no input given.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EXIT_ARGS);
        }
    };

    let filter = if cli.verbose {
        "gguf_probe=debug"
    } else {
        "gguf_probe=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    // Ctrl-C drops the in-flight work, which aborts any outstanding
    // range request.
    tokio::select! {
        result = run(cli) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                error!("{err:#}");
                ExitCode::from(exit_code(&err))
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Canceled");
            ExitCode::from(EXIT_IO)
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    if err.downcast_ref::<UsageError>().is_some() {
        return EXIT_ARGS;
    }
    if let Some(parse) = err.downcast_ref::<ParseError>() {
        return match parse {
            ParseError::Io(_) => EXIT_IO,
            _ => EXIT_PARSE,
        };
    }
    if err.downcast_ref::<EstimateError>().is_some() || err.downcast_ref::<ViewError>().is_some() {
        return EXIT_ESTIMATE;
    }
    // Reader, resolver and transport failures.
    EXIT_IO
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let client = build_client(&cli)?;
    let mut cfg = EstimateConfig::from_cli(&cli);

    let main_target = resolve_main(&cli, &client, &mut cfg).await?;
    let draft_target = optional_target(cli.draft_path.as_ref(), cli.draft_url.as_ref())?;
    let mmproj_target = optional_target(cli.mmproj_path.as_ref(), cli.mmproj_url.as_ref())?;

    // Main, draft and projector are independent files; parse them as
    // independent tasks.
    let (main_file, draft_file, mmproj_file) = tokio::try_join!(
        parse_target(main_target, &cli, &client),
        parse_optional(draft_target, &cli, &client),
        parse_optional(mmproj_target, &cli, &client),
    )?;

    info!(
        arch = %main_file.architecture().unwrap_or_default(),
        tensors = main_file.tensors.len(),
        size = %human_bytes(main_file.size),
        "Parsed model"
    );

    let model_view = (!cli.skip_model)
        .then(|| model::project(&main_file))
        .transpose()?;
    let arch_view = (!cli.skip_architecture)
        .then(|| architecture::project(&main_file))
        .transpose()?;
    let tokenizer_view = (!cli.skip_tokenizer).then(|| tokenizer::project(&main_file.metadata));

    let estimate = if cli.skip_estimate {
        None
    } else {
        let input = EstimateInput {
            main: &main_file,
            draft: draft_file.as_ref(),
            projector: mmproj_file.as_ref(),
        };
        let mut rows = memory::estimate_sweep(&input, &cfg)?;
        if let Some(first) = rows.first() {
            info!(
                offload = %offload_label(first),
                uma_ram = %human_bytes(first.uma.ram),
                uma_vram = %human_bytes(first.uma.vram),
                non_uma_ram = %human_bytes(first.non_uma.ram),
                non_uma_vram = %human_bytes(first.non_uma.vram),
                "Estimate"
            );
        }
        Some(if rows.len() == 1 {
            EstimateReport::Single(Box::new(rows.remove(0)))
        } else {
            EstimateReport::Sweep(rows)
        })
    };

    let report = Report {
        model: model_view,
        architecture: arch_view,
        tokenizer: tokenizer_view,
        estimate,
    };
    println!("{}", report.to_json(cli.json_compact)?);
    Ok(())
}

fn build_client(cli: &Cli) -> anyhow::Result<reqwest::Client> {
    // Proxy settings come from HTTP_PROXY / HTTPS_PROXY / NO_PROXY,
    // which reqwest reads by default.
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("gguf-probe/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90));
    if cli.insecure {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder.build()?)
}

/// Where a GGUF file lives.
enum Target {
    Local(PathBuf),
    Remote(Url),
}

fn expand_path(path: &PathBuf) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

fn optional_target(
    path: Option<&PathBuf>,
    url: Option<&String>,
) -> anyhow::Result<Option<Target>> {
    match (path, url) {
        (Some(path), _) => Ok(Some(Target::Local(expand_path(path)))),
        (None, Some(url)) => Ok(Some(Target::Remote(parse_url(url)?))),
        (None, None) => Ok(None),
    }
}

fn parse_url(url: &str) -> anyhow::Result<Url> {
    Url::parse(url).map_err(|err| UsageError(format!("invalid URL '{url}': {err}")).into())
}

async fn resolve_main(
    cli: &Cli,
    client: &reqwest::Client,
    cfg: &mut EstimateConfig,
) -> anyhow::Result<Target> {
    if let Some(path) = &cli.path {
        return Ok(Target::Local(expand_path(path)));
    }
    if let Some(url) = &cli.url {
        return Ok(Target::Remote(parse_url(url)?));
    }
    if let (Some(repo), Some(file)) = (&cli.hf_repo, &cli.hf_file) {
        return Ok(Target::Remote(
            hf::huggingface(repo, file, cli.token.clone())?.url,
        ));
    }
    if let (Some(repo), Some(file)) = (&cli.ms_repo, &cli.ms_file) {
        return Ok(Target::Remote(
            hf::modelscope(repo, file, cli.token.clone())?.url,
        ));
    }
    if let Some(model_ref) = &cli.ol_model {
        let resolved =
            ollama::resolve(client, &cli.ol_base_url, model_ref, cli.token.as_deref()).await?;
        if cli.ol_usage {
            if let Some(params_url) = resolved.params_url.clone() {
                match ollama::fetch_preset(client, params_url, cli.token.as_deref()).await {
                    Ok(preset) => {
                        info!(?preset, "Applying Ollama serving preset");
                        preset.apply(cfg);
                    }
                    Err(err) => warn!(error = %err, "Could not read Ollama params layer"),
                }
            }
        }
        return Ok(Target::Remote(resolved.model_url));
    }
    Err(UsageError(
        "no input given: pass --path, --url, --hf-repo/--hf-file, --ms-repo/--ms-file or --ol-model"
            .into(),
    )
    .into())
}

async fn open_source(
    target: &Target,
    cli: &Cli,
    client: &reqwest::Client,
) -> anyhow::Result<AnySource> {
    match target {
        Target::Local(path) => {
            if cli.no_mmap {
                Ok(AnySource::File(FileSource::open(path)?))
            } else {
                Ok(AnySource::Mmap(MmapSource::open(path)?))
            }
        }
        Target::Remote(url) => {
            let transport = HttpTransport::new(client.clone(), url.clone())
                .with_token(cli.token.clone())
                .skip_range_probe(cli.skip_range_probe);
            Ok(AnySource::Remote(RemoteSource::new(transport).await?))
        }
    }
}

async fn parse_target(
    target: Target,
    cli: &Cli,
    client: &reqwest::Client,
) -> anyhow::Result<GgufFile> {
    let mut source = open_source(&target, cli, client).await?;
    Ok(GgufFile::parse(&mut source).await?)
}

async fn parse_optional(
    target: Option<Target>,
    cli: &Cli,
    client: &reqwest::Client,
) -> anyhow::Result<Option<GgufFile>> {
    match target {
        None => Ok(None),
        Some(target) => Ok(Some(parse_target(target, cli, client).await?)),
    }
}
