use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use sha2::Sha256;

use docker_archive::{BlobInfo, BlobKind, Digest, LayerDescriptor, RepoTag, Writer};

/// Writes a single image into a `docker save`-compatible tar archive.
#[derive(Debug, Parser)]
#[clap(name = "docker-archive", version)]
pub struct App {
    /// Increase log verbosity (repeatable); RUST_LOG takes precedence
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Don't show progress bars
    #[clap(short, long)]
    quiet: bool,

    /// The archive to write, or "-" for stdout
    #[clap(short, long)]
    output: PathBuf,

    /// The image configuration file
    #[clap(long)]
    config: PathBuf,

    /// A NAME:TAG reference to record for the image
    #[clap(short, long = "tag")]
    tags: Vec<RepoTag>,

    /// Uncompressed layer tarballs, from the base layer up
    layers: Vec<PathBuf>,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

/// Returns the digest and size of a file's contents.
fn hash_file(path: &Path) -> Result<BlobInfo> {
    let mut file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
    let mut hasher = Sha256::default();
    let size = io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Reading {}", path.display()))?;
    Ok(BlobInfo::new(Digest::from_sha256(hasher), size))
}

fn progress_bar(app: &App, size: u64, path: &Path) -> Result<ProgressBar> {
    if app.quiet {
        return Ok(ProgressBar::hidden());
    }
    let bar = ProgressBar::new(size);
    bar.set_style(
        ProgressStyle::with_template(
            "[eta {eta}] {bar:40.cyan/blue} {decimal_bytes:>7}/{decimal_total_bytes:7} {msg}",
        )?
        .progress_chars("##-"),
    );
    bar.set_message(path.display().to_string());
    Ok(bar)
}

fn write_image<W: Write>(app: &App, writer: &Writer<W>) -> Result<()> {
    let config_bytes = std::fs::read(&app.config)
        .with_context(|| format!("Reading config {}", app.config.display()))?;
    let config = BlobInfo::new(
        Digest::from_bytes(&config_bytes),
        config_bytes.len() as u64,
    );
    writer
        .put_blob(&config, BlobKind::Config, &config_bytes[..])
        .context("Writing config")?;

    let mut layers = Vec::with_capacity(app.layers.len());
    for path in &app.layers {
        let info = hash_file(path)?;
        info!("Layer {} is {}", path.display(), info.digest);

        let file = File::open(path).with_context(|| format!("Opening {}", path.display()))?;
        let bar = progress_bar(app, info.size, path)?;
        let reused = writer
            .put_blob(&info, BlobKind::Layer, bar.wrap_read(file))
            .with_context(|| format!("Writing layer {}", path.display()))?;
        if reused {
            bar.finish_with_message(format!("{} (already present)", path.display()));
        } else {
            bar.finish();
        }

        layers.push(LayerDescriptor::new(info.digest, info.size));
    }

    let top = writer
        .write_legacy_metadata(&layers, &config_bytes, &app.tags)
        .context("Writing legacy layer metadata")?;
    if let Some(top) = top {
        info!("Top legacy layer is {top}");
    }
    writer
        .ensure_manifest_entry(&layers, &config.digest, &app.tags)
        .context("Recording manifest entry")?;
    Ok(())
}

fn main() -> Result<()> {
    let app = App::parse();
    init_logging(app.verbose);

    let sink: Box<dyn Write> = if app.output.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(&app.output)
                .with_context(|| format!("Creating {}", app.output.display()))?,
        )
    };

    let writer = Writer::new(BufWriter::new(sink));
    write_image(&app, &writer)?;
    writer.close().context("Finishing archive")?;
    Ok(())
}
