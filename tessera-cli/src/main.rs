use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera_core::config::PipelineConfig;
use tessera_core::decode::{Decoder, Delivery};
use tessera_core::encode::Encoder;
use tessera_core::manifest::{ErasureConfig, FileManifest};
use tessera_core::timelock::{LocalBeacon, SystemClock, TimeLock};

const DEFAULT_CHUNK: usize = 500 * 1024;

#[derive(Parser)]
#[command(name = "tessera", version, about = "time-locked erasure-coded file store")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Encrypt, time-lock, and erasure-code a file into a shard set
    Encode {
        /// RFC 3339 time before which the content stays sealed
        #[arg(long)]
        release: String,
        #[arg(long, default_value_t = 3)]
        data_shards: usize,
        #[arg(long, default_value_t = 2)]
        parity_shards: usize,
        #[arg(long, default_value_t = DEFAULT_CHUNK)]
        chunk_size: usize,
        /// Storage addresses to assign shards across (repeatable)
        #[arg(long = "node")]
        nodes: Vec<String>,
        /// Nodes sampled per shard
        #[arg(long, default_value_t = 3)]
        tolerance: usize,
        #[arg(long, default_value = ".tessera")]
        output: PathBuf,
        input: PathBuf,
    },
    /// Reassemble a file from a manifest and a directory of shards
    Decode {
        #[arg(long)]
        output: PathBuf,
        manifest: PathBuf,
        shard_dir: PathBuf,
    },
    /// Print a manifest summary
    Inspect { manifest: PathBuf },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let beacon: Arc<dyn TimeLock> = Arc::new(LocalBeacon::default_chain(Arc::new(SystemClock)));
    match cli.cmd {
        Cmd::Encode {
            release,
            data_shards,
            parity_shards,
            chunk_size,
            nodes,
            tolerance,
            output,
            input,
        } => {
            let cfg = PipelineConfig {
                erasure: ErasureConfig { data_shards, parity_shards },
                target_chunk_size: chunk_size,
                chunks_tolerance: tolerance,
            };
            encode(cfg, beacon, &release, &nodes, &output, &input)
        }
        Cmd::Decode { output, manifest, shard_dir } => {
            decode(beacon, &manifest, &shard_dir, &output)
        }
        Cmd::Inspect { manifest } => inspect(&manifest),
    }
}

fn encode(
    cfg: PipelineConfig,
    beacon: Arc<dyn TimeLock>,
    release: &str,
    nodes: &[String],
    out_dir: &Path,
    input: &Path,
) -> Result<()> {
    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("input {} has no usable file name", input.display()))?
        .to_string();
    let reader =
        BufReader::new(File::open(input).with_context(|| format!("open {}", input.display()))?);

    let encoder = Encoder::new(cfg, beacon)?;
    let encoded = encoder
        .encode(reader, &file_name, release, nodes)
        .with_context(|| format!("encode {}", input.display()))?;

    let shard_dir = out_dir.join("shards");
    fs::create_dir_all(&shard_dir)
        .with_context(|| format!("create {}", shard_dir.display()))?;
    for (chunk_id, _, shard_bytes) in encoded.distribution_plan() {
        fs::write(shard_dir.join(format!("{chunk_id}.shard")), shard_bytes)?;
    }
    let manifest_path = out_dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_vec_pretty(&encoded.manifest)?)
        .with_context(|| format!("write {}", manifest_path.display()))?;

    eprintln!(
        "Encoded {} -> {} blocks, {} shards, release {}",
        file_name,
        encoded.manifest.block_count,
        encoded.manifest.total_chunks(),
        encoded.manifest.release_time
    );
    eprintln!("Manifest: {}", manifest_path.display());
    Ok(())
}

fn decode(
    beacon: Arc<dyn TimeLock>,
    manifest_path: &Path,
    shard_dir: &Path,
    output: &Path,
) -> Result<()> {
    let manifest = read_manifest(manifest_path)?;

    // Group whatever shards are present by block; missing files are fine as
    // long as each block keeps its threshold.
    let mut deliveries: BTreeMap<u32, Vec<Delivery>> = BTreeMap::new();
    for (&block, descriptor) in &manifest.blocks {
        for chunk in &descriptor.chunks {
            let path = shard_dir.join(format!("{}.shard", chunk.chunk_id));
            match fs::read(&path) {
                Ok(shard_bytes) => deliveries
                    .entry(block)
                    .or_default()
                    .push(Delivery { chunk_id: chunk.chunk_id.clone(), shard_bytes }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
            }
        }
    }

    // Write to a sibling temp file and rename, so a failed decode never
    // leaves a truncated output behind.
    let tmp = output.with_extension("partial");
    let out = File::create(&tmp).with_context(|| format!("create {}", tmp.display()))?;
    let result = Decoder::new(beacon).decode(&manifest, &deliveries, std::io::BufWriter::new(out));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("decode {}", manifest.file_name));
    }
    fs::rename(&tmp, output).with_context(|| format!("rename to {}", output.display()))?;
    eprintln!("Decoded {} -> {}", manifest.file_name, output.display());
    Ok(())
}

fn inspect(manifest_path: &Path) -> Result<()> {
    let manifest = read_manifest(manifest_path)?;
    manifest.validate()?;
    println!("file_id:      {}", manifest.file_id);
    println!("file_name:    {}", manifest.file_name);
    println!("file_size:    {}", manifest.file_size);
    println!("release_time: {}", manifest.release_time);
    println!(
        "hash:         {}:{}",
        manifest.hash_algorithm.to_lowercase(),
        manifest.content_hash
    );
    println!(
        "erasure:      {}+{} over {} blocks ({} chunks)",
        manifest.erasure.data_shards,
        manifest.erasure.parity_shards,
        manifest.block_count,
        manifest.total_chunks()
    );
    for (block, descriptor) in &manifest.blocks {
        println!("  block {block}: {} bytes sealed", descriptor.encrypted_size);
        for chunk in &descriptor.chunks {
            println!(
                "    [{}] {} share #{} nodes={}",
                chunk.shard_index,
                chunk.chunk_id,
                chunk.key_share_label,
                chunk.nodes.len()
            );
        }
    }
    Ok(())
}

fn read_manifest(path: &Path) -> Result<FileManifest> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))
}
