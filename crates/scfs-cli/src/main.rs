#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use scfs::{CompressionType, FileStoreOpener, MountConfig, ScfsMount};
use serde::Serialize;
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

/// Bytes moved per engine call by `pack` and `unpack`.
const COPY_CHUNK: usize = 1 << 20;

#[derive(Debug, Serialize)]
struct InspectOutput {
    path: String,
    cluster_size: u32,
    comp_type: CompressionType,
    logical_size: u64,
    cluster_count: u32,
    compressed_clusters: u32,
    data_bytes: u64,
    index_bytes: u64,
    store_bytes: u64,
    /// `store_bytes / logical_size`; absent for an empty file.
    ratio: Option<f64>,
}

fn main() {
    if let Err(error) = init_logging().and_then(|()| run()) {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

/// Log to stderr at the level named by `SCFS_LOG` (default `warn`).
fn init_logging() -> Result<()> {
    let level = match env::var("SCFS_LOG")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("install log subscriber")?;
    Ok(())
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };
    let rest: Vec<String> = args.collect();

    match command.as_str() {
        "pack" => {
            let (paths, config) = parse_options(&rest)?;
            let [src, dst] = two_paths("pack", paths)?;
            pack(&src, &dst, config)
        }
        "unpack" => {
            let (paths, config) = parse_options(&rest)?;
            let [src, dst] = two_paths("unpack", paths)?;
            unpack(&src, &dst, config)
        }
        "inspect" => {
            let json = rest.iter().any(|arg| arg == "--json");
            let paths: Vec<&String> = rest.iter().filter(|arg| *arg != "--json").collect();
            let [path] = paths.as_slice() else {
                bail!("inspect requires exactly one path argument");
            };
            inspect(Path::new(path.as_str()), json)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn print_usage() {
    println!("scfs-cli\n");
    println!("USAGE:");
    println!(
        "  scfs-cli pack <src> <dst> [--cluster-size N] [--comp none|lz4|zlib] [--threshold P] [--config FILE]"
    );
    println!("  scfs-cli unpack <src> <dst>");
    println!("  scfs-cli inspect <path> [--json]");
    println!();
    println!("Set SCFS_LOG=error|warn|info|debug|trace for engine logs on stderr.");
}

/// Split positional paths from mount options.
///
/// `--config FILE` loads a JSON `MountConfig`; later flags override it.
fn parse_options(args: &[String]) -> Result<(Vec<PathBuf>, MountConfig)> {
    let mut config = MountConfig::default();
    let mut paths = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .with_context(|| format!("{flag} requires a value"))
                .cloned()
        };
        match arg.as_str() {
            "--config" => {
                let file = value("--config")?;
                let text = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read config {file}"))?;
                config = serde_json::from_str(&text)
                    .with_context(|| format!("invalid mount config in {file}"))?;
            }
            "--cluster-size" => {
                let raw = value("--cluster-size")?;
                let bytes: u32 = raw
                    .parse()
                    .with_context(|| format!("--cluster-size {raw} is not a number"))?;
                config = config.cluster_size(bytes)?;
            }
            "--comp" => {
                let raw = value("--comp")?;
                let comp: CompressionType = raw.parse()?;
                config = config.comp_type(comp);
            }
            "--threshold" => {
                let raw = value("--threshold")?;
                let percent: u8 = raw
                    .parse()
                    .with_context(|| format!("--threshold {raw} is not a percentage"))?;
                config = config.comp_threshold_percent(percent);
            }
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            path => paths.push(PathBuf::from(path)),
        }
    }
    config.validate()?;
    Ok((paths, config))
}

fn two_paths(command: &str, paths: Vec<PathBuf>) -> Result<[PathBuf; 2]> {
    <[PathBuf; 2]>::try_from(paths)
        .map_err(|_| anyhow::anyhow!("{command} requires <src> <dst>"))
}

fn pack(src: &Path, dst: &Path, config: MountConfig) -> Result<()> {
    let mount = ScfsMount::new(config)?;
    let mut input = BufReader::new(
        File::open(src).with_context(|| format!("failed to open {}", src.display()))?,
    );
    let file = mount.file(FileStoreOpener::new(dst));
    let handle = file
        .open()
        .with_context(|| format!("failed to open backing object {}", dst.display()))?;
    handle
        .truncate_to_zero()
        .with_context(|| format!("failed to reset {}", dst.display()))?;

    let mut chunk = vec![0_u8; COPY_CHUNK];
    let mut offset = 0_u64;
    loop {
        let n = input
            .read(&mut chunk)
            .with_context(|| format!("failed to read {}", src.display()))?;
        if n == 0 {
            break;
        }
        handle
            .write_at(offset, &chunk[..n])
            .with_context(|| format!("failed to write at offset {offset}"))?;
        offset += n as u64;
    }
    handle
        .release()
        .with_context(|| format!("failed to flush metadata to {}", dst.display()))?;

    let stats = file.stats();
    info!(
        target: "scfs::cli",
        src = %src.display(),
        dst = %dst.display(),
        bytes = offset,
        stored = stats.bytes_stored,
        compressed = stats.clusters_compressed,
        raw = stats.clusters_raw,
        "packed"
    );
    Ok(())
}

fn unpack(src: &Path, dst: &Path, config: MountConfig) -> Result<()> {
    let mount = ScfsMount::new(config)?;
    let file = mount.file(FileStoreOpener::new(src).existing_only());
    let handle = file
        .open()
        .with_context(|| format!("failed to open {}", src.display()))?;
    let size = handle
        .logical_size()
        .with_context(|| format!("failed to load index of {}", src.display()))?;

    let mut output = BufWriter::new(
        File::create(dst).with_context(|| format!("failed to create {}", dst.display()))?,
    );
    let mut offset = 0_u64;
    while offset < size {
        let bytes = handle
            .read_at(offset, COPY_CHUNK)
            .with_context(|| format!("failed to read at offset {offset}"))?;
        if bytes.is_empty() {
            bail!("{} ended at {offset}, expected {size} bytes", src.display());
        }
        output
            .write_all(&bytes)
            .with_context(|| format!("failed to write {}", dst.display()))?;
        offset += bytes.len() as u64;
    }
    output.flush().context("flush output")?;
    handle.release()?;
    Ok(())
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    // Mount defaults only matter for new files; inspect never writes.
    let mount = ScfsMount::new(MountConfig::default())?;
    let file = mount.file(FileStoreOpener::new(path).existing_only());
    let handle = file
        .open()
        .with_context(|| format!("failed to open {}", path.display()))?;
    let summary = handle
        .index_summary()
        .with_context(|| format!("{} is not a readable SCFS object", path.display()))?;

    let cluster_size = scfs::ClusterSize::new(summary.cluster_size)?;
    let mut compressed_clusters = 0;
    for cluster in 0..summary.cluster_count {
        let desc = handle.resolve(cluster)?;
        let nominal = cluster_size.nominal_len(cluster, summary.logical_size);
        if desc.size != nominal && desc.size != summary.cluster_size {
            compressed_clusters += 1;
        }
    }
    let store_bytes = std::fs::metadata(path)?.len();
    handle.release()?;

    let output = InspectOutput {
        path: path.display().to_string(),
        cluster_size: summary.cluster_size,
        comp_type: summary.comp_type,
        logical_size: summary.logical_size,
        cluster_count: summary.cluster_count,
        compressed_clusters,
        data_bytes: summary.data_end,
        index_bytes: store_bytes.saturating_sub(summary.data_end),
        store_bytes,
        ratio: (summary.logical_size > 0)
            .then(|| store_bytes as f64 / summary.logical_size as f64),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
    } else {
        println!("SCFS Inspector");
        println!("path: {}", output.path);
        println!("cluster_size: {}", output.cluster_size);
        println!("comp_type: {}", output.comp_type);
        println!("logical_size: {}", output.logical_size);
        println!(
            "clusters: {} ({} compressed)",
            output.cluster_count, output.compressed_clusters
        );
        println!("data_bytes: {}", output.data_bytes);
        println!("index_bytes: {}", output.index_bytes);
        println!("store_bytes: {}", output.store_bytes);
        if let Some(ratio) = output.ratio {
            println!("ratio: {ratio:.3}");
        }
    }
    Ok(())
}
