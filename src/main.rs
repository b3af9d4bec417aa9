//! modazip - Dragon Age add-in archive reader
//!
//! Lists, inspects and extracts `.erf`, `.dazip` and `.override` archives.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use modazip::archive::{extract_all, ArchiveHandle, ArchiveKind, OpenOptions};
use modazip::config::{resolve_encoding, ExtractConfig, ScanConfig};
use modazip::inspect::{inspect, inspect_many, ArchiveSummary};

/// Extensions picked up by `scan`.
const ARCHIVE_EXTENSIONS: [&str; 4] = ["erf", "rim", "dazip", "override"];

#[derive(Parser)]
#[command(name = "modazip")]
#[command(version)]
#[command(about = "Read Dragon Age ERF and dazip archives")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Encoding of 8-bit member names (e.g. windows-1252); default UTF-8
    #[arg(short, long, global = true, env = "MODAZIP_ENCODING")]
    encoding: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the members of an archive
    List {
        /// Path to the archive
        archive: PathBuf,

        /// Archive kind (erf, dazip, override, generic); default from extension
        #[arg(short, long)]
        kind: Option<ArchiveKind>,
    },

    /// Extract every member of an archive
    Extract {
        /// Path to the archive
        archive: PathBuf,

        /// Extraction directory
        #[arg(short, long)]
        output: PathBuf,

        /// Archive kind (erf, dazip, override, generic); default from extension
        #[arg(short, long)]
        kind: Option<ArchiveKind>,

        /// Keep files that already exist
        #[arg(long)]
        no_overwrite: bool,

        /// Fail instead of creating missing directories
        #[arg(long)]
        no_create_dirs: bool,
    },

    /// Summarize an archive, its manifest and any nested ERFs
    Inspect {
        /// Path to the archive
        archive: PathBuf,
    },

    /// Inspect every archive below a directory
    Scan {
        /// Directory to search
        dir: PathBuf,

        /// Worker threads (defaults to CPU thread count)
        #[arg(short, long)]
        jobs: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(if cli.verbose {
                    "modazip=debug".parse()?
                } else {
                    "modazip=warn".parse()?
                }),
            )
            .init();
    }

    match cli.command {
        Commands::List { archive, kind } => {
            let mut options = OpenOptions::default().encoding(resolve_encoding(cli.encoding.as_deref())?);
            options.kind = kind;
            list(&archive, &options, cli.json)?;
        }

        Commands::Extract {
            archive,
            output,
            kind,
            no_overwrite,
            no_create_dirs,
        } => {
            let config = ExtractConfig {
                create_dirs: !no_create_dirs,
                overwrite: !no_overwrite,
                encoding: cli.encoding,
                kind,
                ..ExtractConfig::new(archive, output)
            };
            extract(&config, cli.json)?;
        }

        Commands::Inspect { archive } => {
            let options = OpenOptions::default().encoding(resolve_encoding(cli.encoding.as_deref())?);
            let summary = inspect(&archive, &options)
                .with_context(|| format!("Failed to inspect {}", archive.display()))?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary, 0);
            }
        }

        Commands::Scan { dir, jobs } => {
            let jobs = jobs.unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });
            let config = ScanConfig {
                root: dir,
                jobs,
                encoding: cli.encoding,
            };
            scan(&config, cli.json)?;
        }
    }

    Ok(())
}

fn list(path: &Path, options: &OpenOptions, json: bool) -> Result<()> {
    let mut handle = ArchiveHandle::open(path, options)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let mut descriptors = Vec::with_capacity(handle.member_count());
    while let Some(mut member) = handle.next_member()? {
        member.skip()?;
        descriptors.push(member.into_descriptor());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }

    for d in &descriptors {
        let marker = if d.path().is_safe() || d.name().is_none() { ' ' } else { '!' };
        println!(
            "{}{:>6} {:>12}  {:<14} {}",
            marker,
            d.index(),
            d.uncompressed_size(),
            format!("{:?}", d.role()),
            d.display_name()
        );
    }
    eprintln!(
        "\nTotal: {} members, {} bytes ({}, {})",
        descriptors.len(),
        handle.uncompressed_offset(),
        handle.format(),
        handle.kind()
    );
    Ok(())
}

fn extract(config: &ExtractConfig, json: bool) -> Result<()> {
    config.validate()?;
    let options = config.open_options()?;
    let mut handle = ArchiveHandle::open(&config.archive_path, &options)
        .with_context(|| format!("Failed to open {}", config.archive_path.display()))?;

    let pb = ProgressBar::new(handle.member_count() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let report = extract_all(
        &mut handle,
        &config.output_dir,
        &config.extract_options(),
        |descriptor, offset| {
            pb.inc(1);
            pb.set_message(format!("{} ({} bytes)", descriptor.display_name(), offset));
        },
    )?;
    pb.finish_and_clear();

    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else {
        println!(
            "Extracted {} entries ({} bytes) to {}",
            report.extracted.len(),
            report.bytes_written,
            config.output_dir.display()
        );
        for name in &report.rejected {
            println!("REJECTED: {}", name);
        }
        for failure in &report.failed {
            println!("FAIL: {} - {}", failure.name, failure.error);
        }
    }

    if !report.failed.is_empty() {
        bail!("{} members failed to extract", report.failed.len());
    }
    Ok(())
}

fn scan(config: &ScanConfig, json: bool) -> Result<()> {
    config.validate()?;
    let options = config.open_options()?;

    let paths: Vec<PathBuf> = WalkDir::new(&config.root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ARCHIVE_EXTENSIONS.iter().any(|a| ext.eq_ignore_ascii_case(a)))
        })
        .collect();

    if paths.is_empty() {
        eprintln!("No archives found below {}", config.root.display());
        return Ok(());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build()
        .context("Failed to build worker pool")?;

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] Scanning [{bar:40.cyan/blue}] {pos}/{len} | {msg}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let results = pool.install(|| {
        inspect_many(&paths, &options, |path, result| {
            pb.inc(1);
            match result {
                Ok(_) => pb.set_message(format!("OK: {}", path.display())),
                Err(e) => pb.println(format!("FAIL: {} - {}", path.display(), e)),
            }
        })
    });
    pb.finish_and_clear();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if json {
        let entries: Vec<_> = results
            .iter()
            .map(|(path, result)| match result {
                Ok(summary) => serde_json::json!({ "path": path, "summary": summary }),
                Err(e) => serde_json::json!({ "path": path, "error": e.to_string() }),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for (path, result) in &results {
            if let Ok(summary) = result {
                let uids = summary
                    .manifest
                    .as_ref()
                    .map(|m| m.uids().collect::<Vec<_>>().join(","))
                    .unwrap_or_default();
                println!(
                    "{:<60} {:>9} {:>6} members {:>12} bytes  {}",
                    path.display(),
                    summary.format.to_string(),
                    summary.member_count,
                    summary.uncompressed_size,
                    uids
                );
            }
        }
        eprintln!("\nScanned {} archives ({} failed)", results.len(), failed);
    }
    Ok(())
}

fn print_summary(summary: &ArchiveSummary, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{} [{} / {}]", indent, summary.label, summary.format, summary.kind);
    if let Some(erf) = &summary.erf {
        if let Some(built) = erf.built {
            println!("{}  Built:      {}", indent, built);
        }
        if let Some(module) = &erf.module {
            println!("{}  Module id:  {} (flags {:#x})", indent, module.module_id, module.flags);
        }
    }
    println!("{}  Members:    {}", indent, summary.member_count);
    println!("{}  Size:       {} bytes", indent, summary.uncompressed_size);

    if let Some(manifest) = &summary.manifest {
        println!("{}  Manifest:   {} ({} add-ins, {} offers)", indent, manifest.kind, manifest.add_ins.len(), manifest.offers.len());
        for item in manifest.add_ins.iter().chain(&manifest.offers) {
            println!(
                "{}    {} \"{}\" v{} -> {}",
                indent,
                item.uid,
                item.title.as_deref().unwrap_or(&item.name),
                item.version.as_deref().unwrap_or("?"),
                item.extended_module_uid.as_deref().unwrap_or("-")
            );
        }
    }

    let rejected = summary.rejected_count();
    if rejected > 0 {
        println!("{}  Rejected:   {} unsafe member paths", indent, rejected);
    }
    for member in &summary.members {
        if let Some(error) = &member.error {
            println!("{}  FAIL: {} - {}", indent, member.name.as_deref().unwrap_or("?"), error);
        }
        if let Some(nested) = &member.nested {
            print_summary(nested, depth + 1);
        }
    }
}
