use clap::{Parser, Subcommand};
use segsplit::split::{self, SplitOptions, DEFAULT_PREFIX, DEFAULT_REMAINDER_NAME};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "segsplit", about = "Split concatenated cpio / zstd-cpio archives (initrd bundles)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract every segment into its own file
    Split {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        /// Output files are named <prefix><index>
        #[arg(long, default_value = DEFAULT_PREFIX)]
        prefix: String,
        /// File receiving the unread input if a segment cannot be decoded
        #[arg(long, default_value = DEFAULT_REMAINDER_NAME)]
        remainder: String,
        /// Write a JSON report of the run
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// List segment boundaries without extracting anything
    Scan {
        input: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {

        // ── Split ────────────────────────────────────────────────────────────
        Commands::Split { input, output_dir, prefix, remainder, report } => {
            if !output_dir.exists() { std::fs::create_dir_all(&output_dir)?; }
            let opts = SplitOptions { output_dir, prefix, remainder_name: remainder };
            // Only this run's failure may leave a remainder behind.
            let rest = opts.remainder_path();
            if rest.exists() { std::fs::remove_file(&rest)?; }
            let result = match split::split_file(&input, &opts) {
                Ok(r)  => r,
                Err(e) => {
                    if rest.exists() {
                        eprintln!("Unread input saved to {}", rest.display());
                    }
                    return Err(e.into());
                }
            };

            println!("{:<6} {:<10} {:>12} {:>12} {:>12}  {:<20} BLAKE3",
                     "Index", "Format", "Offset", "Length", "Written", "Output");
            for s in &result.segments {
                println!("{:<6} {:<10} {:>12} {:>12} {:>12}  {:<20} {}",
                    s.segment.index, s.segment.format, s.segment.offset, s.segment.length,
                    s.bytes_written, s.output.display(), &s.digest_hex()[..16]);
            }
            println!("Split {} segment(s), skipped {} padding byte(s)",
                     result.segments.len(), result.padding_bytes);

            if let Some(path) = report {
                std::fs::write(&path, result.to_json()?)?;
                println!("Report: {}", path.display());
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input } => {
            let segments = split::scan_file(&input)?;
            println!("Input: {}", input.display());
            println!("{:<6} {:<10} {:>12} {:>12} {:>12}", "Index", "Format", "Offset", "Length", "End");
            for s in &segments {
                println!("{:<6} {:<10} {:>12} {:>12} {:>12}",
                    s.index, s.format, s.offset, s.length, s.end());
            }
        }
    }

    Ok(())
}
