use std::fs::File;
use std::io::{self, BufWriter, Read};
use std::path::PathBuf;

use blockmux::device::{self, Access, BlockDevice, FileDevice, StreamDevice};
use blockmux::filter::IdentityFactory;
use blockmux::{DeviceError, MultiplexDevice, MultiplexOptions, DEFAULT_BLOCK_SIZE};
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "blkmux", about = "Block device copy and inspection tool")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a file block by block through the multiplexed pipeline
    Copy {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        /// Worker threads (default: available parallelism)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Blocks per worker buffer
        #[arg(short, long)]
        depth: Option<usize>,
        /// JSON file with multiplexer options; flags take precedence
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show block geometry and a BLAKE3 digest of a file device
    Info {
        input: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
        /// List the CRC32 of every block
        #[arg(long)]
        blocks: bool,
    },
    /// Write every whole block of a file device to another file
    Dump {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_thread_ids(true).with_thread_names(true))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {

        // ── Copy ─────────────────────────────────────────────────────────────
        Commands::Copy { input, output, block_size, workers, depth, config } => {
            let mut opts = match config {
                Some(path) => MultiplexOptions::load(path)?,
                None       => MultiplexOptions::default(),
            };
            if let Some(workers) = workers { opts.workers = workers; }
            if let Some(depth) = depth { opts.depth = depth; }
            if block_size == 0 {
                return Err(DeviceError::InvalidBlockSize(block_size).into());
            }

            let mut src = File::open(&input)?;
            let blocks = src.metadata()?.len().div_ceil(block_size as u64);
            let target = StreamDevice::new(BufWriter::new(File::create(&output)?), blocks, block_size)?;
            let mut dev = MultiplexDevice::new(&mut IdentityFactory, target, opts)?;

            if let Err(e) = copy_blocks(&mut src, &mut dev, blocks) {
                let _ = dev.close(true);
                return Err(e.into());
            }
            dev.close(false)?;
            println!("Copied {} block(s) of {} B using {} worker(s) → {}",
                     blocks, block_size, dev.workers(), output.display());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, block_size, blocks } => {
            let file = File::open(&input)?;
            let len = file.metadata()?.len();
            let mut dev = FileDevice::open(file, block_size, None, Access::READ_ONLY)?;

            let mut hasher = blake3::Hasher::new();
            let count = device::dump(&mut dev, &mut hasher)?;

            println!("── Block device ─────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Block size     {} B", dev.block_size());
            println!("  Blocks         {}", count);
            if len % block_size as u64 != 0 {
                println!("  Trailing       {} B ignored", len % block_size as u64);
            }
            println!("  BLAKE3         {}", hex::encode(hasher.finalize().as_bytes()));

            if blocks {
                let mut block = vec![0u8; dev.block_size()];
                println!("{:>12}  CRC32", "Block");
                for num in 0..dev.size() {
                    dev.read(num, &mut block, 0)?;
                    println!("{:>12}  {:08x}", num, crc32fast::hash(&block));
                }
            }
            dev.close(false)?;
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, output, block_size } => {
            let mut dev = FileDevice::open(File::open(&input)?, block_size, None, Access::READ_ONLY)?;
            let count = device::dump(&mut dev, BufWriter::new(File::create(&output)?))?;
            dev.close(false)?;
            println!("Dumped {} block(s) → {}", count, output.display());
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn copy_blocks<R: Read, D: BlockDevice>(src: &mut R, dev: &mut D, blocks: u64) -> Result<(), DeviceError> {
    let mut block = vec![0u8; dev.block_size()];
    for num in 0..blocks {
        fill_block(src, &mut block)?;
        dev.write(num, &block, 0)?;
    }
    Ok(())
}

/// Read a whole block, zero-padding whatever the source cannot supply.
fn fill_block<R: Read>(src: &mut R, block: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    while filled < block.len() {
        match src.read(&mut block[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    block[filled..].fill(0);
    Ok(())
}
