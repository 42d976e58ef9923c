//! mkfat: format a FAT32 image and import files into it.
//!
//! The image is built through the sdfat driver itself, running against the
//! simulated card, so the tool doubles as an end-to-end exercise of the
//! whole stack.

use clap::Parser;
use sdfat::sim::{format_image, SimCard};
use sdfat::{Filesystem, Mode};
use std::fs;
use std::path::PathBuf;
use std::process::exit;

const SECTOR_SIZE: u64 = 512;

/// Chunk size for feeding file data through the driver.
const COPY_CHUNK: usize = 4096;

#[derive(Parser)]
struct Args {
    /// Output disk image path
    #[arg(short, long)]
    output: PathBuf,

    /// Directory to import files from (top-level regular files only)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Disk size in MB
    #[arg(short, long, default_value_t = 64)]
    size: u64,

    /// Sectors per cluster (power of two, 1..128)
    #[arg(long, default_value_t = 8)]
    sectors_per_cluster: u8,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let total_sectors = (args.size * 1024 * 1024 / SECTOR_SIZE) as u32;
    println!(
        "Creating FAT32 image: {:?} ({} MB, {} sectors, {} sectors/cluster)",
        args.output, args.size, total_sectors, args.sectors_per_cluster
    );

    let image = format_image(total_sectors, args.sectors_per_cluster);
    let mut fat: Filesystem<SimCard> = Filesystem::new(SimCard::new(image));
    if let Err(e) = fat.mount() {
        eprintln!("mount of the fresh image failed: {}", e);
        exit(1);
    }

    let mut imported = 0u32;
    if let Some(ref src_dir) = args.dir {
        if src_dir.exists() {
            imported = import_directory(&mut fat, src_dir)?;
        } else {
            eprintln!("import directory {:?} does not exist", src_dir);
        }
    }

    list_root(&mut fat);

    if let Err(e) = fat.unmount() {
        eprintln!("unmount failed: {}", e);
        exit(1);
    }

    fs::write(&args.output, fat.release().into_image())?;
    println!("Done. {} files imported.", imported);
    Ok(())
}

/// Import every top-level regular file whose name fits the 8.3 rules.
fn import_directory(fat: &mut Filesystem<SimCard>, dir: &PathBuf) -> std::io::Result<u32> {
    let mut imported = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let data = fs::read(&path)?;
        println!("  Importing {} ({} bytes)", name, data.len());

        let id = match fat.open(&name, Mode::Create) {
            Ok(id) => id,
            Err(e) => {
                println!("  Skipping {}: {}", name, e);
                continue;
            }
        };

        let mut ok = true;
        for chunk in data.chunks(COPY_CHUNK) {
            if let Err(e) = fat.write(id, chunk) {
                println!("  Write of {} failed: {}", name, e);
                ok = false;
                break;
            }
        }
        if let Err(e) = fat.close(id) {
            println!("  Close of {} failed: {}", name, e);
            ok = false;
        }
        if ok {
            imported += 1;
        }
    }
    Ok(imported)
}

fn list_root(fat: &mut Filesystem<SimCard>) {
    println!("Root directory:");
    let (mut list, mut name) = match fat.list_first() {
        Ok(result) => result,
        Err(e) => {
            eprintln!("listing failed: {}", e);
            return;
        }
    };

    while let Some(current) = name {
        let size = fat.size(current.as_str()).unwrap_or(0);
        println!("  {:<12} {:>10}", current, size);
        name = match fat.list_next(&mut list) {
            Ok(next) => next,
            Err(e) => {
                eprintln!("listing failed: {}", e);
                return;
            }
        };
    }
}
