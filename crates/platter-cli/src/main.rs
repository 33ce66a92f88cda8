use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use platter::{Disk, SectorSize, Table};
use platter_iso::{FormatOptions, IsoImage, StageTree, format_file};

#[derive(Debug, Parser)]
#[command(name = "platter", about = "Inspect and build disk images")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Print the partition table and filesystem summary of an image
    Info(InfoArgs),
    /// Build an ISO 9660 image from a directory tree
    Format(FormatArgs),
}

#[derive(Debug, clap::Args)]
struct InfoArgs {
    image: PathBuf,
}

#[derive(Debug, clap::Args)]
struct FormatArgs {
    /// Directory that becomes the image root
    root: PathBuf,
    #[arg(short, long)]
    output: PathBuf,
    #[arg(short = 'V', long, default_value = "ISOIMAGE")]
    volume_id: String,
    /// Keep long names and POSIX modes via Rock Ridge
    #[arg(long)]
    rock_ridge: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Warn
        })
        .init()?;

    match args.cmd {
        Command::Info(info) => print_info(&info),
        Command::Format(format) => format_image(&format),
    }
}

fn print_info(args: &InfoArgs) -> anyhow::Result<()> {
    let mut disk = Disk::open(&args.image, SectorSize::S512)
        .with_context(|| format!("opening {:?}", args.image))?;

    match disk.table() {
        Some(Table::Gpt(gpt)) => {
            println!("GPT disk {}", gpt.disk_guid);
            println!(
                "usable sectors {}..{}",
                gpt.first_usable_sector(),
                gpt.last_usable_sector()
            );
            for (index, part) in gpt.partitions().iter().enumerate() {
                if part.is_unused() {
                    continue;
                }
                println!(
                    "  {index}: {} {}..{} ({} bytes) {:?}",
                    part.type_guid, part.first_lba, part.last_lba, part.size_bytes(), part.name
                );
            }
        }
        Some(Table::Mbr(mbr)) => {
            println!("MBR disk {}", mbr.signature_string());
            for (index, part) in mbr.partitions.iter().enumerate() {
                if part.is_empty() {
                    continue;
                }
                println!(
                    "  {index}: type {:#04x} start {} sectors {}{}",
                    part.part_type,
                    part.start_lba,
                    part.sectors,
                    if part.bootable { " (boot)" } else { "" }
                );
            }
        }
        None => println!("no partition table"),
    }

    if let Some(kind) = disk.probe()? {
        println!("filesystem: {kind}");
        if kind == platter::FileSystemKind::Iso9660 {
            let mut file = std::fs::File::open(&args.image)?;
            let mut iso = IsoImage::parse(&mut file)?;
            println!("volume label: {}", iso.label());
            for entry in iso.read_dir("/")? {
                let marker = if entry.is_dir { "/" } else { "" };
                println!("  {}{} ({} bytes)", entry.name, marker, entry.size);
            }
        }
    }
    Ok(())
}

fn format_image(args: &FormatArgs) -> anyhow::Result<()> {
    let tree = StageTree::from_dir(&args.root)
        .with_context(|| format!("staging {:?}", args.root))?;
    let mut options = FormatOptions::default().with_volume_id(&args.volume_id);
    if args.rock_ridge {
        options = options.with_rock_ridge();
    }
    let file = format_file(&args.output, &tree, &options)
        .with_context(|| format!("writing {:?}", args.output))?;
    let size = file.metadata()?.len();
    println!("wrote {:?} ({size} bytes)", args.output);
    Ok(())
}
