#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e4fs_core::{Ext4Fs, Ext4Geometry, Ext4Inode, SuperblockChecksum, SuperblockSource};
use e4fs_types::{EXT4_SUPERBLOCK_SIZE, InodeNumber};
use serde::Serialize;
use std::env;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "E4FS_LOG";

#[derive(Debug, Serialize)]
struct InspectOutput {
    source: SuperblockSource,
    geometry: Ext4Geometry,
    volume_name: String,
    uuid: String,
    inodes_count: u32,
    blocks_count: u64,
    free_blocks_count: u64,
    free_inodes_count: u32,
    first_ino: u32,
    inode_size: u16,
    feature_compat: u32,
    feature_incompat: u32,
    feature_ro_compat: u32,
    checksum: SuperblockChecksum,
    image_size: u64,
}

#[derive(Debug, Serialize)]
struct InodeOutput {
    ino: u64,
    kind: &'static str,
    mode: u16,
    uid: u32,
    gid: u32,
    size: u64,
    links_count: u16,
    blocks: u64,
    flags: u32,
    uses_extents: bool,
    atime: u32,
    ctime: u32,
    mtime: u32,
    dtime: u32,
    i_block: Vec<u32>,
}

fn main() {
    init_logging();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "inspect" => {
            let Some(path) = args.next() else {
                bail!("inspect requires an image path");
            };
            let json = args.any(|arg| arg == "--json");
            inspect(Path::new(&path), json)
        }
        "inode" => {
            let (Some(path), Some(ino)) = (args.next(), args.next()) else {
                bail!("inode requires <image> <ino>");
            };
            let json = args.any(|arg| arg == "--json");
            inode_cmd(Path::new(&path), parse_number(&ino, "inode number")?, json)
        }
        "block" => {
            let (Some(path), Some(ino), Some(logical)) = (args.next(), args.next(), args.next())
            else {
                bail!("block requires <image> <ino> <logical>");
            };
            block_cmd(
                Path::new(&path),
                parse_number(&ino, "inode number")?,
                parse_number(&logical, "logical block")?,
            )
        }
        "cat" => {
            let (Some(path), Some(ino)) = (args.next(), args.next()) else {
                bail!("cat requires <image> <ino>");
            };
            cat_cmd(Path::new(&path), parse_number(&ino, "inode number")?)
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
    println!("e4fs: read-only ext4 image inspector\n");
    println!("USAGE:");
    println!("  e4fs inspect <image> [--json]");
    println!("  e4fs inode <image> <ino> [--json]");
    println!("  e4fs block <image> <ino> <logical>   (raw block to stdout)");
    println!("  e4fs cat <image> <ino>               (file data to stdout)");
    println!("\nSet {LOG_ENV} (e.g. {LOG_ENV}=debug) to control diagnostics on stderr.");
}

fn parse_number(raw: &str, what: &str) -> Result<u64> {
    raw.parse::<u64>()
        .with_context(|| format!("invalid {what}: {raw:?}"))
}

fn open_image(path: &Path) -> Result<Ext4Fs> {
    Ext4Fs::open(path).with_context(|| format!("failed to open ext4 image {}", path.display()))
}

fn inode_kind(inode: &Ext4Inode) -> &'static str {
    if inode.is_regular() {
        "regular"
    } else if inode.is_dir() {
        "directory"
    } else if inode.is_symlink() {
        "symlink"
    } else {
        "other"
    }
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    let hex: Vec<String> = uuid.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        hex[0..4].concat(),
        hex[4..6].concat(),
        hex[6..8].concat(),
        hex[8..10].concat(),
        hex[10..16].concat()
    )
}

fn inspect(path: &Path, json: bool) -> Result<()> {
    let fs = open_image(path)?;
    let sb = fs.superblock();

    let region = fs
        .read_raw(fs.superblock_source().byte_offset(), EXT4_SUPERBLOCK_SIZE)
        .context("re-read superblock region")?;
    let checksum =
        e4fs_core::superblock_checksum(&region).context("recompute superblock checksum")?;

    let output = InspectOutput {
        source: fs.superblock_source(),
        geometry: fs.geometry().clone(),
        volume_name: sb.volume_name.clone(),
        uuid: format_uuid(&sb.uuid),
        inodes_count: sb.inodes_count,
        blocks_count: sb.blocks_count,
        free_blocks_count: sb.free_blocks_count,
        free_inodes_count: sb.free_inodes_count,
        first_ino: sb.first_ino,
        inode_size: sb.inode_size,
        feature_compat: sb.feature_compat,
        feature_incompat: sb.feature_incompat,
        feature_ro_compat: sb.feature_ro_compat,
        checksum,
        image_size: fs.image_size(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    println!("e4fs inspector");
    match output.source {
        SuperblockSource::Primary => println!("superblock: primary (byte 1024)"),
        SuperblockSource::Backup {
            group,
            block,
            block_size,
            offset,
        } => println!(
            "superblock: backup in group {group} (block {block} at {block_size}-byte blocks, byte {offset})"
        ),
    }
    println!("volume_name: {}", output.volume_name);
    println!("uuid: {}", output.uuid);
    println!("block_size: {}", output.geometry.block_size);
    println!("blocks_count: {}", output.blocks_count);
    println!("inodes_count: {}", output.inodes_count);
    println!("groups: {}", output.geometry.groups_count);
    println!("inodes_per_group: {}", output.geometry.inodes_per_group);
    println!("inode_record_size: {}", output.geometry.inode_record_size);
    println!("free_blocks: {}", output.free_blocks_count);
    println!("free_inodes: {}", output.free_inodes_count);
    println!(
        "features: compat={:#x} incompat={:#x} ro_compat={:#x}",
        output.feature_compat, output.feature_incompat, output.feature_ro_compat
    );
    println!(
        "checksum: stored={:#010x} computed={:#010x}",
        output.checksum.stored, output.checksum.computed
    );
    println!("image_size: {}", output.image_size);
    Ok(())
}

fn inode_cmd(path: &Path, ino: u64, json: bool) -> Result<()> {
    let fs = open_image(path)?;
    let inode = fs
        .read_inode(InodeNumber(ino))
        .with_context(|| format!("failed to read inode {ino}"))?;

    let output = InodeOutput {
        ino,
        kind: inode_kind(&inode),
        mode: inode.mode,
        uid: inode.uid,
        gid: inode.gid,
        size: inode.size,
        links_count: inode.links_count,
        blocks: inode.blocks,
        flags: inode.flags,
        uses_extents: inode.uses_extents(),
        atime: inode.atime,
        ctime: inode.ctime,
        mtime: inode.mtime,
        dtime: inode.dtime,
        i_block: inode.block.to_vec(),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("serialize output")?
        );
        return Ok(());
    }

    println!("inode: {}", output.ino);
    println!("kind: {}", output.kind);
    println!("mode: {:#o}", output.mode);
    println!("uid/gid: {}/{}", output.uid, output.gid);
    println!("size: {}", output.size);
    println!("links: {}", output.links_count);
    println!("flags: {:#x}", output.flags);
    if output.uses_extents {
        println!("note: extent-mapped; i_block holds an extent tree");
    }
    for (i, ptr) in output.i_block.iter().enumerate() {
        let label = match i {
            0..=11 => "direct",
            12 => "single",
            13 => "double",
            _ => "triple",
        };
        println!("i_block[{i:2}] {label:6} {ptr}");
    }
    Ok(())
}

fn block_cmd(path: &Path, ino: u64, logical: u64) -> Result<()> {
    let fs = open_image(path)?;
    let inode = fs
        .read_inode(InodeNumber(ino))
        .with_context(|| format!("failed to read inode {ino}"))?;
    let physical = fs
        .map_logical_block(&inode, logical)
        .with_context(|| format!("failed to map logical block {logical} of inode {ino}"))?;
    debug!(ino, logical, physical = physical.0, "mapped");
    let block = fs
        .read_physical_block(physical)
        .with_context(|| format!("failed to read block {physical}"))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(block.as_slice()).context("write block")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}

fn cat_cmd(path: &Path, ino: u64) -> Result<()> {
    let fs = open_image(path)?;
    let inode = fs
        .read_inode(InodeNumber(ino))
        .with_context(|| format!("failed to read inode {ino}"))?;
    let data = fs
        .read_file(&inode)
        .with_context(|| format!("failed to read data of inode {ino}"))?;

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&data).context("write file data")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}
