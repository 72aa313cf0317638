//! The `fsck.newfs` tool checks a newfs filesystem for consistency.

use crate::cli::error;
use newfs::NewFs;
use newfs::driver::FileDriver;
use std::env::ArgsOs;
use std::path::PathBuf;
use std::process::exit;

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// The path to the device file holding the filesystem.
    device_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            _ => {
                res.device_path = Some(PathBuf::from(arg));
            }
        }
    }
    res
}

/// Prints command help.
fn print_help() {
    println!();
    println!("Usage:");
    println!(" fsck.newfs [options] <device>");
    println!();
    println!("Walks the whole tree and checks the allocation bitmaps against it.");
    println!();
    println!("Options:");
    println!(" -h, --help\tprint this help");
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let device_path = args.device_path.unwrap_or_else(|| {
        error("fsck.newfs", "specify path to a device");
    });

    let mut driver = FileDriver::open(&device_path).unwrap_or_else(|e| {
        error("fsck.newfs", format_args!("{}: {e}", device_path.display()));
    });
    let present = NewFs::is_present(&mut driver).unwrap_or_else(|e| {
        error("fsck.newfs", format_args!("{}: {e}", device_path.display()));
    });
    if !present {
        error(
            "fsck.newfs",
            format_args!(
                "{}: no valid newfs super-block (run mkfs.newfs first)",
                device_path.display()
            ),
        );
    }

    let mut fs = NewFs::mount(Box::new(driver)).unwrap_or_else(|e| {
        error("fsck.newfs", format_args!("{}: {e}", device_path.display()));
    });
    let report = fs.check().unwrap_or_else(|e| {
        error("fsck.newfs", format_args!("check failed: {e}"));
    });
    // The handle is dropped without unmounting: the checker must not rewrite
    // the device

    println!(
        "inodes: {} live, {} bits set (of {})",
        report.live_inodes,
        report.ino_bits,
        fs.inode_count()
    );
    println!(
        "data blocks: {} owned, {} bits set (of {})",
        report.owned_blocks,
        report.data_bits,
        fs.data_block_count()
    );
    if report.is_clean() {
        println!("{}: clean", device_path.display());
    } else {
        for err in &report.errors {
            eprintln!("{}: {err}", device_path.display());
        }
        exit(1);
    }
}
