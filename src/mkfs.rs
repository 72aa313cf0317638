//! The `mkfs.newfs` tool creates a newfs filesystem on a device.

use crate::cli::error;
use crate::cli::prompt;
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
    /// If true, do not ask before overwriting an existing filesystem.
    force: bool,
    /// The path to the device file on which the filesystem will be created.
    device_path: Option<PathBuf>,
}

fn parse_args(args: ArgsOs) -> Args {
    let mut res: Args = Default::default();
    for arg in args {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-f" | "--force") => res.force = true,
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
    println!(" mkfs.newfs [options] <device>");
    println!();
    println!("Creates a newfs filesystem on the given device.");
    println!();
    println!("Options:");
    println!(" -f, --force\tdo not ask before overwriting an existing filesystem");
    println!(" -h, --help\tprint this help");
}

pub fn main(args: ArgsOs) {
    let args = parse_args(args);
    if args.help {
        print_help();
        exit(0);
    }
    let device_path = args.device_path.unwrap_or_else(|| {
        error("mkfs.newfs", "specify path to a device");
    });

    let mut driver = FileDriver::open(&device_path).unwrap_or_else(|e| {
        error("mkfs.newfs", format_args!("{}: {e}", device_path.display()));
    });

    let present = NewFs::is_present(&mut driver).unwrap_or_else(|e| {
        error("mkfs.newfs", format_args!("{}: {e}", device_path.display()));
    });
    if present && !args.force {
        println!("{} contains a newfs filesystem", device_path.display());
        let confirm = prompt("Proceed anyway? (y/N) ")
            .map(|s| s.to_lowercase() == "y")
            .unwrap_or(false);
        if !confirm {
            eprintln!("Abort.");
            exit(1);
        }
    }

    let fs = NewFs::format(Box::new(driver)).unwrap_or_else(|e| {
        error("mkfs.newfs", format_args!("failed to create filesystem: {e}"));
    });
    println!(
        "created newfs on {}: {} inodes, {} data blocks",
        device_path.display(),
        fs.inode_count(),
        fs.data_block_count()
    );
    fs.unmount().unwrap_or_else(|e| {
        error("mkfs.newfs", format_args!("failed to write filesystem: {e}"));
    });
}
