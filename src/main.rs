//! Multi-call entry point for the newfs tools.

mod cli;
mod fsck;
mod mkfs;

use crate::cli::error;
use std::env;
use std::path::PathBuf;

fn main() {
    env_logger::init();

    let mut args = env::args_os();
    let bin = args
        .next()
        .map(PathBuf::from)
        .and_then(|p| {
            p.file_name()
                .and_then(|name| name.to_str())
                .map(str::to_owned)
        })
        .unwrap_or_else(|| {
            error("newfs", "missing binary name");
        });
    // Installed under tool names; the plain binary takes the tool as its
    // first argument instead
    let tool = if bin == "newfs" {
        args.next()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| {
                error("newfs", "missing tool name (mkfs, fsck)");
            })
    } else {
        bin
    };
    match tool.as_str() {
        "mkfs" | "mkfs.newfs" => mkfs::main(args),
        "fsck" | "fsck.newfs" => fsck::main(args),
        _ => error("newfs", "invalid binary name"),
    }
}
