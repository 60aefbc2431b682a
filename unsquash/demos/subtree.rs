//! Dump a listing of a SquashFS subtree, reading every file below it
use std::env;
use std::io;

use anyhow::{anyhow, Context};
use unsquash::squashfs::SquashFS;

fn main() -> anyhow::Result<()> {
    let mut args = env::args().skip(1);
    let sqfs_path = args.next().ok_or_else(|| anyhow!("usage: subtree <image> [path]"))?;
    let p = args.next().unwrap_or_else(|| "/".to_string());

    let sqfs = SquashFS::open(&sqfs_path).with_context(|| format!("opening {}", sqfs_path))?;
    let top = sqfs.select(&p).ok_or_else(|| anyhow!("{} not found in {}", p, sqfs_path))?;

    let mut total = 0u64;
    for node in top.walk() {
        if node.is_file() {
            total += io::copy(&mut node.open()?, &mut io::sink())?;
        }
        println!("{} {:>10} {}", node.filemode(), node.size(), node.path());
    }
    eprintln!("{} bytes of file data", total);
    Ok(())
}
