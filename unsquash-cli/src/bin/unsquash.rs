use std::fs::{self, File};
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use anyhow::{self, bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use log::{warn, LevelFilter, Log, Metadata, Record};
use unsquash::squashfs::{FileType, Node, OpenOptions, SquashFS};

#[derive(Parser, Debug)]
#[command(version, about = "Inspect and extract SquashFS 4.0 images")]
struct Cli {
    /// The SquashFS image to operate on
    filesystem: PathBuf,

    /// Byte offset of the image within the file
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Fail on files whose decoded size differs from their inode
    #[arg(long)]
    strict: bool,

    /// Log more; repeat for more detail
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// The command to execute
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of the superblock and tree
    Info,
    /// List directories
    Ls(LsArgs),
    /// Print file contents
    Cat(CatArgs),
    /// Write files and directories out to the host filesystem
    Extract(ExtractArgs),
    /// Print the path of every entry with the given name
    Find(FindArgs),
}

#[derive(Args, Debug)]
struct LsArgs {
    /// Long listing: mode, owner, size
    #[arg(short)]
    long: bool,
    files: Vec<String>,
}

#[derive(Args, Debug)]
struct CatArgs {
    #[arg(required = true)]
    files: Vec<String>,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Destination directory
    #[arg(short, long = "dest", default_value = "squashfs-root")]
    dir: PathBuf,
    files: Vec<String>,
}

#[derive(Args, Debug)]
struct FindArgs {
    name: String,
}

/// Writes log records to stderr
struct StderrLogger {
    level: LevelFilter,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = writeln!(io::stderr().lock(), "{:<5} {}: {}",
                record.level(), record.target(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    if log::set_boxed_logger(Box::new(StderrLogger { level })).is_ok() {
        log::set_max_level(level);
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let sqfs = OpenOptions::new()
        .offset(cli.offset)
        .strict_sizes(cli.strict)
        .open(&cli.filesystem)
        .with_context(|| format!("Failed to open SquashFS {}", cli.filesystem.display()))?;
    match &cli.command {
        Command::Info => cmd_info(&sqfs),
        Command::Ls(args) => cmd_ls(&sqfs, args),
        Command::Cat(args) => cmd_cat(&sqfs, args),
        Command::Extract(args) => cmd_extract(&sqfs, args),
        Command::Find(args) => cmd_find(&sqfs, args),
    }
}

fn lookup<'a, R>(sqfs: &'a SquashFS<R>, path: &str) -> anyhow::Result<Node<'a, R>> {
    sqfs.select(path).with_context(|| format!("cannot access '{}': No such file or directory", path))
}

fn cmd_info<R: Read + Seek>(sqfs: &SquashFS<R>) -> anyhow::Result<()> {
    let sb = sqfs.superblock();
    println!("Compression          {}", sb.compressor()?.name());
    println!("Block size           {}", sb.block_size);
    println!("Bytes used           {}", sb.bytes_used);
    println!("Creation time        {}", sb.mod_time);
    println!("Inodes               {}", sb.inode_count);
    println!("Fragments            {}", sb.frag_count);
    println!("Ids                  {}", sqfs.ids().len());
    println!("Flags                {:?}", sb.flags);
    println!("Xattrs               {}", if sb.has_xattrs() { "yes" } else { "no" });

    let mut counts = [0usize; 7];
    for node in sqfs.walk() {
        counts[node.file_type() as usize] += 1;
    }
    println!("Directories          {}", counts[FileType::Directory as usize]);
    println!("Files                {}", counts[FileType::File as usize]);
    println!("Symlinks             {}", counts[FileType::Symlink as usize]);
    let devices = counts[FileType::BlockDevice as usize] + counts[FileType::CharDevice as usize];
    println!("Devices              {}", devices);
    println!("Fifos and sockets    {}", counts[FileType::Fifo as usize] + counts[FileType::Socket as usize]);
    Ok(())
}

fn print_entry<R, W: Write>(out: &mut W, node: &Node<'_, R>, name: &str, long: bool) -> io::Result<()> {
    if !long {
        return writeln!(out, "{}", name);
    }
    let size = match (node.major(), node.minor()) {
        (Some(major), Some(minor)) => format!("{:>4},{:>4}", major, minor),
        _ => node.size().to_string(),
    };
    write!(out, "{} {:>5} {:>5} {:>9} {}", node.filemode(), node.uid(), node.gid(), size, name)?;
    if let Ok(target) = node.readlink() {
        write!(out, " -> {}", target)?;
    }
    writeln!(out)
}

fn cmd_ls<R: Read + Seek>(sqfs: &SquashFS<R>, args: &LsArgs) -> anyhow::Result<()> {
    let paths = if args.files.is_empty() { vec!["/".to_string()] } else { args.files.clone() };
    let mut stdout = io::stdout().lock();
    let mut failed = false;

    // Non-directories named directly come first, then each directory's contents
    let mut dirs = Vec::new();
    for p in &paths {
        match sqfs.select(p) {
            Some(node) if node.is_dir() => dirs.push((p, node)),
            Some(node) => print_entry(&mut stdout, &node, p, args.long)?,
            None => {
                eprintln!("cannot access '{}': No such file or directory", p);
                failed = true;
            },
        }
    }
    for (i, (p, dir)) in dirs.iter().enumerate() {
        if paths.len() > 1 {
            if i > 0 {
                writeln!(stdout)?;
            }
            writeln!(stdout, "{}:", p)?;
        }
        for child in dir.children() {
            print_entry(&mut stdout, &child, child.name(), args.long)?;
        }
    }
    if failed {
        bail!("some paths could not be listed");
    }
    Ok(())
}

fn cmd_cat<R: Read + Seek>(sqfs: &SquashFS<R>, args: &CatArgs) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    for p in &args.files {
        let node = lookup(sqfs, p)?;
        let mut reader = node.open().with_context(|| format!("cannot read '{}'", p))?;
        io::copy(&mut reader, &mut stdout).with_context(|| format!("reading '{}'", p))?;
    }
    Ok(())
}

fn extract_node<R: Read + Seek>(node: &Node<'_, R>, dest: &Path) -> anyhow::Result<()> {
    let target = dest.join(node.path().trim_start_matches('/'));
    match node.file_type() {
        FileType::Directory => {
            fs::create_dir_all(&target).with_context(|| format!("creating {}", target.display()))?;
        },
        FileType::File => {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target).with_context(|| format!("creating {}", target.display()))?;
            io::copy(&mut node.open()?, &mut out).with_context(|| format!("writing {}", target.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&target, fs::Permissions::from_mode(node.mode() & 0o7777))?;
            }
        },
        #[cfg(unix)]
        FileType::Symlink => {
            if target.symlink_metadata().is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(node.readlink()?, &target)
                .with_context(|| format!("linking {}", target.display()))?;
        },
        other => warn!("skipping {} ({:?})", node.path(), other),
    }
    Ok(())
}

fn cmd_extract<R: Read + Seek>(sqfs: &SquashFS<R>, args: &ExtractArgs) -> anyhow::Result<()> {
    let paths = if args.files.is_empty() { vec!["/".to_string()] } else { args.files.clone() };
    fs::create_dir_all(&args.dir).with_context(|| format!("creating {}", args.dir.display()))?;
    let mut count = 0;
    for p in &paths {
        for node in lookup(sqfs, p)?.walk() {
            extract_node(&node, &args.dir)?;
            count += 1;
        }
    }
    eprintln!("{} inodes written to {}", count, args.dir.display());
    Ok(())
}

fn cmd_find<R: Read + Seek>(sqfs: &SquashFS<R>, args: &FindArgs) -> anyhow::Result<()> {
    let mut stdout = io::stdout().lock();
    let mut found = false;
    for node in sqfs.walk().filter(|n| n.name() == args.name) {
        writeln!(stdout, "{}", node.path())?;
        found = true;
    }
    if !found {
        bail!("no entry named '{}'", args.name);
    }
    Ok(())
}
