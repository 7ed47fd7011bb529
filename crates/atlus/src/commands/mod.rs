pub mod acx;
pub mod apak;
pub mod dds3;
pub mod lb;
pub mod pak;
pub mod smt1;

use std::{
    borrow::Borrow,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use atlus_fs::{Archive, Traversal};
use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle PAK files
    Pak {
        #[command(subcommand)]
        command: pak::PakCommands,
    },
    /// Handle LB files
    Lb {
        #[command(subcommand)]
        command: lb::LbCommands,
    },
    /// Handle ACX files
    Acx {
        #[command(subcommand)]
        command: acx::AcxCommands,
    },
    /// Handle DDS3 file systems split into a DDT and IMG pair
    Dds3 {
        #[command(subcommand)]
        command: dds3::Dds3Commands,
    },
    /// Handle APAK files
    Apak {
        #[command(subcommand)]
        command: apak::ApakCommands,
    },
    /// Handle the DATA.BIN of Shin Megami Tensei
    Smt1 {
        #[command(subcommand)]
        command: smt1::Smt1Commands,
    },
}

impl Commands {
    pub fn handle(&self) -> Result<()> {
        match self {
            Commands::Pak { command } => command.handle(),
            Commands::Lb { command } => command.handle(),
            Commands::Acx { command } => command.handle(),
            Commands::Dds3 { command } => command.handle(),
            Commands::Apak { command } => command.handle(),
            Commands::Smt1 { command } => command.handle(),
        }
    }
}

#[derive(Args)]
pub struct ListArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

#[derive(Args)]
pub struct ExtractArgs {
    /// An input archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting files in the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target archive
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

/// Write every file of `archive` below `directory`, named by `name_of`.
pub(crate) fn extract<A, F>(archive: &A, args: &ExtractArgs, name_of: F) -> Result<()>
where
    A: Archive,
    F: Fn(&A::Handle) -> String,
{
    let mut count = 0;
    for owned in archive.files(Traversal::Recursive) {
        let handle: &A::Handle = owned.borrow();
        let path = output_path(&args.directory, &name_of(handle))?;
        info!("writing {}", path.display());

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .into_diagnostic()
                .context(format!("creating {}", parent.display()))?;
        }
        let mut out = create_file(&path, args.overwrite)?;
        let mut window = archive.open(handle)?;
        io::copy(&mut window, &mut out)
            .into_diagnostic()
            .context(format!("copying into {}", path.display()))?;
        count += 1;
    }

    info!("extracted {count} files from {}", args.file.display());
    Ok(())
}

/// Join an entry name onto `directory`, refusing names that climb out of it.
fn output_path(directory: &Path, name: &str) -> Result<PathBuf> {
    let mut path = directory.to_path_buf();
    for part in name.split(['/', '\\']).filter(|part| !part.is_empty()) {
        if part == ".." || part.contains(':') {
            return Err(miette!("refusing to extract {name} outside of the target"));
        }
        path.push(part);
    }
    Ok(path)
}

pub(crate) fn create_file(path: &Path, overwrite: bool) -> Result<File> {
    let file = if overwrite {
        File::create(path)
    } else {
        File::create_new(path)
    };
    file.into_diagnostic()
        .context(format!("creating {}", path.display()))
}

/// Fail early when saving would replace `path` without `--overwrite`.
pub(crate) fn check_target(path: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && path.exists() {
        return Err(miette!(
            help = "pass --overwrite to replace it",
            "{} already exists",
            path.display()
        ));
    }
    Ok(())
}

/// Every file below `directory` with its path relative to it, in name order.
pub(crate) fn collect_files(directory: &Path) -> Result<Vec<(String, PathBuf)>> {
    let files = WalkDir::new(directory)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_type().is_dir())
        .map(|entry| -> Result<(String, PathBuf)> {
            let name = entry.path().strip_prefix(directory).into_diagnostic()?;
            let name = name
                .to_str()
                .ok_or(miette!("unable to convert {} to a string", name.display()))?
                .replace('\\', "/");
            Ok((name, entry.into_path()))
        })
        .collect::<Result<Vec<_>>>()?;

    if files.is_empty() {
        return Err(miette!("{} is empty", directory.display()));
    }
    debug!(count = files.len(), "collected files");
    Ok(files)
}

pub(crate) fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .into_diagnostic()
        .context(format!("reading {}", path.display()))
}

/// Handle encoded in a file name such as `0012.bin`.
pub(crate) fn handle_from_name(name: &str) -> Option<usize> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    stem.parse().ok()
}
