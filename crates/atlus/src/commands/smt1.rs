use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use atlus_fs::{smt1::EXECUTABLE_NAME, Archive, ConflictPolicy, Smt1Archive, Traversal};
use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::{info, warn};

use super::{collect_files, extract, handle_from_name, read_file, ExtractArgs};

#[derive(clap::Subcommand)]
pub enum Smt1Commands {
    /// List the files of a DATA.BIN
    List(Smt1ListArgs),
    /// Extract a DATA.BIN into a directory of numbered files
    Extract(Smt1ExtractArgs),
    /// Replace files of a DATA.BIN in place, updating the table in the executable
    Replace(Smt1ReplaceArgs),
}

impl Smt1Commands {
    pub fn handle(&self) -> Result<()> {
        match self {
            Smt1Commands::List(args) => args.handle(),
            Smt1Commands::Extract(args) => {
                let smt1 = load(&args.extract.file, args.executable.as_deref())?;
                extract(&smt1, &args.extract, |handle| format!("{handle:04}.bin"))
            }
            Smt1Commands::Replace(args) => args.handle(),
        }
    }
}

#[derive(Args)]
pub struct Smt1ListArgs {
    /// An input DATA.BIN
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// The game executable, SLPS_031.70 beside the input if not given
    #[arg(short, long, value_name = "FILE")]
    executable: Option<PathBuf>,
}

impl Smt1ListArgs {
    fn handle(&self) -> Result<()> {
        let smt1 = load(&self.file, self.executable.as_deref())?;
        for handle in smt1.entries(Traversal::TopLevel) {
            println!(
                "{:>6}  {}",
                handle.if_supports_color(Stream::Stdout, |h| h.cyan()),
                smt1.info(&handle)?.size
            );
        }
        Ok(())
    }
}

#[derive(Args)]
pub struct Smt1ExtractArgs {
    #[command(flatten)]
    extract: ExtractArgs,

    /// The game executable, SLPS_031.70 beside the input if not given
    #[arg(short, long, value_name = "FILE")]
    executable: Option<PathBuf>,
}

#[derive(Args)]
pub struct Smt1ReplaceArgs {
    /// The DATA.BIN to update
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// The game executable, SLPS_031.70 beside the input if not given
    #[arg(short, long, value_name = "FILE")]
    executable: Option<PathBuf>,

    /// A directory of replacement files named by their index
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,
}

impl Smt1ReplaceArgs {
    fn handle(&self) -> Result<()> {
        let executable = self
            .executable
            .clone()
            .unwrap_or_else(|| self.file.with_file_name(EXECUTABLE_NAME));

        let mut smt1 = {
            let mut table = File::open(&executable)
                .into_diagnostic()
                .context(format!("opening {}", executable.display()))?;
            Smt1Archive::from_readers(Cursor::new(read_file(&self.file)?), &mut table)?
        };

        let mut replaced = 0;
        for (name, path) in collect_files(&self.directory)? {
            match handle_from_name(&name) {
                Some(handle) if smt1.exists(&handle) => {
                    info!("replacing {handle} with {name}");
                    smt1.add_file(&handle, read_file(&path)?.into(), ConflictPolicy::Replace)?;
                    replaced += 1;
                }
                _ => warn!("skipping {name}, it does not name a file of the archive"),
            }
        }

        smt1.save_to_paths(&self.file, Some(&executable))
            .context(format!("saving {}", self.file.display()))?;
        info!("replaced {replaced} files in {}", self.file.display());
        Ok(())
    }
}

fn load(file: &Path, executable: Option<&Path>) -> Result<Smt1Archive<File>> {
    let smt1 = match executable {
        Some(executable) => Smt1Archive::load_with_executable(file, executable),
        None => Smt1Archive::load(file),
    };
    smt1.context(format!("path: {}", file.display()))
}
