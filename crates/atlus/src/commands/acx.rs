use atlus_fs::{AcxArchive, Archive, ConflictPolicy, Traversal};
use miette::{miette, Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::{info, warn};

use super::{
    check_target, collect_files, extract, handle_from_name, read_file, ExtractArgs, ListArgs,
    PackArgs,
};

#[derive(clap::Subcommand)]
pub enum AcxCommands {
    /// List the files of an ACX file
    List(ListArgs),
    /// Extract an ACX file into a directory of numbered files
    Extract(ExtractArgs),
    /// Pack a directory of numbered files into an ACX file
    Pack(PackArgs),
}

impl AcxCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            AcxCommands::List(args) => {
                let acx = AcxArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                for handle in acx.entries(Traversal::TopLevel) {
                    println!(
                        "{:>6}  {}",
                        handle.if_supports_color(Stream::Stdout, |h| h.cyan()),
                        acx.info(&handle)?.size
                    );
                }
                Ok(())
            }
            AcxCommands::Extract(args) => {
                let acx = AcxArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                extract(&acx, args, |handle| format!("{handle:04}.bin"))
            }
            AcxCommands::Pack(args) => pack(args),
        }
    }
}

fn pack(args: &PackArgs) -> Result<()> {
    check_target(&args.file, args.overwrite)?;

    let mut acx = AcxArchive::new();
    for (name, path) in collect_files(&args.directory)? {
        let Some(handle) = handle_from_name(&name) else {
            warn!("skipping {name}, its name is not a number");
            continue;
        };
        acx.add_file(&handle, read_file(&path)?.into(), ConflictPolicy::ThrowError)
            .context(format!("adding {}", path.display()))?;
    }

    // handles are written in order, a gap would renumber the files after it
    if let Some(missing) = (0..acx.len()).find(|handle| !acx.exists(handle)) {
        return Err(miette!("no file for entry {missing}"));
    }

    acx.save_to_path(&args.file)
        .context(format!("saving {}", args.file.display()))?;
    info!("wrote {} files to {}", acx.len(), args.file.display());
    Ok(())
}
