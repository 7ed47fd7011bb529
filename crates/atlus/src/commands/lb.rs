use std::path::Path;

use atlus_fs::{lb::LbEntryOptions, Archive, ConflictPolicy, LbArchive, Traversal};
use clap::Args;
use itertools::Itertools;
use miette::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::{info, warn};

use super::{
    check_target, collect_files, extract, handle_from_name, read_file, ExtractArgs, ListArgs,
    PackArgs,
};

#[derive(clap::Subcommand)]
pub enum LbCommands {
    /// List the files of an LB file
    List(ListArgs),
    /// Extract and decompress an LB file into a directory of numbered files
    Extract(ExtractArgs),
    /// Pack a directory of numbered files into an LB file
    Pack(LbPackArgs),
}

impl LbCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            LbCommands::List(args) => list(args),
            LbCommands::Extract(args) => {
                let lb = LbArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                extract(&lb, args, |handle| {
                    let extension = lb
                        .info(handle)
                        .map(|info| info.extension.to_ascii_lowercase())
                        .unwrap_or_default();
                    if extension.is_empty() {
                        format!("{handle:04}.bin")
                    } else {
                        format!("{handle:04}.{extension}")
                    }
                })
            }
            LbCommands::Pack(args) => args.handle(),
        }
    }
}

#[derive(Args)]
pub struct LbPackArgs {
    #[command(flatten)]
    pack: PackArgs,

    /// Compress every file
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// Type tag written for every file
    #[arg(long, value_name = "TYPE")]
    kind: Option<u8>,
}

impl LbPackArgs {
    fn handle(&self) -> Result<()> {
        let PackArgs {
            directory,
            file,
            overwrite,
        } = &self.pack;
        check_target(file, *overwrite)?;

        let mut lb = LbArchive::new();
        for (name, path) in collect_files(directory)? {
            let Some(handle) = handle_from_name(&name) else {
                warn!("skipping {name}, its name is not a number");
                continue;
            };
            let options = LbEntryOptions::builder()
                .maybe_kind(self.kind)
                .maybe_extension(
                    Path::new(&name)
                        .extension()
                        .and_then(|extension| extension.to_str())
                        .filter(|extension| *extension != "bin")
                        .map(str::to_owned),
                )
                .compress(self.compress)
                .build();

            lb.add_file_with(handle, read_file(&path)?.into(), ConflictPolicy::ThrowError, options)
                .context(format!("adding {}", path.display()))?;
        }

        lb.save_to_path(file)
            .context(format!("saving {}", file.display()))?;
        info!("wrote {} files to {}", lb.len(), file.display());
        Ok(())
    }
}

fn list(args: &ListArgs) -> Result<()> {
    let lb = LbArchive::load(&args.file).context(format!("path: {}", args.file.display()))?;

    for handle in lb.entries(Traversal::TopLevel) {
        let info = lb.info(&handle)?;
        let flags = [
            info.compressed.then_some("compressed"),
            (!info.extension.is_empty()).then_some(info.extension.as_str()),
        ]
        .into_iter()
        .flatten()
        .join(", ");

        println!(
            "{:>6}  type {:<3} user {:<6} {:>10}  {}",
            handle.if_supports_color(Stream::Stdout, |h| h.cyan()),
            info.kind,
            info.user_id,
            info.decompressed_len,
            flags.if_supports_color(Stream::Stdout, |f| f.dimmed())
        );
    }
    Ok(())
}
