use atlus_fs::{Archive, ApakArchive, Traversal};
use miette::{Context, Result};
use owo_colors::{OwoColorize, Stream};

use super::{extract, ExtractArgs, ListArgs};

#[derive(clap::Subcommand)]
pub enum ApakCommands {
    /// List the files of an APAK file
    List(ListArgs),
    /// Extract an APAK file into a directory
    Extract(ExtractArgs),
}

impl ApakCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            ApakCommands::List(args) => {
                let apak = ApakArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                let endian = format!("{:?}", apak.endian());
                println!(
                    "{} {}",
                    args.file.display(),
                    endian.if_supports_color(Stream::Stdout, |e| e.cyan())
                );

                for name in apak.entries(Traversal::TopLevel) {
                    let record = apak.info(&name)?;
                    println!(
                        "{:>10}  {:08X}  {}",
                        record.size.if_supports_color(Stream::Stdout, |s| s.dimmed()),
                        record.hash,
                        name
                    );
                }
                Ok(())
            }
            ApakCommands::Extract(args) => {
                let apak = ApakArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                extract(&apak, args, str::to_owned)
            }
        }
    }
}
