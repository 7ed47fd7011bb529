use atlus_fs::{Archive, ConflictPolicy, PakArchive, PakVersion, Traversal};
use clap::{Args, ValueEnum};
use miette::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::info;

use super::{check_target, collect_files, extract, read_file, ExtractArgs, ListArgs, PackArgs};

#[derive(clap::Subcommand)]
pub enum PakCommands {
    /// List the files of a PAK file
    List(ListArgs),
    /// Extract a PAK file into a directory
    Extract(ExtractArgs),
    /// Pack a directory into a PAK file
    Pack(PakPackArgs),
}

impl PakCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            PakCommands::List(args) => list(args),
            PakCommands::Extract(args) => {
                let pak = PakArchive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                extract(&pak, args, str::to_owned)
            }
            PakCommands::Pack(args) => args.handle(),
        }
    }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Layout {
    V1,
    V2,
    V2be,
    #[default]
    V3,
    V3be,
}

impl From<Layout> for PakVersion {
    fn from(value: Layout) -> Self {
        match value {
            Layout::V1 => PakVersion::V1,
            Layout::V2 => PakVersion::V2,
            Layout::V2be => PakVersion::V2Be,
            Layout::V3 => PakVersion::V3,
            Layout::V3be => PakVersion::V3Be,
        }
    }
}

#[derive(Args)]
pub struct PakPackArgs {
    #[command(flatten)]
    pack: PackArgs,

    /// Layout of the written file
    #[arg(long, value_enum, default_value_t)]
    layout: Layout,
}

impl PakPackArgs {
    fn handle(&self) -> Result<()> {
        let PackArgs {
            directory,
            file,
            overwrite,
        } = &self.pack;
        check_target(file, *overwrite)?;

        let mut pak = PakArchive::new(self.layout.into());
        for (name, path) in collect_files(directory)? {
            info!("adding {name}");
            pak.add_file(&name, read_file(&path)?.into(), ConflictPolicy::ThrowError)
                .context(format!("adding {}", path.display()))?;
        }

        pak.save_to_path(file)
            .context(format!("saving {}", file.display()))?;
        info!("wrote {} files to {}", pak.len(), file.display());
        Ok(())
    }
}

fn list(args: &ListArgs) -> Result<()> {
    let pak = PakArchive::load(&args.file).context(format!("path: {}", args.file.display()))?;
    println!(
        "{} {}",
        args.file.display(),
        pak.version().if_supports_color(Stream::Stdout, |v| v.cyan())
    );

    for name in pak.entries(Traversal::TopLevel) {
        let info = pak.info(&name)?;
        println!(
            "{:>10}  {}",
            info.size.if_supports_color(Stream::Stdout, |s| s.dimmed()),
            info.name
        );
    }
    Ok(())
}
