use atlus_fs::{Archive, ConflictPolicy, Dds3Archive, Traversal};
use miette::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use tracing::info;

use super::{check_target, collect_files, extract, read_file, ExtractArgs, ListArgs, PackArgs};

#[derive(clap::Subcommand)]
pub enum Dds3Commands {
    /// Print the directory tree of a DDT and IMG pair
    List(ListArgs),
    /// Extract a DDT and IMG pair into a directory
    Extract(ExtractArgs),
    /// Pack a directory into a DDT and IMG pair named after the target
    Pack(PackArgs),
}

impl Dds3Commands {
    pub fn handle(&self) -> Result<()> {
        match self {
            Dds3Commands::List(args) => {
                let dds3 = Dds3Archive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;

                for path in dds3.entries(Traversal::Recursive) {
                    let depth = path.matches('/').count();
                    let name = path.rsplit('/').next().unwrap_or_default();
                    let info = dds3.info(&path)?;
                    if info.is_directory {
                        println!(
                            "{:indent$}{}/",
                            "",
                            name.if_supports_color(Stream::Stdout, |n| n.blue()),
                            indent = depth * 2
                        );
                    } else {
                        println!(
                            "{:indent$}{} {}",
                            "",
                            name,
                            info.size.if_supports_color(Stream::Stdout, |s| s.dimmed()),
                            indent = depth * 2
                        );
                    }
                }
                Ok(())
            }
            Dds3Commands::Extract(args) => {
                let dds3 = Dds3Archive::load(&args.file)
                    .context(format!("path: {}", args.file.display()))?;
                extract(&dds3, args, str::to_owned)
            }
            Dds3Commands::Pack(args) => pack(args),
        }
    }
}

fn pack(args: &PackArgs) -> Result<()> {
    let (ddt, img) = (args.file.with_extension("ddt"), args.file.with_extension("img"));
    check_target(&ddt, args.overwrite)?;
    check_target(&img, args.overwrite)?;

    let mut dds3 = Dds3Archive::new();
    for (name, path) in collect_files(&args.directory)? {
        info!("adding {name}");
        dds3.add_file(&name, read_file(&path)?.into(), ConflictPolicy::ThrowError)
            .context(format!("adding {}", path.display()))?;
    }

    dds3.save_to_path(&args.file)
        .context(format!("saving {} and {}", ddt.display(), img.display()))?;
    info!("wrote {} files to {}", dds3.len(), img.display());
    Ok(())
}
