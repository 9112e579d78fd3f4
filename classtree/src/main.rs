// classtree - JVM class file <-> XML class tree tool
//
// Disassembles class files into XML class trees, assembles trees back into
// verified class files, and runs decorator distillation over a set of
// classes.
//
// Usage:
//   classtree disassemble Foo.class -o Foo.xml
//   classtree assemble Foo.xml -o Foo.class
//   classtree distill A.class B.class Main.class -o distilled --format class

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use classtree::{CallSiteMatch, DistillOptions, Distiller, Event, Representation};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "classtree")]
#[command(about = "JVM class file <-> XML class tree tool")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Class file to XML
    Disassemble {
        /// Input class file
        input: PathBuf,

        /// Output XML file
        #[arg(short, long, default_value = "output.xml")]
        output: PathBuf,
    },

    /// XML to class file
    Assemble {
        /// Input XML class tree
        input: PathBuf,

        /// Output class file
        #[arg(short, long, default_value = "output.class")]
        output: PathBuf,
    },

    /// Merge a decorator with the class it decorates
    Distill {
        /// Input classes (.class or .xml)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "distilled")]
        output: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value = "xml")]
        format: Format,

        /// Replace every virtual call in decorator methods (legacy matching)
        #[arg(long)]
        any_virtual: bool,

        /// Timestamp for the combined class
        #[arg(long)]
        timestamp: Option<String>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Xml,
    Class,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match args.command {
        Command::Disassemble { input, output } => {
            let repr = Representation::open(&input).context("Failed to open input")?;
            let xml = repr.to_xml().context("Failed to disassemble")?;
            std::fs::write(&output, xml).context("Failed to write output")?;
            if args.verbose {
                eprintln!("{} -> {}", input.display(), output.display());
            }
        }
        Command::Assemble { input, output } => {
            let repr = Representation::open(&input).context("Failed to open input")?;
            let bytes = repr.bytes().context("Failed to assemble")?;
            std::fs::write(&output, bytes).context("Failed to write output")?;
            if args.verbose {
                eprintln!(
                    "{} -> {} ({} bytes)",
                    input.display(),
                    output.display(),
                    bytes.len()
                );
            }
        }
        Command::Distill {
            inputs,
            output,
            format,
            any_virtual,
            timestamp,
        } => {
            let mut representations = Vec::with_capacity(inputs.len());
            for input in &inputs {
                let repr = Representation::open(input)
                    .with_context(|| format!("Failed to open {}", input.display()))?;
                representations.push(repr);
            }

            let options = DistillOptions {
                call_sites: if any_virtual {
                    CallSiteMatch::AnyVirtual
                } else {
                    CallSiteMatch::Target
                },
                timestamp,
            };
            let distilled = Distiller::new(options)
                .apply(representations)
                .context("Distillation failed")?;

            std::fs::create_dir_all(&output).context("Failed to create output directory")?;
            for repr in &distilled.representations {
                let path = write_representation(repr, &output, format)?;
                if args.verbose {
                    eprintln!("Wrote: {}", path.display());
                }
            }

            if args.verbose {
                for event in &distilled.events {
                    match event {
                        Event::Combined { combined, .. } => eprintln!("  Combined: {}", combined),
                        Event::Spliced {
                            class,
                            method,
                            pattern,
                            position,
                        } => eprintln!("  Spliced {} in {}.{} at {}", pattern, class, method, position),
                        Event::Inlined {
                            method,
                            inlined,
                            calls,
                        } => eprintln!("  Inlined {} into {} ({} calls)", inlined, method, calls),
                    }
                }
            }
        }
    }

    Ok(())
}

/// Write one class under `dir`, named after its simple class name
fn write_representation(repr: &Representation, dir: &Path, format: Format) -> Result<PathBuf> {
    let name = repr.name().context("Failed to decode class")?;
    let simple = name.rsplit('/').next().unwrap_or(name);
    let path = match format {
        Format::Xml => {
            let path = dir.join(format!("{}.xml", simple));
            std::fs::write(&path, repr.to_xml()?).context("Failed to write output")?;
            path
        }
        Format::Class => {
            let path = dir.join(format!("{}.class", simple));
            let bytes = repr
                .bytes()
                .with_context(|| format!("Failed to assemble {}", name))?;
            std::fs::write(&path, bytes).context("Failed to write output")?;
            path
        }
    };
    Ok(path)
}
