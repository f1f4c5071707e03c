use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image path
    #[arg(long, short)]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a fresh file system in the image
    Format,
    /// Copy host files into the image's root directory
    Copy { files: Vec<PathBuf> },
    /// List the root directory
    Ls,
    /// Print a file's contents
    Cat { name: String },
    /// Run the consistency check
    Check,
}
