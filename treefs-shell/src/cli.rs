use clap::Parser;
use std::path::PathBuf;

/// Operate a treefs disk image. Commands given together run in the order
/// they are listed below, format first.
#[derive(Parser)]
#[command(name = "treefs-shell")]
pub struct Cli {
    /// Disk image backing the file system
    #[arg(long, default_value = "DISK")]
    pub disk: PathBuf,

    /// Total sectors on the disk
    #[arg(long, default_value_t = 1024)]
    pub sectors: usize,

    /// Format the disk before anything else
    #[arg(short = 'f')]
    pub format: bool,

    /// Create a directory
    #[arg(long, value_name = "PATH")]
    pub mkdir: Option<String>,

    /// Copy a host file onto the disk (size is fixed at creation)
    #[arg(long, num_args = 2, value_names = ["HOST", "PATH"])]
    pub cp: Option<Vec<String>>,

    /// List a directory
    #[arg(short = 'l', value_name = "PATH")]
    pub list: Option<String>,

    /// List a directory tree recursively
    #[arg(long = "lr", value_name = "PATH")]
    pub list_recursive: Option<String>,

    /// Remove a file
    #[arg(short = 'r', value_name = "PATH")]
    pub remove: Option<String>,

    /// Remove a file or a whole directory tree
    #[arg(long = "rr", value_name = "PATH")]
    pub remove_recursive: Option<String>,
}
