use std::path::PathBuf;

use clap::Parser;

/// Downloads the single file described by a .torrent metainfo file.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the .torrent metainfo file.
    pub torrent_file: PathBuf,

    /// Path the downloaded content is written to.
    pub output_file: PathBuf,
}
