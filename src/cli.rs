use std::path::PathBuf;

use clap::Parser;

/// Issue a batch of backend requests through rotating proxies
#[derive(Debug, Parser)]
#[command(name = "rota-batch", version, about)]
pub struct Cli {
    /// File with one request payload per line
    #[arg(long = "input-file", alias = "input_file", value_name = "PATH")]
    pub input_file: PathBuf,

    /// File with one proxy address per line
    #[arg(long = "proxies-file", alias = "proxies_file", value_name = "PATH")]
    pub proxies_file: PathBuf,

    /// File successful results are appended to
    #[arg(long = "output-file", alias = "output_file", value_name = "PATH")]
    pub output_file: PathBuf,
}
