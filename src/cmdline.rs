use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about, version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand)]
pub enum SubCommand {
    Run(Run),
    Schema,
}

#[derive(Parser)]
pub struct Run {
    #[arg(short, long)]
    pub cert_path: String,
    #[arg(short, long)]
    pub key_path: String,
    #[arg(long, default_value = "0.0.0.0:8443")]
    pub listen_addr: String,
}
