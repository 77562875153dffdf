use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(name = "Email Proof Relayer", version = "0")]
#[command(disable_help_subcommand = true)]
pub struct CLI {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Serves proof requests over HTTP")]
    Serve,
    #[command(about = "Proves and verifies a single email")]
    Prove {
        #[arg(long)]
        eml: PathBuf,
        /// Address the email must contain. Ignored when --pattern is given.
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        pattern: Option<String>,
        /// e.g. "15 November 2024"
        #[arg(long)]
        date: Option<String>,
        #[arg(long, requires = "end")]
        start: Option<String>,
        #[arg(long, requires = "start")]
        end: Option<String>,
        #[arg(long)]
        request_id: Option<String>,
        /// Prover contract to call instead of PROVER_ADDRESS.
        #[arg(long)]
        prover: Option<String>,
        /// Verifier contract to call instead of VERIFIER_ADDRESS.
        #[arg(long)]
        verifier: Option<String>,
        /// Writes the proof result as JSON to this file.
        #[arg(long)]
        proof_out: Option<PathBuf>,
    },
    #[command(about = "Prints the canonical form of an email")]
    Canonicalize {
        #[arg(long)]
        eml: PathBuf,
        /// Headers to deduplicate, defaults to DKIM-Signature and Content-Type.
        #[arg(long = "header")]
        headers: Vec<String>,
    },
}
