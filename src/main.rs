mod args;

use anyhow::{anyhow, Context, Result};
use args::{Commands, CLI};
use clap::Parser;
use dotenv::dotenv;
use ethers::types::Address;
use relayer::*;
use std::fs;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = CLI::parse();
    match cli.command {
        Commands::Serve => run_server(RelayerConfig::from_env()?).await,
        Commands::Prove {
            eml,
            email,
            pattern,
            date,
            start,
            end,
            request_id,
            prover,
            verifier,
            proof_out,
        } => {
            let config = RelayerConfig::from_env()?;
            let raw = fs::read(&eml).with_context(|| format!("failed to read {}", eml.display()))?;
            let predicate = match (pattern, email) {
                (Some(pattern), _) => MatchPredicate::new(pattern)?,
                (None, Some(email)) => MatchPredicate::for_address(&email)?,
                (None, None) => return Err(anyhow!("either --email or --pattern is required")),
            };
            let predicate = match date {
                Some(date) => predicate.with_date(date)?,
                None => predicate,
            };
            let predicate = match (start, end) {
                (Some(start), Some(end)) => predicate.with_window(start, end)?,
                _ => predicate,
            };
            let prover = parse_address("--prover", prover)?;
            let verifier = parse_address("--verifier", verifier)?;
            let mut request = PipelineRequest::new(EmailMessage::new(raw), predicate)
                .with_contracts(prover, verifier);
            if let Some(id) = request_id {
                request = request.with_request_id(RequestId::new(id));
            }

            let pipeline = build_pipeline(&config)?;
            let verified = pipeline.run(request).await?;
            if let Some(path) = proof_out {
                fs::write(&path, serde_json::to_vec_pretty(&verified.proof_result)?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            println!("{}", serde_json::to_string_pretty(&verified)?);
            Ok(())
        }
        Commands::Canonicalize { eml, headers } => {
            let raw = fs::read(&eml).with_context(|| format!("failed to read {}", eml.display()))?;
            let canonicalizer = if headers.is_empty() {
                Canonicalizer::default()
            } else {
                Canonicalizer::new(headers)
            };
            let canonical = canonicalizer.canonicalize(EmailMessage::new(raw));
            print!("{}", String::from_utf8_lossy(canonical.as_bytes()));
            Ok(())
        }
    }
}

fn parse_address(flag: &str, value: Option<String>) -> Result<Option<Address>> {
    value
        .map(|value| value.parse().map_err(|e| anyhow!("{flag} {value:?}: {e}")))
        .transpose()
}
