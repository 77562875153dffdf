pub mod abi;
pub mod canonicalizer;
pub mod chain_client;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod predicate;
pub mod preverifier;
pub mod proof_job;
pub mod prover;
pub mod retry;
pub mod server;
pub mod strings;
pub mod verification;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub use canonicalizer::*;
pub use chain_client::*;
pub use checkpoint::*;
pub use config::*;
pub use error::*;
pub use pipeline::*;
pub use predicate::*;
pub use preverifier::*;
pub use prover::*;
pub use retry::*;

/// Wires the default collaborators from `config`.
pub fn build_pipeline(config: &RelayerConfig) -> Result<EmailPipeline> {
    let preverifier: Arc<dyn Preverifier> = if config.resolve_dkim_keys {
        Arc::new(MailPreverifier::from_system_conf()?)
    } else {
        Arc::new(MailPreverifier::offline())
    };
    let prover = HttpProver::construct(&config.prover_url)?;
    let chain = EthersClient::construct(
        &config.private_key_hex,
        &config.rpc_url,
        config.pipeline.chain_id,
    )?;
    let store = SledCheckpointStore::open(&config.checkpoint_dir)?;
    info!(
        signer = ?chain.signer_address(),
        checkpoints = %config.checkpoint_dir.display(),
        "pipeline ready"
    );
    Ok(EmailPipeline::new(
        config.pipeline.clone(),
        preverifier,
        Arc::new(prover),
        Arc::new(chain),
        Arc::new(store),
    ))
}

pub async fn run_server(config: RelayerConfig) -> Result<()> {
    let pipeline = build_pipeline(&config)?;
    let app = server::router(pipeline, config.server.max_upload_bytes);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("listening on {}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("http server stopped")
}
