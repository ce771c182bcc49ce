//! zkvault-backend
//!
//! HTTP service for proof-gated vault calls and the vault event ledger.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    zkvault_backend::main_entry::run_server().await
}
