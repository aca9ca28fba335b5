use claimgate_gateway::main_entry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    main_entry::run_server().await
}
