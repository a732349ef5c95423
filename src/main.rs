#[tokio::main]
async fn main() -> anyhow::Result<()> {
    worklens_lib::run().await
}
