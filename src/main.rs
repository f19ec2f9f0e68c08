#[tokio::main]
async fn main() -> anyhow::Result<()> {
    emas_backoffice_lib::run().await
}
