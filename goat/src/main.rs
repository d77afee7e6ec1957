#[tokio::main]
async fn main() -> eyre::Result<()> {
    goat::App::new().run().await
}
