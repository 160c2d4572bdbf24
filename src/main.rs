#[tokio::main]
async fn main() -> anyhow::Result<()> {
    profd::init_log()?;

    let config = profd::config::load()?;
    profd::run(config).await
}
