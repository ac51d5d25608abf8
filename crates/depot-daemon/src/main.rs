use anyhow::Result;

use depot_daemon::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = telemetry::init("depot-daemon")?;
    depot_daemon::server::run().await
}
