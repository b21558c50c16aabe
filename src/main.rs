use schueco_bridge::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    schueco_bridge::app(Options::new()).await
}
