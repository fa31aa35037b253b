#[tokio::main]
async fn main() {
    if let Err(e) = gantry::run().await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
