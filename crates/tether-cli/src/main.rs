#[tokio::main]
async fn main() {
    // Errors were already displayed with their hints
    if tether_cli::run().await.is_err() {
        std::process::exit(1);
    }
}
