#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenvy::dotenv().ok();
    std::process::exit(courier_cli::run().await);
}
