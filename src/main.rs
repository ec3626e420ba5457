#[tokio::main]
async fn main() {
    std::process::exit(sheet_publisher_lib::run().await)
}
