#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    weld_docs_server::run().await
}
