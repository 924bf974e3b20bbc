use sentinel::cli::CliArgs;
use sentinel::Application;
use tracing::error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = CliArgs::parse();

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("❌ Failed to start application: {:?}", e);
            std::process::exit(1);
        }
    }
}
