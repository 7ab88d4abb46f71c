use tokio::signal;

/// Resolves on the first ctrl-c. A second ctrl-c exits the process
/// immediately instead of waiting for in-flight work.
pub async fn graceful_then_immediate() {
    if signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("Shutting down once running jobs wind down; a second ctrl-c exits right away.");
    tokio::spawn(async {
        if signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
}
