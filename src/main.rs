use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match tracewrap::run().await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("tracewrap: {e:#}");
            ExitCode::FAILURE
        }
    }
}
