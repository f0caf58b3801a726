//! Viewer Emitter: renders the session's `session.jsonl` into a standalone
//! HTML artifact, once, at finalization. Never fatal — a renderer failure is
//! logged and the session still completes.

use std::path::Path;

use tokio::process::Command;

/// Invoke the configured renderer command. Failure (missing binary,
/// non-zero exit) is reported back as `Err` for the caller to log as a
/// warning; it never propagates as a fatal error.
pub async fn render(
    renderer_command: &str,
    jsonl_path: &Path,
    output_html_path: &Path,
) -> Result<(), String> {
    let output = Command::new(renderer_command)
        .arg(jsonl_path)
        .arg(output_html_path)
        .arg("--template")
        .arg("default")
        .output()
        .await
        .map_err(|e| format!("failed to launch renderer {renderer_command:?}: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "renderer {renderer_command:?} exited with {:?}: {}",
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_renderer_binary_reports_error_not_panic() {
        let result = render(
            "definitely-not-a-real-renderer-xyz",
            Path::new("/tmp/does-not-matter.jsonl"),
            Path::new("/tmp/does-not-matter.html"),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn successful_renderer_invocation_reports_ok() {
        // `true` ignores its arguments and exits 0 on every POSIX system.
        let result = render(
            "true",
            Path::new("/tmp/does-not-matter.jsonl"),
            Path::new("/tmp/does-not-matter.html"),
        )
        .await;
        assert!(result.is_ok());
    }
}
