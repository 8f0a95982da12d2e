use tracing_subscriber::EnvFilter;

/// Human-readable logs on a terminal, JSON lines otherwise. Logs go to
/// stderr so command output on stdout stays clean.
pub fn setup_logging() {
    let is_terminal = std::io::IsTerminal::is_terminal(&std::io::stderr());
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if is_terminal {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true)
            .init();
    }
    tracing::debug!("Logging initialized with level: {:?}", std::env::var("RUST_LOG"));
}
