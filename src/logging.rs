use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber. `RUST_LOG` overrides the default filter.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "gemmis=debug" } else { "gemmis=warn" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
