use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const WORKSPACE_CRATES: &[&str] = &["rag", "rag_core", "rag_config", "rag_providers"];

/// Install a `fmt` subscriber filtered to the workspace crates.
///
/// `RUST_LOG` is honoured for everything else. Returns false if a global
/// subscriber was already set, in which case nothing changes.
pub fn init_logging(verbose: bool) -> bool {
    let level = if verbose { "debug" } else { "info" };

    let mut filter = EnvFilter::from_default_env();
    for krate in WORKSPACE_CRATES {
        if let Ok(directive) = format!("{}={}", krate, level).parse() {
            filter = filter.add_directive(directive);
        }
    }
    // reqwest/hyper connection chatter drowns out request-level logs
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}
