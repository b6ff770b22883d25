use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, registry};
use tracing_tree::HierarchicalLayer;
use tracing_tree::time::Uptime;

const DEFAULT_FILTER: &str = "hud_service=info";

/// Installs the global subscriber. `RUST_LOG` overrides `verbose`.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "hud_service=debug" } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let tree = HierarchicalLayer::default()
        .with_indent_amount(2)
        .with_targets(true)
        .with_bracketed_fields(true)
        .with_deferred_spans(true)
        .with_timer(Uptime::default());

    // a second init (tests) is fine
    _ = registry().with(filter).with(tree).try_init();
}
