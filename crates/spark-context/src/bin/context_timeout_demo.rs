//! 超时演示：50ms 超时的上下文与 100ms 的业务操作竞争，超时先到。
//!
//! ```text
//! RUST_LOG=spark_context=trace cargo run -p spark-context --features demo --bin context_timeout_demo
//! ```

use std::time::Duration;

use spark_context::{Context, TokioRuntime};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let runtime = TokioRuntime::new(tokio::runtime::Handle::current()).into_runtime();
    let (ctx, cancel) = runtime.with_timeout(&Context::background(), Duration::from_millis(50));

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(100)) => println!("didn't time out"),
        _ = ctx.done() => match ctx.cause() {
            Some(cause) => println!("timed out: {cause}"),
            None => println!("timed out"),
        },
    }

    cancel.cancel();
}
