mod channel;
mod connectivity;
mod dispatch;
mod flash;
mod net;
mod ota;
mod platform;
mod runtime;
mod sim;
mod store;
#[cfg(test)]
mod testutil;
mod update;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    runtime::run()
}
