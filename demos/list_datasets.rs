use anyhow::Result;
use dp_api_clients::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // RUST_LOG=dp_api_clients=debug shows every page as it is dispatched.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Configure the API via env vars or a `.dpapirc` file.
    let client = Client::from_env()?.with_progress(true);

    let datasets: Vec<Value> = client.get_datasets_in_batches()?;
    for dataset in &datasets {
        let id = dataset.get("id").and_then(Value::as_str).unwrap_or("(no id)");
        println!("{id}");
    }
    println!(
        "{} dataset(s), batch size {}, {} worker(s)",
        datasets.len(),
        client.batch_size(),
        client.max_workers()
    );
    Ok(())
}
