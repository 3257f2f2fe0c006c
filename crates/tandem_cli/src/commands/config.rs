//! Config command implementation.

use tandem_engine::ReplicationConfig;

/// Runs the config command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ReplicationConfig::from_env()?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => print_text_output(&config),
    }
    Ok(())
}

fn print_text_output(config: &ReplicationConfig) {
    println!("Target URI:        {}", config.target_uri);
    println!("Enabled:           {}", config.enabled);
    println!("Pool size:         {}", config.pool_size);
    println!("Connect timeout:   {:?}", config.connect_timeout);
    println!("Statement timeout: {:?}", config.statement_timeout);
    println!("Dispatch:          {:?}", config.dispatch);
    println!("Retry attempts:    {}", config.retry.max_attempts);
    println!("Retry base delay:  {:?}", config.retry.base_delay);
    println!("Retry backoff:     {:?}", config.retry.backoff);
    match &config.failure_log_path {
        Some(path) => println!("Failure log:       {}", path.display()),
        None => println!("Failure log:       (tracing only)"),
    }
    println!("Operation TTL:     {:?}", config.operation_ttl);
}
