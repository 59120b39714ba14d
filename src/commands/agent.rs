use std::path::Path;

use anyhow::Result;

use coredump_monitor::config::Config;
use coredump_monitor::pipeline;

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(Path::new(config_path))?;
    super::init_tracing(&config.agent.log_level);

    println!("Starting coredump-monitor agent...\n");
    println!("  Node ........................ {}", config.agent.node_name);
    println!("  Namespaces .................. {}", config.discovery.namespaces.join(", "));
    println!("  Coredump path ............... {}", config.collector.coredump_path);
    println!("  Host coredump path .......... {}", config.collector.host_coredump_path);
    println!("  Database .................... {}", config.database.path);
    println!(
        "  Controller .................. {}",
        if config.controller.enabled {
            config.controller.url.as_str()
        } else {
            "disabled"
        }
    );
    println!(
        "  Cleaner ..................... {}",
        if config.cleaner.enabled { "enabled" } else { "disabled" }
    );
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!("    GET /readyz ............... Readiness probe (503 until stages start, then 200)");
    println!("    GET /version .............. Build information");
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Agent running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    pipeline::run_agent(config).await?;

    println!("Agent stopped.");
    Ok(())
}
