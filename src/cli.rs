use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coredump-monitor")]
#[command(about = "Milvus coredump collection and diagnostics for Kubernetes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity, permissions and local paths
    Check {
        #[arg(long, default_value = "/etc/coredump-monitor/config.yaml")]
        config: String,
    },

    /// Run the per-node agent pipeline
    Agent {
        #[arg(long, default_value = "/etc/coredump-monitor/config.yaml")]
        config: String,
    },

    /// Run the central arbitration controller
    Controller {
        #[arg(long, default_value = "/etc/coredump-monitor/config.yaml")]
        config: String,
    },
}
