use std::path::Path;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::{Api, Client};

use coredump_monitor::config::Config;
use coredump_monitor::db::Database;

pub async fn run(config_path: &str) -> anyhow::Result<()> {
    println!("Running preflight checks...\n");

    // 1. Configuration file
    print!("  Configuration ............... ");
    let config = match Config::load(Path::new(config_path)) {
        Ok(config) => {
            println!("OK");
            config
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load config {config_path}: {e}");
        }
    };

    // 2. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 3. Verify actual cluster connectivity by fetching server version
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    }

    // 4. List pods permission in each configured namespace
    for namespace in &config.discovery.namespaces {
        print!("  List pods in {namespace:<12} ... ");
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        match pods.list(&ListParams::default().limit(1)).await {
            Ok(_) => println!("OK"),
            Err(e) => println!("FAIL ({})", e),
        }
    }

    // 5. List deployments permission (needed for operator cleanup)
    print!("  List deployments ............ ");
    let deployments: Api<Deployment> = Api::all(client.clone());
    match deployments.list(&ListParams::default().limit(1)).await {
        Ok(_) => println!("OK"),
        Err(e) => println!("FAIL ({})", e),
    }

    // 6. Coredump directory
    print!("  Coredump directory .......... ");
    let dump_dir = Path::new(&config.collector.coredump_path);
    if dump_dir.is_dir() {
        println!("OK ({})", dump_dir.display());
    } else {
        println!("FAIL (missing: {})", dump_dir.display());
    }

    // 7. Database
    print!("  Database .................... ");
    match Database::open(Path::new(&config.database.path)) {
        Ok(_) => println!("OK ({})", config.database.path),
        Err(e) => println!("FAIL ({})", e),
    }

    println!("\nAll checks completed.");
    Ok(())
}
