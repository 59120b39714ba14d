use coredump_monitor::server::VersionInfo;

pub fn run() -> anyhow::Result<()> {
    let info = VersionInfo::current();
    println!("coredump-monitor {}", info.version);
    println!("  build time: {}", info.build_time);
    println!("  git commit: {}", info.git_commit);
    Ok(())
}
