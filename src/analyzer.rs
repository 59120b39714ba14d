use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::agent_client::ControllerClient;
use crate::config::AnalyzerConfig;
use crate::db::Database;
use crate::llm::LlmClient;
use crate::metrics;
use crate::model::{
    AnalysisEvent, AnalysisResults, CollectionEvent, CoredumpFile, CoredumpState,
};

/* ============================= CONSTANTS ============================= */

/// Hard cap on dumps handed to the debugger.
const MAX_ANALYZE_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Dumps older than this are not worth the debugger time.
const MAX_ANALYZE_AGE_HOURS: i64 = 24;

/// Batch script fed to the debugger on stdin. Section markers let the parser
/// split stdout without guessing at prompt boundaries.
const GDB_SCRIPT: &str = "set pagination off\n\
    echo =====BACKTRACE=====\\n\n\
    bt full\n\
    echo =====REGISTERS=====\\n\n\
    info registers\n\
    echo =====THREADS=====\\n\n\
    info threads\n\
    echo =====MEMORY=====\\n\n\
    info proc mappings\n\
    echo =====SHARED_LIBS=====\\n\n\
    info sharedlibrary\n\
    quit\n";

pub fn signal_name(signal: i32) -> &'static str {
    match signal {
        4 => "SIGILL",
        6 => "SIGABRT",
        7 => "SIGBUS",
        8 => "SIGFPE",
        11 => "SIGSEGV",
        _ => "UNKNOWN",
    }
}

fn reason_from_signal(signal: i32) -> String {
    match signal {
        11 => "Segmentation fault (SIGSEGV)".to_string(),
        6 => "Abort signal (SIGABRT)".to_string(),
        8 => "Floating point exception (SIGFPE)".to_string(),
        0 => "Unknown crash reason".to_string(),
        other => format!("Signal {} ({})", other, signal_name(other)),
    }
}

/* ============================= OUTPUT PARSING ============================= */

/// Split debugger stdout into its `=====NAME=====` delimited sections.
pub fn split_sections(output: &str) -> HashMap<String, String> {
    let mut sections: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;
    let mut buffer = String::new();

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.len() > 10 && trimmed.starts_with("=====") && trimmed.ends_with("=====") {
            if let Some(name) = current.take() {
                sections.insert(name, std::mem::take(&mut buffer));
            }
            current = Some(trimmed.trim_matches('=').to_string());
            continue;
        }
        if current.is_some() {
            buffer.push_str(line);
            buffer.push('\n');
        }
    }
    if let Some(name) = current {
        sections.insert(name, buffer);
    }
    sections
}

/// First hexadecimal literal (`0x...`) in the text.
pub fn first_hex_literal(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut i = 0;
    while let Some(offset) = text[i..].find("0x") {
        let start = i + offset;
        let mut end = start + 2;
        while end < bytes.len() && bytes[end].is_ascii_hexdigit() {
            end += 1;
        }
        if end > start + 2 {
            return Some(text[start..end].to_string());
        }
        i = start + 2;
    }
    None
}

/// Crash reason from the backtrace, first-match wins.
pub fn crash_reason_from_backtrace(backtrace: &str) -> String {
    const TABLE: [(&str, &str); 4] = [
        ("SIGSEGV", "Segmentation fault (SIGSEGV)"),
        ("SIGABRT", "Abort signal (SIGABRT)"),
        ("SIGFPE", "Floating point exception (SIGFPE)"),
        ("assert", "Assertion failure"),
    ];
    for (token, reason) in TABLE {
        if backtrace.contains(token) {
            return reason.to_string();
        }
    }
    "Unknown crash reason".to_string()
}

fn parse_registers(section: &str) -> HashMap<String, String> {
    let mut registers = HashMap::new();
    for line in section.lines() {
        let mut parts = line.split_whitespace();
        if let (Some(name), Some(value)) = (parts.next(), parts.next())
            && value.starts_with("0x")
        {
            registers.insert(name.to_string(), value.to_string());
        }
    }
    registers
}

fn parse_shared_libraries(section: &str) -> (Vec<String>, HashMap<String, String>) {
    let mut libraries = Vec::new();
    let mut versions = HashMap::new();
    for line in section.lines() {
        let Some(token) = line.split_whitespace().last() else {
            continue;
        };
        if !token.contains(".so") {
            continue;
        }
        let name = token.rsplit('/').next().unwrap_or(token).to_string();
        if let Some((base, version)) = name.split_once(".so.") {
            versions.insert(format!("{base}.so"), version.to_string());
        }
        libraries.push(token.to_string());
    }
    (libraries, versions)
}

fn parse_memory(section: &str) -> crate::model::MemorySummary {
    let mut summary = crate::model::MemorySummary::default();
    for line in section.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // mapping rows: start end size offset [perms] [objfile]
        if fields.len() < 3 || !fields[0].starts_with("0x") {
            continue;
        }
        let Some(size) = fields
            .get(2)
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        else {
            continue;
        };
        summary.virtual_kb += size / 1024;
        if line.contains("[heap]") {
            summary.heap_kb += size / 1024;
        }
        if line.contains("[stack]") {
            summary.stack_kb += size / 1024;
        }
    }
    summary
}

/// Full parse of a debugger run.
pub fn parse_gdb_output(output: &str) -> AnalysisResults {
    let sections = split_sections(output);
    let backtrace = sections.get("BACKTRACE").cloned().unwrap_or_default();
    let threads = sections.get("THREADS").map(String::as_str).unwrap_or("");
    let thread_count = threads
        .lines()
        .filter(|line| line.contains("Thread"))
        .count()
        .max(1) as u32;
    let (shared_libraries, library_versions) = sections
        .get("SHARED_LIBS")
        .map(|s| parse_shared_libraries(s))
        .unwrap_or_default();

    AnalysisResults {
        crash_reason: crash_reason_from_backtrace(&backtrace),
        crash_address: first_hex_literal(&backtrace).unwrap_or_default(),
        thread_count,
        registers: sections
            .get("REGISTERS")
            .map(|s| parse_registers(s))
            .unwrap_or_default(),
        memory: sections
            .get("MEMORY")
            .map(|s| parse_memory(s))
            .unwrap_or_default(),
        shared_libraries,
        library_versions,
        stack_trace: backtrace,
        ai: None,
    }
}

/// Minimal analysis when the debugger is disabled or failed: the signal
/// number plus whatever `file(1)` can tell us.
pub fn basic_analysis(signal: i32, file_output: &str) -> AnalysisResults {
    let signal = if signal != 0 {
        signal
    } else {
        parse_signal_from_file_output(file_output).unwrap_or(0)
    };
    AnalysisResults {
        crash_reason: reason_from_signal(signal),
        thread_count: 1,
        ..Default::default()
    }
}

/// `file(1)` prints `..., from 'milvus', ... signal: 11` for core files.
pub fn parse_signal_from_file_output(output: &str) -> Option<i32> {
    let idx = output.find("signal:")?;
    output[idx + "signal:".len()..]
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|digits| digits.parse().ok())
}

/* ============================= VALUE SCORING ============================= */

/// Per-dimension contributions, reconstructible from the analysis record
/// alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub crash_reason: f64,
    pub panic_keyword: f64,
    pub stack_trace: f64,
    pub threads: f64,
    pub pod_association: f64,
    pub signal: f64,
    pub file_size: f64,
    pub freshness: f64,
    pub total: f64,
}

/// The normative value formula. Pure in its inputs; `now` fixes the
/// freshness dimension at analysis time. AI enrichment never contributes.
pub fn compute_value_score(
    file: &CoredumpFile,
    analysis: &AnalysisResults,
    panic_keywords: &[String],
    now: DateTime<Utc>,
) -> ScoreBreakdown {
    let mut b = ScoreBreakdown {
        base: 4.0,
        ..Default::default()
    };

    if !analysis.crash_reason.is_empty() {
        b.crash_reason = 2.0;
    }
    let reason_lower = analysis.crash_reason.to_lowercase();
    if panic_keywords
        .iter()
        .any(|k| !k.is_empty() && reason_lower.contains(&k.to_lowercase()))
    {
        b.panic_keyword = 1.0;
    }
    if analysis.stack_trace.len() > 100 {
        b.stack_trace = 1.5;
    }
    if analysis.thread_count > 1 {
        b.threads = 0.5;
    }
    if file.has_pod_association() {
        b.pod_association = 1.0;
    }
    if matches!(file.signal, 11 | 6 | 8) {
        b.signal = 1.0;
    }
    if file.size > 100 * 1024 * 1024 {
        b.file_size = 0.5;
    }
    if now.signed_duration_since(file.mod_time) < chrono::Duration::hours(1) {
        b.freshness = 0.5;
    }

    let sum = b.base
        + b.crash_reason
        + b.panic_keyword
        + b.stack_trace
        + b.threads
        + b.pod_association
        + b.signal
        + b.file_size
        + b.freshness;
    b.total = sum.min(10.0);
    b
}

fn log_score_breakdown(file: &CoredumpFile, b: &ScoreBreakdown) {
    info!(
        path = %file.path,
        base = b.base,
        crash_reason = b.crash_reason,
        panic_keyword = b.panic_keyword,
        stack_trace = b.stack_trace,
        threads = b.threads,
        pod_association = b.pod_association,
        signal = b.signal,
        file_size = b.file_size,
        freshness = b.freshness,
        total = b.total,
        "value_score_computed"
    );
}

/* ============================= SKIP POLICY ============================= */

/// Returns the skip reason, if any. Skipped files never reach downstream
/// stages.
pub fn skip_reason(file: &CoredumpFile, config: &AnalyzerConfig, now: DateTime<Utc>) -> Option<String> {
    if let Some(container) = &file.container_name {
        for pattern in &config.ignore_patterns {
            if !pattern.is_empty() && container.contains(pattern) {
                return Some(format!("container matches ignore pattern {pattern:?}"));
            }
        }
    }
    if file.size > MAX_ANALYZE_SIZE {
        return Some(format!("file size {} exceeds 2GiB analysis cap", file.size));
    }
    if now.signed_duration_since(file.mod_time) > chrono::Duration::hours(MAX_ANALYZE_AGE_HOURS) {
        return Some("file older than 24h".to_string());
    }
    None
}

/* ============================= ANALYZER ============================= */

pub struct Analyzer {
    config: AnalyzerConfig,
    db: Arc<Database>,
    node_name: String,
    llm: Option<LlmClient>,
    controller: Option<Arc<ControllerClient>>,
    events_tx: mpsc::Sender<AnalysisEvent>,
}

impl Analyzer {
    pub fn new(
        config: AnalyzerConfig,
        db: Arc<Database>,
        node_name: String,
        controller: Option<Arc<ControllerClient>>,
        events_tx: mpsc::Sender<AnalysisEvent>,
    ) -> Analyzer {
        let llm = if config.ai_analysis.enabled {
            match LlmClient::new(&config.ai_analysis) {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!(error = %e, "llm_client_init_failed");
                    None
                }
            }
        } else {
            None
        };
        Analyzer {
            config,
            db,
            node_name,
            llm,
            controller,
            events_tx,
        }
    }

    /// Consume collection events; each file is analyzed in its own task with
    /// no cross-file ordering. The debugger timeout bounds task lifetime.
    pub async fn run(
        self: Arc<Self>,
        mut collection_rx: mpsc::Receiver<CollectionEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("analyzer_stopped");
                    return;
                }
                event = collection_rx.recv() => {
                    match event {
                        Some(CollectionEvent::FileDiscovered(file))
                        | Some(CollectionEvent::FileProcessed(file)) => {
                            let analyzer = self.clone();
                            tokio::spawn(async move {
                                analyzer.process_file(file).await;
                            });
                        }
                        Some(_) => {} // skips, errors and restarts are informational here
                        None => {
                            info!("analyzer_input_channel_closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn process_file(&self, mut file: CoredumpFile) {
        let now = Utc::now();
        if let Some(reason) = skip_reason(&file, &self.config, now) {
            metrics::COREDUMPS_SKIPPED.inc();
            file.state = CoredumpState::Skipped;
            if let Err(e) = self.db.update_coredump_state(&file.path, CoredumpState::Skipped, Some(&reason)) {
                warn!(error = %e, "skip_state_persist_failed");
            }
            info!(path = %file.path, reason = %reason, "coredump_skipped");
            self.forward(AnalysisEvent::Skipped { file, reason });
            return;
        }

        // The dump may have vanished between discovery and analysis.
        if !std::path::Path::new(&file.path).exists() {
            metrics::ANALYSIS_FAILED.inc();
            metrics::COREDUMPS_ERRORS.inc();
            let error = "coredump file vanished before analysis".to_string();
            file.state = CoredumpState::Error;
            file.error_message = Some(error.clone());
            if let Err(e) =
                self.db
                    .update_coredump_state(&file.path, CoredumpState::Error, Some(&error))
            {
                warn!(error = %e, "error_state_persist_failed");
            }
            warn!(path = %file.path, "coredump_vanished");
            self.forward(AnalysisEvent::Error { file, error });
            return;
        }

        metrics::ANALYSIS_TOTAL.inc();
        let timer = std::time::Instant::now();
        file.state = CoredumpState::Processing;
        if let Err(e) = self.db.update_coredump_state(&file.path, CoredumpState::Processing, None) {
            warn!(error = %e, "processing_state_persist_failed");
        }

        let mut analysis = match self.debug_file(&file).await {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(path = %file.path, error = %e, "gdb_analysis_failed_falling_back");
                let file_output = self.run_file_command(&file.path).await.unwrap_or_default();
                basic_analysis(file.signal, &file_output)
            }
        };

        // A signal learned from the debugger wins over the correlated guess.
        if file.signal == 0 {
            file.signal = signal_from_reason(&analysis.crash_reason);
        }

        let breakdown = compute_value_score(&file, &analysis, &self.config.panic_keywords, Utc::now());
        log_score_breakdown(&file, &breakdown);
        file.value_score = breakdown.total;

        // Enrichment runs after scoring and never changes it.
        if let Some(llm) = &self.llm {
            analysis.ai = Some(self.enrich_with_ai(llm, &file, &analysis).await);
        }

        metrics::VALUE_SCORE_DISTRIBUTION.observe(breakdown.total);
        metrics::ANALYSIS_DURATION.observe(timer.elapsed().as_secs_f64());
        metrics::ANALYSIS_SUCCESSFUL.inc();
        metrics::LAST_PROCESSED_TIMESTAMP.set(Utc::now().timestamp());

        file.state = CoredumpState::Analyzed;
        file.analysis = Some(analysis.clone());

        if let Err(e) = self.db.record_analysis(&file, &analysis) {
            warn!(path = %file.path, error = %e, "analysis_persist_failed");
        }

        self.forward(AnalysisEvent::Complete(file));
    }

    /// Spawn the debugger with the fixed batch script, bounded by the
    /// configured timeout.
    async fn debug_file(&self, file: &CoredumpFile) -> Result<AnalysisResults> {
        if !self.config.enable_gdb_analysis {
            bail!("gdb analysis disabled");
        }

        let mut child = Command::new(&self.config.gdb_path)
            .arg("-batch")
            .arg("-x")
            .arg("-")
            .arg(&file.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("cannot spawn gdb")?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(GDB_SCRIPT.as_bytes())
                .await
                .context("cannot write gdb script")?;
        }

        let output = tokio::time::timeout(self.config.gdb_timeout, child.wait_with_output())
            .await
            .context("gdb timed out")?
            .context("gdb did not run")?;

        if !output.status.success() {
            bail!("gdb exited with {}", output.status);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(path = %file.path, bytes = stdout.len(), "gdb_output_captured");
        Ok(parse_gdb_output(&stdout))
    }

    async fn run_file_command(&self, path: &str) -> Result<String> {
        let output = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            Command::new("file").arg(path).kill_on_drop(true).output(),
        )
        .await
        .context("file(1) timed out")?
        .context("file(1) did not run")?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// LLM enrichment behind controller arbitration. Denials and transport
    /// failures are recorded on the result; the debugger evidence is always
    /// preserved.
    async fn enrich_with_ai(
        &self,
        llm: &LlmClient,
        file: &CoredumpFile,
        analysis: &AnalysisResults,
    ) -> crate::model::AIAnalysisResult {
        let prompt = llm.build_prompt(file, analysis);
        let estimated_cost = llm.estimate_cost(&prompt);

        if self.config.ai_analysis.enable_cost_control
            && let Some(controller) = &self.controller
        {
            match controller
                .request_ai_analysis(&self.node_name, &file.path, file.value_score, estimated_cost)
                .await
            {
                Ok(decision) if !decision.allowed => {
                    info!(path = %file.path, reason = %decision.reason, "ai_analysis_denied");
                    return llm.denied_result(decision.reason);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "controller_unreachable_skipping_ai");
                    return llm.denied_result("controller unreachable".to_string());
                }
            }
        }

        match llm.analyze(&prompt).await {
            Ok(result) => result,
            Err(e) => {
                warn!(path = %file.path, error = %e, "ai_analysis_failed");
                llm.denied_result(format!("analysis request failed: {e}"))
            }
        }
    }

    fn forward(&self, event: AnalysisEvent) {
        if let Err(e) = self.events_tx.try_send(event) {
            warn!(error = %e, "analysis_event_dropped");
        }
    }
}

fn signal_from_reason(reason: &str) -> i32 {
    if reason.contains("SIGSEGV") {
        11
    } else if reason.contains("SIGABRT") {
        6
    } else if reason.contains("SIGFPE") {
        8
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoredumpState;

    fn make_file(size: u64, mod_time: DateTime<Utc>) -> CoredumpFile {
        CoredumpFile {
            path: "/dumps/core.milvus.1000.1700000000.12345".to_string(),
            filename: "core.milvus.1000.1700000000.12345".to_string(),
            size,
            mod_time,
            executable: "milvus".to_string(),
            pid: 12345,
            uid: 1000,
            gid: 0,
            signal: 11,
            timestamp: mod_time,
            boot_id: None,
            pod_name: Some("p1".to_string()),
            pod_namespace: Some("ns1".to_string()),
            container_name: Some("c1".to_string()),
            instance_name: Some("rel1".to_string()),
            state: CoredumpState::Discovered,
            value_score: 0.0,
            created_at: mod_time,
            updated_at: mod_time,
            error_message: None,
            analysis: None,
        }
    }

    const SAMPLE_OUTPUT: &str = "\
=====BACKTRACE=====
#0  0x00007f3a12345678 in raise () from /lib/x86_64-linux-gnu/libc.so.6
#1  abort () at abort.c:79
Program terminated with signal SIGSEGV, Segmentation fault.
=====REGISTERS=====
rip            0x7f3a12345678      0x7f3a12345678
rsp            0x7ffc00001000      0x7ffc00001000
eflags         0x10246             [ PF ZF IF RF ]
=====THREADS=====
  Id   Target Id         Frame
* 1    Thread 0x7f3a (LWP 100) raise ()
  2    Thread 0x7f3b (LWP 101) poll ()
  3    Thread 0x7f3c (LWP 102) epoll_wait ()
=====MEMORY=====
0x400000 0x401000 0x1000 0x0 r-xp /usr/bin/milvus
0x500000 0x600000 0x100000 0x0 rw-p [heap]
=====SHARED_LIBS=====
0x7f3a10000000  0x7f3a10020000  Yes  /lib/x86_64-linux-gnu/libc.so.6
0x7f3a11000000  0x7f3a11010000  Yes  /usr/lib/libstdc++.so.6
";

    /* ───── parsing ───── */

    #[test]
    fn test_split_sections() {
        let sections = split_sections(SAMPLE_OUTPUT);
        assert_eq!(sections.len(), 5);
        assert!(sections["BACKTRACE"].contains("SIGSEGV"));
        assert!(sections["THREADS"].contains("LWP 101"));
    }

    #[test]
    fn test_parse_full_output() {
        let analysis = parse_gdb_output(SAMPLE_OUTPUT);
        assert_eq!(analysis.crash_reason, "Segmentation fault (SIGSEGV)");
        assert_eq!(analysis.crash_address, "0x00007f3a12345678");
        assert_eq!(analysis.thread_count, 3);
        assert_eq!(analysis.registers["rip"], "0x7f3a12345678");
        assert_eq!(analysis.shared_libraries.len(), 2);
        assert_eq!(analysis.library_versions["libc.so"], "6");
        assert!(analysis.memory.heap_kb > 0);
    }

    #[test]
    fn test_crash_reason_first_match_wins() {
        assert_eq!(
            crash_reason_from_backtrace("got SIGSEGV after assert"),
            "Segmentation fault (SIGSEGV)"
        );
        assert_eq!(
            crash_reason_from_backtrace("assert failed in query node"),
            "Assertion failure"
        );
        assert_eq!(crash_reason_from_backtrace("nothing useful"), "Unknown crash reason");
    }

    #[test]
    fn test_first_hex_literal() {
        assert_eq!(first_hex_literal("at 0xdeadBEEF in main"), Some("0xdeadBEEF".to_string()));
        assert_eq!(first_hex_literal("0x then 0x12"), Some("0x12".to_string()));
        assert_eq!(first_hex_literal("no address here"), None);
    }

    #[test]
    fn test_thread_count_minimum_is_one() {
        let analysis = parse_gdb_output("=====THREADS=====\nno threads listed\n");
        assert_eq!(analysis.thread_count, 1);
    }

    #[test]
    fn test_basic_analysis_from_signal() {
        let analysis = basic_analysis(11, "");
        assert_eq!(analysis.crash_reason, "Segmentation fault (SIGSEGV)");
        assert_eq!(analysis.thread_count, 1);
        assert!(analysis.stack_trace.is_empty());
    }

    #[test]
    fn test_basic_analysis_reads_signal_from_file_output() {
        let output = "core: ELF 64-bit LSB core file, from 'milvus', signal: 6";
        assert_eq!(parse_signal_from_file_output(output), Some(6));
        let analysis = basic_analysis(0, output);
        assert_eq!(analysis.crash_reason, "Abort signal (SIGABRT)");
    }

    /* ───── scoring ───── */

    fn panic_keywords() -> Vec<String> {
        crate::config::AnalyzerConfig::default().panic_keywords
    }

    #[test]
    fn test_score_full_house_clamps_at_ten() {
        // Mirrors the SIGSEGV scenario: every dimension fires, raw sum 12.0.
        let now = Utc::now();
        let file = make_file(150 * 1024 * 1024, now - chrono::Duration::minutes(10));
        let analysis = AnalysisResults {
            crash_reason: "Segmentation fault (SIGSEGV)".to_string(),
            stack_trace: "x".repeat(500),
            thread_count: 12,
            ..Default::default()
        };
        let b = compute_value_score(&file, &analysis, &panic_keywords(), now);
        assert_eq!(b.base, 4.0);
        assert_eq!(b.crash_reason, 2.0);
        assert_eq!(b.panic_keyword, 1.0);
        assert_eq!(b.stack_trace, 1.5);
        assert_eq!(b.threads, 0.5);
        assert_eq!(b.pod_association, 1.0);
        assert_eq!(b.signal, 1.0);
        assert_eq!(b.file_size, 0.5);
        assert_eq!(b.freshness, 0.5);
        assert_eq!(b.total, 10.0, "raw 12.0 must clamp to 10.0");
    }

    #[test]
    fn test_score_fallback_analysis() {
        // Debugger timeout path: no stack trace, single thread.
        let now = Utc::now();
        let file = make_file(500 * 1024 * 1024, now - chrono::Duration::hours(2));
        let analysis = basic_analysis(11, "");
        let b = compute_value_score(&file, &analysis, &panic_keywords(), now);
        assert_eq!(b.stack_trace, 0.0);
        assert_eq!(b.threads, 0.0);
        assert_eq!(b.pod_association, 1.0);
        assert_eq!(b.signal, 1.0);
        assert_eq!(b.freshness, 0.0);
        // 4.0 + 2.0 (reason) + 1.0 (sigsegv keyword) + 1.0 + 1.0 + 0.5 (size)
        assert_eq!(b.total, 9.5);
    }

    #[test]
    fn test_score_is_pure_in_now() {
        let now = Utc::now();
        let file = make_file(10, now);
        let analysis = AnalysisResults::default();
        let a = compute_value_score(&file, &analysis, &panic_keywords(), now);
        let b = compute_value_score(&file, &analysis, &panic_keywords(), now);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ai_does_not_contribute_to_score() {
        let now = Utc::now();
        let file = make_file(10, now);
        let mut analysis = AnalysisResults::default();
        let without_ai = compute_value_score(&file, &analysis, &panic_keywords(), now);
        analysis.ai = Some(crate::model::AIAnalysisResult {
            confidence: 1.0,
            summary: "definitely critical".to_string(),
            ..Default::default()
        });
        let with_ai = compute_value_score(&file, &analysis, &panic_keywords(), now);
        assert_eq!(without_ai.total, with_ai.total);
    }

    /* ───── skip policy ───── */

    #[test]
    fn test_skip_policy() {
        let config = AnalyzerConfig {
            ignore_patterns: vec!["sidecar".to_string()],
            ..Default::default()
        };
        let now = Utc::now();

        let fresh = make_file(1024, now);
        assert!(skip_reason(&fresh, &config, now).is_none());

        let mut ignored = make_file(1024, now);
        ignored.container_name = Some("istio-sidecar".to_string());
        assert!(skip_reason(&ignored, &config, now).is_some());

        let huge = make_file(3 * 1024 * 1024 * 1024, now);
        assert!(skip_reason(&huge, &config, now).is_some());

        let stale = make_file(1024, now - chrono::Duration::hours(25));
        assert!(skip_reason(&stale, &config, now).is_some());
    }

    #[test]
    fn test_signal_from_reason() {
        assert_eq!(signal_from_reason("Segmentation fault (SIGSEGV)"), 11);
        assert_eq!(signal_from_reason("Abort signal (SIGABRT)"), 6);
        assert_eq!(signal_from_reason("Unknown crash reason"), 0);
    }
}
