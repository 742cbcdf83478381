//! Process runtime metrics.
//!
//! Process name, status, CPU usage, memory and disk I/O come from [`sysinfo`] on every platform it
//! supports. Thread counts, page faults, CPU times, context switches and I/O syscall counts are not
//! exposed by `sysinfo`; on Linux they are read from procfs, and elsewhere they report zero.
use metrics_wavefront::{TaggedRegistry, Tags};
use parking_lot::Mutex;
use sysinfo::{Pid, System};
use tracing::{debug, trace};

/// A single reading of the process counters.
#[derive(Clone, Debug, Default, PartialEq)]
struct ProcessSample {
    cpu_percent: f64,
    rss_bytes: u64,
    peak_rss_kb: u64,
    total_memory_bytes: u64,
    read_bytes: u64,
    write_bytes: u64,
    children: u64,
    counters: KernelCounters,
}

/// Counters that only the kernel's own accounting provides.
#[derive(Clone, Debug, Default, PartialEq)]
struct KernelCounters {
    user_secs: f64,
    system_secs: f64,
    minor_faults: u64,
    major_faults: u64,
    threads: u64,
    peak_rss_kb: u64,
    voluntary_switches: u64,
    involuntary_switches: u64,
    read_count: u64,
    write_count: u64,
    children: Option<u64>,
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::fs;

    use super::KernelCounters;

    // procfs reports CPU times in USER_HZ ticks, which the kernel ABI fixes at 100.
    const TICKS_PER_SECOND: f64 = 100.0;

    /// Fields of `/proc/<pid>/stat` that are reported.
    #[derive(Debug, Default, PartialEq)]
    pub(super) struct Stat {
        pub minor_faults: u64,
        pub major_faults: u64,
        pub user_ticks: u64,
        pub system_ticks: u64,
        pub threads: u64,
    }

    // The command name is parenthesized and may itself contain spaces or parentheses, so fields
    // are counted from the last `)`.
    pub(super) fn parse_stat(contents: &str) -> Option<Stat> {
        let (_, rest) = contents.rsplit_once(')')?;
        let fields: Vec<&str> = rest.split_whitespace().collect();
        let field = |n: usize| -> Option<u64> { fields.get(n - 3)?.parse().ok() };

        Some(Stat {
            minor_faults: field(10)?,
            major_faults: field(12)?,
            user_ticks: field(14)?,
            system_ticks: field(15)?,
            threads: field(20)?,
        })
    }

    // Parses `Key:   value [unit]` lines, as found in `/proc/<pid>/status` and `/proc/<pid>/io`.
    pub(super) fn parse_field(contents: &str, key: &str) -> Option<u64> {
        contents.lines().find_map(|line| {
            let (k, v) = line.split_once(':')?;
            if k.trim() != key {
                return None;
            }
            v.split_whitespace().next()?.parse().ok()
        })
    }

    // Threads of this process are listed as processes too, so children are taken from the
    // kernel's per-task lists instead.
    fn count_children() -> Option<u64> {
        let tasks = fs::read_dir("/proc/self/task").ok()?;
        let children = tasks
            .filter_map(Result::ok)
            .filter_map(|task| fs::read_to_string(task.path().join("children")).ok())
            .map(|children| children.split_whitespace().count() as u64)
            .sum();
        Some(children)
    }

    pub(super) fn read() -> KernelCounters {
        let mut counters = KernelCounters::default();

        let stat = fs::read_to_string("/proc/self/stat").ok();
        if let Some(stat) = stat.as_deref().and_then(parse_stat) {
            counters.user_secs = stat.user_ticks as f64 / TICKS_PER_SECOND;
            counters.system_secs = stat.system_ticks as f64 / TICKS_PER_SECOND;
            counters.minor_faults = stat.minor_faults;
            counters.major_faults = stat.major_faults;
            counters.threads = stat.threads;
        }

        if let Ok(status) = fs::read_to_string("/proc/self/status") {
            counters.peak_rss_kb = parse_field(&status, "VmHWM").unwrap_or(0);
            counters.voluntary_switches =
                parse_field(&status, "voluntary_ctxt_switches").unwrap_or(0);
            counters.involuntary_switches =
                parse_field(&status, "nonvoluntary_ctxt_switches").unwrap_or(0);
        }

        // Only readable by the process owner, and missing on some kernels.
        if let Ok(io) = fs::read_to_string("/proc/self/io") {
            counters.read_count = parse_field(&io, "syscr").unwrap_or(0);
            counters.write_count = parse_field(&io, "syscw").unwrap_or(0);
        }

        counters.children = count_children();
        counters
    }
}

#[cfg(target_os = "linux")]
fn kernel_counters() -> KernelCounters {
    procfs::read()
}

#[cfg(not(target_os = "linux"))]
fn kernel_counters() -> KernelCounters {
    KernelCounters::default()
}

/// Collects process runtime metrics into gauges.
///
/// Every gauge carries the `process_id`, `process_name` and `process_status` tags, captured when the
/// collector is created. CPU usage is measured between two collections, so the first one reports
/// zero.
pub struct RuntimeCollector {
    pid: Option<Pid>,
    tags: Tags,
    system: Mutex<System>,
}

impl RuntimeCollector {
    /// Creates a new `RuntimeCollector` for the current process.
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                debug!(error = e, "Failed to determine the current process ID.");
                None
            }
        };

        let process =
            pid.filter(|pid| system.refresh_process(*pid)).and_then(|pid| system.process(pid));
        let name = process
            .map(|process| process.name().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "unknown".to_string());
        let status = process
            .map(|process| process.status().to_string().to_lowercase())
            .unwrap_or_else(|| "unknown".to_string());

        let mut tags = Tags::new();
        tags.insert("process_id".to_string(), std::process::id().to_string());
        tags.insert("process_name".to_string(), name);
        tags.insert("process_status".to_string(), status);

        Self { pid, tags, system: Mutex::new(system) }
    }

    /// Gets the tags attached to every runtime gauge.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    fn read_sample(&self) -> ProcessSample {
        let counters = kernel_counters();
        let mut sample = ProcessSample::default();

        let mut system = self.system.lock();
        system.refresh_memory();
        sample.total_memory_bytes = system.total_memory();

        if let Some(pid) = self.pid {
            if counters.children.is_none() {
                system.refresh_processes();
            } else {
                system.refresh_process(pid);
            }

            if let Some(process) = system.process(pid) {
                let disk = process.disk_usage();
                sample.cpu_percent = f64::from(process.cpu_usage());
                sample.rss_bytes = process.memory();
                sample.read_bytes = disk.total_read_bytes;
                sample.write_bytes = disk.total_written_bytes;
            }

            sample.children = counters.children.unwrap_or_else(|| {
                system.processes().values().filter(|process| process.parent() == Some(pid)).count()
                    as u64
            });
        }

        // Without the kernel's high-water mark, the current resident size is the best estimate.
        sample.peak_rss_kb =
            if counters.peak_rss_kb > 0 { counters.peak_rss_kb } else { sample.rss_bytes / 1024 };
        sample.counters = counters;
        sample
    }

    /// Reads the process counters and updates the runtime gauges in `registry`.
    pub fn collect(&self, registry: &TaggedRegistry) {
        let sample = self.read_sample();
        trace!(?sample, "Collected runtime metrics.");

        let memory_percent = if sample.total_memory_bytes == 0 {
            0.0
        } else {
            sample.rss_bytes as f64 * 100.0 / sample.total_memory_bytes as f64
        };
        let counters = &sample.counters;

        let gauges = [
            ("cpu.times", counters.system_secs),
            ("cpu.percent", sample.cpu_percent),
            ("memory.rss.usage", sample.peak_rss_kb as f64),
            ("memory.rss.percent", memory_percent),
            ("io.read_count", counters.read_count as f64),
            ("io.write_count", counters.write_count as f64),
            ("io.read_bytes", sample.read_bytes as f64),
            ("io.write_bytes", sample.write_bytes as f64),
            ("thread.count", counters.threads as f64),
            ("processes.count", sample.children as f64),
            // No tracing garbage collector to report on.
            ("gc.collection.count0", 0.0),
            ("gc.collection.count1", 0.0),
            ("gc.collection.count2", 0.0),
            ("pgfault.major", counters.major_faults as f64),
            ("pgfault.minor", counters.minor_faults as f64),
            ("exectime.user", counters.user_secs),
            ("exectime.kernel", counters.system_secs),
            ("conswitch.voluntary", counters.voluntary_switches as f64),
            ("conswitch.involuntary", counters.involuntary_switches as f64),
        ];

        for (name, value) in gauges {
            registry.gauge(name, Some(&self.tags)).set(value);
        }
    }
}

impl Default for RuntimeCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use metrics_wavefront::TaggedRegistry;

    use super::RuntimeCollector;

    #[cfg(target_os = "linux")]
    #[test]
    fn stat_parsing() {
        use super::procfs::{parse_stat, Stat};

        let contents = "1234 (my (odd) proc) S 1 1234 1234 0 -1 4194560 1500 0 7 0 250 40 0 0 \
                        20 0 6 0 100 1000000 200 18446744073709551615";
        assert_eq!(
            parse_stat(contents),
            Some(Stat {
                minor_faults: 1500,
                major_faults: 7,
                user_ticks: 250,
                system_ticks: 40,
                threads: 6,
            })
        );
        assert_eq!(parse_stat("garbage"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn field_parsing() {
        use super::procfs::parse_field;

        let status = "Name:\tworker\nState:\tS (sleeping)\nVmRSS:\t  20480 kB\n\
                      voluntary_ctxt_switches:\t42\nnonvoluntary_ctxt_switches:\t3\n";
        assert_eq!(parse_field(status, "VmRSS"), Some(20480));
        assert_eq!(parse_field(status, "voluntary_ctxt_switches"), Some(42));
        assert_eq!(parse_field(status, "nonvoluntary_ctxt_switches"), Some(3));
        assert_eq!(parse_field(status, "VmHWM"), None);
    }

    #[test]
    fn collect_sets_tagged_gauges() {
        let registry = TaggedRegistry::new();
        let collector = RuntimeCollector::new();
        collector.collect(&registry);
        collector.collect(&registry);

        let tags = collector.tags();
        assert_eq!(tags["process_id"], std::process::id().to_string());
        assert_ne!(tags["process_name"], "unknown");
        assert_ne!(tags["process_status"], "unknown");

        for name in ["cpu.times", "memory.rss.usage", "thread.count", "gc.collection.count2"] {
            assert!(registry.has_gauge(name, Some(tags)), "missing gauge {name}");
        }
        assert!(registry.gauge("memory.rss.usage", Some(tags)).value() > 0.0);
        assert!(registry.gauge("memory.rss.percent", Some(tags)).value() > 0.0);
        assert_eq!(registry.gauge("gc.collection.count0", Some(tags)).value(), 0.0);
        assert!(!registry.has_gauge("cpu.times", None));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn kernel_counters_are_read_on_linux() {
        let registry = TaggedRegistry::new();
        let collector = RuntimeCollector::new();
        collector.collect(&registry);

        let tags = collector.tags();
        assert!(registry.gauge("thread.count", Some(tags)).value() >= 1.0);
        assert!(registry.gauge("pgfault.minor", Some(tags)).value() > 0.0);
    }
}
