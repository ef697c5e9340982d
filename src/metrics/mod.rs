//! Timing profiles, cold-cache benchmarking and hardware event counters.

pub mod benchmark;
pub mod counters;
pub mod profile;

pub use benchmark::{benchmark_convolution, print_report, BenchmarkConfig, CacheFlush, Report, Workload};
pub use counters::{measure, CounterReading, EventCounter, HardwareEvent};
pub use profile::{median_count, median_duration, median_profile, Profile};
