//! Hardware event counting around a single convolution call.
//!
//! Counts are measured with a calibration pass (two serializing instructions
//! between reads) and a timed pass (serialize, run, serialize between reads);
//! the reported value is the difference of their medians.
//!
//! Hardware counters are Linux-only and best-effort: they need
//! `perf_event_open` permission (see `/proc/sys/kernel/perf_event_paranoid`).
//! Everywhere else every counter reads as unavailable.

use std::fmt;

use tracing::{debug, warn};

use super::profile::median_count;
use crate::error::Result;

/// A monotonically increasing event count that can be sampled at any time.
pub trait EventCounter {
    fn name(&self) -> &str;

    /// Current accumulated count.
    fn read(&self) -> Result<u64>;
}

/// Result of measuring one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterReading {
    /// Events attributable to the measured work, calibration overhead removed.
    Count(u64),
    /// No calibration or timed sample could be read.
    Unavailable,
}

impl CounterReading {
    pub fn count(&self) -> Option<u64> {
        match self {
            CounterReading::Count(n) => Some(*n),
            CounterReading::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, CounterReading::Count(_))
    }
}

impl fmt::Display for CounterReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterReading::Count(n) => write!(f, "{}", n),
            CounterReading::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Serializing instruction: every earlier instruction retires before any later one starts.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
#[allow(unused_unsafe)]
pub fn serialize() {
    // SAFETY: cpuid leaf 0 is available on every x86_64 processor.
    unsafe {
        std::hint::black_box(std::arch::x86_64::__cpuid(0));
    }
}

#[cfg(not(target_arch = "x86_64"))]
#[inline(always)]
pub fn serialize() {
    std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
}

/// Median events spent in `work`, minus the median cost of the measurement itself.
///
/// Each pass runs `iterations` times and skips samples whose reads fail.
/// Errors from `work` abort the measurement.
pub fn measure<C, F>(counter: &C, iterations: usize, mut work: F) -> Result<CounterReading>
where
    C: EventCounter + ?Sized,
    F: FnMut() -> Result<()>,
{
    let mut overhead = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let Ok(start) = counter.read() else { continue };
        serialize();
        serialize();
        let Ok(end) = counter.read() else { continue };
        overhead.push(end.saturating_sub(start));
    }
    let Some(overhead) = median_count(&mut overhead) else {
        warn!(counter = counter.name(), "counter could not be read");
        return Ok(CounterReading::Unavailable);
    };

    let mut computation = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        let Ok(start) = counter.read() else { continue };
        serialize();
        work()?;
        serialize();
        let Ok(end) = counter.read() else { continue };
        computation.push(end.saturating_sub(start));
    }
    let Some(computation) = median_count(&mut computation) else {
        warn!(counter = counter.name(), "no timed samples");
        return Ok(CounterReading::Unavailable);
    };

    debug!(counter = counter.name(), overhead, computation, "counter measured");
    Ok(CounterReading::Count(computation.saturating_sub(overhead)))
}

/// Hardware events the benchmark driver knows how to count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareEvent {
    Cycles,
    Instructions,
    CacheReferences,
    CacheMisses,
    BranchInstructions,
    BranchMisses,
    L1DataReadMisses,
    DataTlbReadMisses,
}

impl HardwareEvent {
    pub const ALL: [HardwareEvent; 8] = [
        HardwareEvent::Cycles,
        HardwareEvent::Instructions,
        HardwareEvent::CacheReferences,
        HardwareEvent::CacheMisses,
        HardwareEvent::BranchInstructions,
        HardwareEvent::BranchMisses,
        HardwareEvent::L1DataReadMisses,
        HardwareEvent::DataTlbReadMisses,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HardwareEvent::Cycles => "cycles",
            HardwareEvent::Instructions => "instructions",
            HardwareEvent::CacheReferences => "cache-references",
            HardwareEvent::CacheMisses => "cache-misses",
            HardwareEvent::BranchInstructions => "branches",
            HardwareEvent::BranchMisses => "branch-misses",
            HardwareEvent::L1DataReadMisses => "L1-dcache-load-misses",
            HardwareEvent::DataTlbReadMisses => "dTLB-load-misses",
        }
    }
}

#[cfg(target_os = "linux")]
pub use perf::{open_counters, EnabledCounter, PerfCounter};

#[cfg(not(target_os = "linux"))]
pub use unsupported::{open_counters, EnabledCounter, PerfCounter};

#[cfg(target_os = "linux")]
mod perf {
    use std::io;
    use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

    use tracing::debug;

    use super::{EventCounter, HardwareEvent};
    use crate::error::{ConvError, Result};

    /// Leading fields of the kernel's `struct perf_event_attr` (PERF_ATTR_SIZE_VER0 + config1/2).
    #[repr(C)]
    #[derive(Clone, Copy)]
    struct PerfEventAttr {
        type_: u32,
        size: u32,
        config: u64,
        sample_period_or_freq: u64,
        sample_type: u64,
        read_format: u64,
        flags: u64,
        wakeup_events: u32,
        bp_type: u32,
        config1: u64,
        config2: u64,
    }

    const PERF_TYPE_HARDWARE: u32 = 0;
    const PERF_TYPE_HW_CACHE: u32 = 3;

    const PERF_COUNT_HW_CPU_CYCLES: u64 = 0;
    const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;
    const PERF_COUNT_HW_CACHE_REFERENCES: u64 = 2;
    const PERF_COUNT_HW_CACHE_MISSES: u64 = 3;
    const PERF_COUNT_HW_BRANCH_INSTRUCTIONS: u64 = 4;
    const PERF_COUNT_HW_BRANCH_MISSES: u64 = 5;

    const PERF_COUNT_HW_CACHE_L1D: u64 = 0;
    const PERF_COUNT_HW_CACHE_DTLB: u64 = 3;
    const PERF_COUNT_HW_CACHE_OP_READ: u64 = 0;
    const PERF_COUNT_HW_CACHE_RESULT_MISS: u64 = 1;

    const PERF_ATTR_FLAG_DISABLED: u64 = 1 << 0;
    const PERF_ATTR_FLAG_EXCLUDE_KERNEL: u64 = 1 << 5;
    const PERF_ATTR_FLAG_EXCLUDE_HV: u64 = 1 << 6;

    // _IO('$', nr)
    const fn io(nr: u64) -> libc::c_ulong {
        (((b'$' as u64) << 8) | nr) as libc::c_ulong
    }

    const PERF_EVENT_IOC_ENABLE: libc::c_ulong = io(0);
    const PERF_EVENT_IOC_DISABLE: libc::c_ulong = io(1);
    const PERF_EVENT_IOC_RESET: libc::c_ulong = io(3);

    const fn cache_event(cache: u64) -> u64 {
        cache | (PERF_COUNT_HW_CACHE_OP_READ << 8) | (PERF_COUNT_HW_CACHE_RESULT_MISS << 16)
    }

    impl HardwareEvent {
        fn attr(&self) -> PerfEventAttr {
            let (type_, config) = match self {
                HardwareEvent::Cycles => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CPU_CYCLES),
                HardwareEvent::Instructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_INSTRUCTIONS),
                HardwareEvent::CacheReferences => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CACHE_REFERENCES),
                HardwareEvent::CacheMisses => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_CACHE_MISSES),
                HardwareEvent::BranchInstructions => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_BRANCH_INSTRUCTIONS),
                HardwareEvent::BranchMisses => (PERF_TYPE_HARDWARE, PERF_COUNT_HW_BRANCH_MISSES),
                HardwareEvent::L1DataReadMisses => (PERF_TYPE_HW_CACHE, cache_event(PERF_COUNT_HW_CACHE_L1D)),
                HardwareEvent::DataTlbReadMisses => (PERF_TYPE_HW_CACHE, cache_event(PERF_COUNT_HW_CACHE_DTLB)),
            };
            PerfEventAttr {
                type_,
                size: std::mem::size_of::<PerfEventAttr>() as u32,
                config,
                sample_period_or_freq: 0,
                sample_type: 0,
                read_format: 0,
                flags: PERF_ATTR_FLAG_DISABLED | PERF_ATTR_FLAG_EXCLUDE_KERNEL | PERF_ATTR_FLAG_EXCLUDE_HV,
                wakeup_events: 0,
                bp_type: 0,
                config1: 0,
                config2: 0,
            }
        }
    }

    fn unavailable(event: HardwareEvent, err: io::Error) -> ConvError {
        ConvError::CounterUnavailable { name: event.name().to_string(), reason: err.to_string() }
    }

    /// A perf event counting the calling thread on any CPU.
    #[derive(Debug)]
    pub struct PerfCounter {
        event: HardwareEvent,
        fd: OwnedFd,
    }

    impl PerfCounter {
        pub fn open(event: HardwareEvent) -> Result<Self> {
            let attr = event.attr();
            // SAFETY: attr is a valid, fully initialized perf_event_attr prefix whose
            // size field matches its layout.
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_perf_event_open,
                    &attr as *const PerfEventAttr,
                    0 as libc::pid_t,
                    -1 as libc::c_int,
                    -1 as libc::c_int,
                    0 as libc::c_ulong,
                )
            };
            if ret < 0 {
                return Err(unavailable(event, io::Error::last_os_error()));
            }
            // SAFETY: the syscall returned a fresh descriptor we now own.
            let fd = unsafe { OwnedFd::from_raw_fd(ret as libc::c_int) };
            debug!(counter = event.name(), "opened perf event");
            Ok(PerfCounter { event, fd })
        }

        pub fn event(&self) -> HardwareEvent {
            self.event
        }

        fn ioctl(&self, request: libc::c_ulong) -> Result<()> {
            // SAFETY: the perf ioctls used here take no argument.
            let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), request as _, 0) };
            if ret < 0 {
                return Err(unavailable(self.event, io::Error::last_os_error()));
            }
            Ok(())
        }

        /// Reset and start counting. Counting stops when the guard is disabled or dropped.
        pub fn enable(&self) -> Result<EnabledCounter<'_>> {
            self.ioctl(PERF_EVENT_IOC_RESET)?;
            self.ioctl(PERF_EVENT_IOC_ENABLE)?;
            Ok(EnabledCounter { counter: self, active: true })
        }
    }

    impl EventCounter for PerfCounter {
        fn name(&self) -> &str {
            self.event.name()
        }

        fn read(&self) -> Result<u64> {
            let mut value = 0u64;
            // SAFETY: reads at most 8 bytes into a u64 on the stack.
            let bytes = unsafe {
                libc::read(
                    self.fd.as_raw_fd(),
                    &mut value as *mut u64 as *mut libc::c_void,
                    std::mem::size_of::<u64>(),
                )
            };
            if bytes != std::mem::size_of::<u64>() as isize {
                return Err(unavailable(self.event, io::Error::last_os_error()));
            }
            Ok(value)
        }
    }

    /// An enabled counter.
    #[derive(Debug)]
    pub struct EnabledCounter<'a> {
        counter: &'a PerfCounter,
        active: bool,
    }

    impl EnabledCounter<'_> {
        pub fn counter(&self) -> &PerfCounter {
            self.counter
        }

        /// Stop counting, reporting failure.
        pub fn disable(mut self) -> Result<()> {
            self.active = false;
            self.counter.ioctl(PERF_EVENT_IOC_DISABLE)
        }
    }

    impl Drop for EnabledCounter<'_> {
        fn drop(&mut self) {
            if self.active {
                let _ = self.counter.ioctl(PERF_EVENT_IOC_DISABLE);
            }
        }
    }

    /// Open every known event, pairing each with the reason it could not be opened.
    pub fn open_counters() -> Vec<(HardwareEvent, Result<PerfCounter>)> {
        HardwareEvent::ALL.iter().map(|&event| (event, PerfCounter::open(event))).collect()
    }
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::{EventCounter, HardwareEvent};
    use crate::error::{ConvError, Result};

    fn unsupported(event: HardwareEvent) -> ConvError {
        ConvError::CounterUnavailable {
            name: event.name().to_string(),
            reason: "hardware counters require Linux perf events".to_string(),
        }
    }

    #[derive(Debug)]
    pub struct PerfCounter {
        event: HardwareEvent,
    }

    impl PerfCounter {
        pub fn open(event: HardwareEvent) -> Result<Self> {
            Err(unsupported(event))
        }

        pub fn event(&self) -> HardwareEvent {
            self.event
        }

        pub fn enable(&self) -> Result<EnabledCounter<'_>> {
            Err(unsupported(self.event))
        }
    }

    impl EventCounter for PerfCounter {
        fn name(&self) -> &str {
            self.event.name()
        }

        fn read(&self) -> Result<u64> {
            Err(unsupported(self.event))
        }
    }

    #[derive(Debug)]
    pub struct EnabledCounter<'a> {
        counter: &'a PerfCounter,
    }

    impl EnabledCounter<'_> {
        pub fn counter(&self) -> &PerfCounter {
            self.counter
        }

        pub fn disable(self) -> Result<()> {
            Err(unsupported(self.counter.event))
        }
    }

    pub fn open_counters() -> Vec<(HardwareEvent, Result<PerfCounter>)> {
        HardwareEvent::ALL.iter().map(|&event| (event, PerfCounter::open(event))).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::error::ConvError;

    /// Advances by `step` on every read; `work` adds its own events.
    struct Ticker {
        count: Cell<u64>,
        step: u64,
    }

    impl EventCounter for Ticker {
        fn name(&self) -> &str {
            "ticker"
        }

        fn read(&self) -> Result<u64> {
            let value = self.count.get() + self.step;
            self.count.set(value);
            Ok(value)
        }
    }

    struct Broken;

    impl EventCounter for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn read(&self) -> Result<u64> {
            Err(ConvError::CounterUnavailable { name: "broken".into(), reason: "test".into() })
        }
    }

    #[test]
    fn subtracts_calibration_overhead() {
        let ticker = Ticker { count: Cell::new(0), step: 5 };
        let reading = measure(&ticker, 3, || {
            ticker.count.set(ticker.count.get() + 100);
            Ok(())
        })
        .unwrap();
        assert_eq!(reading, CounterReading::Count(100));
    }

    #[test]
    fn unreadable_counter_is_unavailable() {
        let mut calls = 0;
        let reading = measure(&Broken, 3, || {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(reading, CounterReading::Unavailable);
        assert_eq!(calls, 0);
        assert_eq!(reading.to_string(), "unavailable");
    }

    #[test]
    fn opened_counters_keep_their_event() {
        // Counters may be unavailable on the host; check whatever opens.
        let counters = open_counters();
        assert_eq!(counters.len(), HardwareEvent::ALL.len());
        for (event, counter) in counters {
            let Ok(counter) = counter else { continue };
            assert_eq!(counter.event(), event);
            assert_eq!(counter.name(), event.name());
            if let Ok(enabled) = counter.enable() {
                assert_eq!(enabled.counter().event(), event);
            };
        }
    }
}
