use std::time::{Duration, Instant};

/// Wall-clock breakdown of one convolution call.
///
/// `total` covers the whole call; whatever the four phases do not account
/// for (allocation, dispatch) is overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Profile {
    pub input_transform: Duration,
    pub kernel_transform: Duration,
    pub block_multiplication: Duration,
    pub output_transform: Duration,
    pub total: Duration,
}

impl Profile {
    /// Sum of the four named phases.
    pub fn phases(&self) -> Duration {
        self.input_transform + self.kernel_transform + self.block_multiplication + self.output_transform
    }

    /// Time not attributed to any phase.
    pub fn overhead(&self) -> Duration {
        self.total.saturating_sub(self.phases())
    }
}

/// Run `f`, adding its wall-clock time to `slot`.
pub(crate) fn timed<R>(slot: &mut Duration, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let result = f();
    *slot += start.elapsed();
    result
}

/// Median of `samples`, averaging the two middle values for even counts.
/// Returns `None` for an empty sample set.
pub fn median_by<T: Copy + Ord>(samples: &mut [T], midpoint: impl Fn(T, T) -> T) -> Option<T> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    let n = samples.len();
    if n % 2 == 0 {
        Some(midpoint(samples[n / 2 - 1], samples[n / 2]))
    } else {
        Some(samples[n / 2])
    }
}

pub fn median_duration(samples: &mut [Duration]) -> Option<Duration> {
    median_by(samples, |a, b| a + (b - a) / 2)
}

pub fn median_count(samples: &mut [u64]) -> Option<u64> {
    median_by(samples, |a, b| a + (b - a) / 2)
}

/// Elementwise median across profiles, each phase reduced independently.
pub fn median_profile(profiles: &[Profile]) -> Profile {
    let mut column = Vec::with_capacity(profiles.len());
    let mut reduce = |field: fn(&Profile) -> Duration| {
        column.clear();
        column.extend(profiles.iter().map(field));
        median_duration(&mut column).unwrap_or_default()
    };
    let mut median = Profile {
        input_transform: reduce(|p| p.input_transform),
        kernel_transform: reduce(|p| p.kernel_transform),
        block_multiplication: reduce(|p| p.block_multiplication),
        output_transform: reduce(|p| p.output_transform),
        total: reduce(|p| p.total),
    };
    // Per-phase medians may come from different iterations.
    median.total = median.total.max(median.phases());
    median
}
