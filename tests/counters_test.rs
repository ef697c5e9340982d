use std::cell::{Cell, RefCell};

use tileconv::metrics::{measure, CounterReading, EventCounter};
use tileconv::{ConvError, Result};

/// Replays a scripted sequence of reads.
struct Scripted {
    reads: RefCell<Vec<Option<u64>>>,
}

impl Scripted {
    fn new(mut reads: Vec<Option<u64>>) -> Self {
        reads.reverse();
        Scripted { reads: RefCell::new(reads) }
    }
}

impl EventCounter for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn read(&self) -> Result<u64> {
        match self.reads.borrow_mut().pop().flatten() {
            Some(value) => Ok(value),
            None => Err(ConvError::CounterUnavailable {
                name: "scripted".to_string(),
                reason: "no sample".to_string(),
            }),
        }
    }
}

#[test]
fn test_median_difference() {
    // Calibration deltas 10, 12, 11; timed deltas 110, 150, 130.
    let counter = Scripted::new(vec![
        Some(0), Some(10), Some(20), Some(32), Some(40), Some(51),
        Some(100), Some(210), Some(300), Some(450), Some(500), Some(630),
    ]);
    let reading = measure(&counter, 3, || Ok(())).unwrap();
    assert_eq!(reading, CounterReading::Count(119));
}

#[test]
fn test_clamps_at_zero() {
    let counter = Scripted::new(vec![Some(0), Some(50), Some(100), Some(110)]);
    let reading = measure(&counter, 1, || Ok(())).unwrap();
    assert_eq!(reading, CounterReading::Count(0));
    assert!(reading.is_available());
}

#[test]
fn test_failed_iterations_are_skipped() {
    // Second calibration iteration fails its first read; the timed pass loses its last one.
    let counter = Scripted::new(vec![
        Some(0), Some(4), None, Some(10), Some(14),
        Some(100), Some(200), Some(300), Some(420), Some(500), None,
    ]);
    let runs = Cell::new(0);
    let reading = measure(&counter, 3, || {
        runs.set(runs.get() + 1);
        Ok(())
    })
    .unwrap();
    // Calibration median 4, timed median of 100 and 120 is 110.
    assert_eq!(reading, CounterReading::Count(106));
    assert_eq!(runs.get(), 3);
}

#[test]
fn test_unavailable_is_not_zero() {
    let counter = Scripted::new(vec![None; 6]);
    let reading = measure(&counter, 3, || Ok(())).unwrap();
    assert_eq!(reading, CounterReading::Unavailable);
    assert_eq!(reading.count(), None);
    assert_ne!(reading, CounterReading::Count(0));
}

#[test]
fn test_work_errors_propagate() {
    let counter = Scripted::new(vec![Some(0), Some(1), Some(2)]);
    let result = measure(&counter, 1, || Err(ConvError::InvalidArgument("boom".to_string())));
    assert!(matches!(result, Err(ConvError::InvalidArgument(_))));
}
