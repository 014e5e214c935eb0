use std::cell::Cell;
use std::fmt;
use std::sync::{Condvar, Mutex};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Scheduling hint carried by a functor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    #[default]
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    fn lane(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

/// Concurrent slots per priority lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaneConfig {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            high: 16,
            medium: 8,
            low: 4,
        }
    }
}

impl LaneConfig {
    fn slots(&self, priority: Priority) -> usize {
        let n = match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        };
        n.max(1)
    }
}

thread_local! {
    static CURRENT: Cell<Option<Priority>> = const { Cell::new(None) };
}

/// Priority the calling thread is running under, if any.
pub fn current_priority() -> Option<Priority> {
    CURRENT.with(Cell::get)
}

struct Lane {
    slots: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl Lane {
    fn acquire(&self) {
        let mut in_use = self.in_use.lock().expect("lane lock poisoned");
        while *in_use >= self.slots {
            in_use = self.freed.wait(in_use).expect("lane lock poisoned");
        }
        *in_use += 1;
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock().expect("lane lock poisoned");
        *in_use = in_use.saturating_sub(1);
        drop(in_use);
        self.freed.notify_one();
    }
}

/// Three lanes of bounded concurrency, one per [`Priority`].
///
/// A run takes a slot in its lane for its duration, waiting while the lane
/// is full. Lanes are independent, so a burst of low-priority queries never
/// holds up high-priority work.
pub struct PriorityLanes {
    lanes: [Lane; 3],
}

impl PriorityLanes {
    pub fn new(config: &LaneConfig) -> Self {
        let lane = |p| Lane {
            slots: config.slots(p),
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        };
        Self {
            lanes: [lane(Priority::High), lane(Priority::Medium), lane(Priority::Low)],
        }
    }

    /// Run `f` in the lane for `priority`.
    ///
    /// The thread's current priority is set for the duration of `f` and
    /// restored afterwards, also when `f` panics. A thread that is already
    /// inside a run does not take a second slot.
    pub fn with_priority<T>(&self, priority: Priority, f: impl FnOnce() -> T) -> T {
        let previous = current_priority();
        let lane = match previous {
            Some(_) => None,
            None => {
                let lane = &self.lanes[priority.lane()];
                lane.acquire();
                Some(lane)
            }
        };
        CURRENT.with(|c| c.set(Some(priority)));
        trace!(priority = %priority, nested = previous.is_some(), "entered priority lane");

        let _guard = LaneGuard { lane, previous };
        f()
    }

    /// Slots currently taken in a lane.
    pub fn in_use(&self, priority: Priority) -> usize {
        *self.lanes[priority.lane()]
            .in_use
            .lock()
            .expect("lane lock poisoned")
    }

    pub fn slots(&self, priority: Priority) -> usize {
        self.lanes[priority.lane()].slots
    }
}

impl Default for PriorityLanes {
    fn default() -> Self {
        Self::new(&LaneConfig::default())
    }
}

impl fmt::Debug for PriorityLanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("PriorityLanes");
        for p in Priority::ALL {
            s.field(&p.to_string(), &format_args!("{}/{}", self.in_use(p), self.slots(p)));
        }
        s.finish()
    }
}

struct LaneGuard<'a> {
    lane: Option<&'a Lane>,
    previous: Option<Priority>,
}

impl Drop for LaneGuard<'_> {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
        if let Some(lane) = self.lane {
            lane.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn priority_is_visible_inside_and_restored_after() {
        let lanes = PriorityLanes::default();
        assert_eq!(current_priority(), None);

        let seen = lanes.with_priority(Priority::High, current_priority);

        assert_eq!(seen, Some(Priority::High));
        assert_eq!(current_priority(), None);
        assert_eq!(lanes.in_use(Priority::High), 0);
    }

    #[test]
    fn restored_after_panic() {
        let lanes = PriorityLanes::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lanes.with_priority(Priority::Medium, || panic!("functor blew up"))
        }));

        assert!(result.is_err());
        assert_eq!(current_priority(), None);
        assert_eq!(lanes.in_use(Priority::Medium), 0);
    }

    #[test]
    fn nested_run_keeps_one_slot_and_restores_outer_priority() {
        let lanes = PriorityLanes::new(&LaneConfig { high: 1, medium: 1, low: 1 });

        lanes.with_priority(Priority::Low, || {
            lanes.with_priority(Priority::High, || {
                assert_eq!(current_priority(), Some(Priority::High));
                assert_eq!(lanes.in_use(Priority::High), 0);
            });
            assert_eq!(current_priority(), Some(Priority::Low));
            assert_eq!(lanes.in_use(Priority::Low), 1);
        });
        assert_eq!(lanes.in_use(Priority::Low), 0);
    }

    #[test]
    fn lane_bounds_concurrency() {
        let lanes = Arc::new(PriorityLanes::new(&LaneConfig { high: 4, medium: 4, low: 2 }));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lanes = lanes.clone();
                let running = running.clone();
                let peak = peak.clone();
                thread::spawn(move || {
                    lanes.with_priority(Priority::Low, || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        running.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(lanes.in_use(Priority::Low), 0);
    }

    #[test]
    fn zero_slots_means_one() {
        let lanes = PriorityLanes::new(&LaneConfig { high: 0, medium: 0, low: 0 });
        assert_eq!(lanes.slots(Priority::Low), 1);
        assert_eq!(lanes.with_priority(Priority::Low, || 7), 7);
    }

    #[test]
    fn default_is_low() {
        assert_eq!(Priority::default(), Priority::Low);
        assert!(Priority::High < Priority::Low);
    }
}
