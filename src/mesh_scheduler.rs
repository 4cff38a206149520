//! Discrete-event scheduler and simulation clock.
//!
//! Events are kept in a `BinaryHeap` with reversed ordering on
//! `(scheduled_at, sequence)`, which makes it a min-heap where equal
//! timestamps come out in insertion order. Cancellation is lazy: a cancelled
//! event stays in the heap and is discarded when it reaches the top.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;
use log::{debug, trace};

use crate::mesh_error::SchedulingError;
use crate::mesh_interface::SimTime;

/// Cancellation handle returned by every schedule call
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle(u64);

impl EventHandle {
    pub fn sequence(self) -> u64 {
        self.0
    }
}

struct QueuedEvent<A> {
    scheduled_at: SimTime,
    sequence: u64,
    action: A,
}

impl<A> PartialEq for QueuedEvent<A> {
    fn eq(&self, other: &Self) -> bool {
        self.scheduled_at == other.scheduled_at && self.sequence == other.sequence
    }
}

impl<A> Eq for QueuedEvent<A> {}

impl<A> Ord for QueuedEvent<A> {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: the heap pops the smallest (time, sequence) first
        other
            .scheduled_at
            .cmp(&self.scheduled_at)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl<A> PartialOrd for QueuedEvent<A> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Receives every action the scheduler dispatches.
///
/// The handler gets the scheduler back so that it can queue follow-up events
/// while the clock is frozen at the current event's time.
pub trait EventHandler<A> {
    fn handle(&mut self, scheduler: &mut EventScheduler<A>, action: A);
}

impl<A, F> EventHandler<A> for F
where
    F: FnMut(&mut EventScheduler<A>, A),
{
    fn handle(&mut self, scheduler: &mut EventScheduler<A>, action: A) {
        (self)(scheduler, action)
    }
}

/// Why `run_until` returned
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    StopTimeReached,
    Exhausted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub events_executed: u64,
    pub events_skipped: u64,
    pub final_time: SimTime,
}

/// Time-ordered event queue owning the simulation clock
pub struct EventScheduler<A> {
    queue: BinaryHeap<QueuedEvent<A>>,
    live: HashSet<u64>,
    next_sequence: u64,
    now: SimTime,
    closed: bool,
}

impl<A> EventScheduler<A> {
    pub fn new() -> Self {
        Self {
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            next_sequence: 0,
            now: SimTime::ZERO,
            closed: false,
        }
    }

    /// Current simulated time
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Schedule `action` to run `delay_secs` seconds from now.
    ///
    /// A negative or non-finite delay is a programming error and is returned
    /// as [`SchedulingError::InvalidDelay`] without touching the queue.
    pub fn schedule(&mut self, delay_secs: f64, action: A) -> Result<EventHandle, SchedulingError> {
        let delay = SimTime::from_secs_f64(delay_secs)
            .map_err(|_| SchedulingError::InvalidDelay { delay: delay_secs })?;
        self.schedule_after(delay, action)
    }

    pub fn schedule_after(&mut self, delay: SimTime, action: A) -> Result<EventHandle, SchedulingError> {
        let at = self.now.checked_add(delay).ok_or(SchedulingError::Overflow)?;
        self.schedule_at(at, action)
    }

    /// Schedule at an absolute time, which must not be in the past
    pub fn schedule_at(&mut self, at: SimTime, action: A) -> Result<EventHandle, SchedulingError> {
        if self.closed {
            return Err(SchedulingError::Closed);
        }
        if at < self.now {
            return Err(SchedulingError::NonCausal {
                requested: at,
                now: self.now,
            });
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.live.insert(sequence);
        self.queue.push(QueuedEvent {
            scheduled_at: at,
            sequence,
            action,
        });
        trace!("scheduled #{} at {}", sequence, at);
        Ok(EventHandle(sequence))
    }

    /// Cancel a pending event.
    ///
    /// Returns `true` if the event was pending. Cancelling an event that
    /// already fired or was already cancelled does nothing.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        let removed = self.live.remove(&handle.0);
        if removed {
            trace!("cancelled #{}", handle.0);
        }
        removed
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.live.contains(&handle.0)
    }

    /// Number of events that will still fire
    pub fn pending(&self) -> usize {
        self.live.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live.is_empty()
    }

    /// Refuse all further scheduling
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Time of the next live event, discarding cancelled ones on the way
    pub fn peek_time(&mut self) -> Option<SimTime> {
        self.discard_cancelled();
        self.queue.peek().map(|e| e.scheduled_at)
    }

    fn discard_cancelled(&mut self) -> u64 {
        let mut skipped = 0;
        while let Some(top) = self.queue.peek() {
            if self.live.contains(&top.sequence) {
                break;
            }
            self.queue.pop();
            skipped += 1;
        }
        skipped
    }

    /// Dispatch events in time order until the next one lies beyond
    /// `stop_time` or the queue runs dry.
    ///
    /// Events scheduled exactly at `stop_time` are executed. When the stop
    /// time is reached the clock is left reading `stop_time`.
    pub fn run_until<H>(&mut self, stop_time: SimTime, handler: &mut H) -> Result<RunSummary, SchedulingError>
    where
        H: EventHandler<A> + ?Sized,
    {
        if stop_time < self.now {
            return Err(SchedulingError::NonCausal {
                requested: stop_time,
                now: self.now,
            });
        }

        let mut executed = 0u64;
        let mut skipped = 0u64;

        let outcome = loop {
            skipped += self.discard_cancelled();

            let next_at = match self.queue.peek() {
                None => break RunOutcome::Exhausted,
                Some(event) => event.scheduled_at,
            };
            if next_at > stop_time {
                self.now = stop_time;
                break RunOutcome::StopTimeReached;
            }

            let event = match self.queue.pop() {
                Some(event) => event,
                None => break RunOutcome::Exhausted,
            };
            self.live.remove(&event.sequence);
            self.now = event.scheduled_at;
            handler.handle(self, event.action);
            executed += 1;
        };

        debug!(
            "run_until {}: {:?} after {} events ({} cancelled skipped), clock {}",
            stop_time, outcome, executed, skipped, self.now
        );

        Ok(RunSummary {
            outcome,
            events_executed: executed,
            events_skipped: skipped,
            final_time: self.now,
        })
    }
}

impl<A> Default for EventScheduler<A> {
    fn default() -> Self {
        Self::new()
    }
}
