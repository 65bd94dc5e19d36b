use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

pub type TimerId = u64;

// A timer callback receives the shared context, the reactor itself (so it can arm or
// cancel other timers) and the time of the current dispatch pass. Its return value
// decides when it runs next; `Waketime::Never` removes it.
pub type TimerCallback<C> = Box<dyn FnMut(&mut C, &mut Reactor<C>, Instant) -> Waketime>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waketime {
    Now,
    At(Instant),
    Never,
}

impl Waketime {
    pub fn after(now: Instant, delay: Duration) -> Self {
        Self::At(now + delay)
    }

    fn is_due(self, now: Instant) -> bool {
        match self {
            Self::Now => true,
            Self::At(at) => at <= now,
            Self::Never => false,
        }
    }

    fn sort_key(self) -> Option<Option<Instant>> {
        match self {
            Self::Now => Some(None),
            Self::At(at) => Some(Some(at)),
            Self::Never => None,
        }
    }
}

struct TimerEntry<C> {
    waketime: Waketime,
    callback: TimerCallback<C>,
}

#[derive(Default)]
struct Dispatching {
    id: Option<TimerId>,
    cancelled: bool,
    rescheduled: Option<Waketime>,
}

pub struct Reactor<C> {
    timers: BTreeMap<TimerId, TimerEntry<C>>,
    next_timer_id: TimerId,
    dispatching: Dispatching,
}

impl<C> Default for Reactor<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Reactor<C> {
    pub fn new() -> Self {
        Self {
            timers: BTreeMap::new(),
            next_timer_id: 1,
            dispatching: Dispatching::default(),
        }
    }

    pub fn register_timer<F>(&mut self, waketime: Waketime, callback: F) -> TimerId
    where
        F: FnMut(&mut C, &mut Reactor<C>, Instant) -> Waketime + 'static,
    {
        let id = self.next_timer_id;
        self.next_timer_id += 1;
        self.timers.insert(
            id,
            TimerEntry {
                waketime,
                callback: Box::new(callback),
            },
        );
        id
    }

    pub fn update_timer(&mut self, id: TimerId, waketime: Waketime) -> bool {
        if self.dispatching.id == Some(id) {
            if self.dispatching.cancelled {
                return false;
            }
            self.dispatching.rescheduled = Some(waketime);
            return true;
        }

        match self.timers.get_mut(&id) {
            Some(entry) => {
                entry.waketime = waketime;
                true
            }
            None => false,
        }
    }

    pub fn unregister_timer(&mut self, id: TimerId) -> bool {
        if self.dispatching.id == Some(id) {
            let was_active = !self.dispatching.cancelled;
            self.dispatching.cancelled = true;
            return was_active;
        }

        self.timers.remove(&id).is_some()
    }

    #[cfg(test)]
    pub fn is_registered(&self, id: TimerId) -> bool {
        if self.dispatching.id == Some(id) {
            return !self.dispatching.cancelled;
        }
        self.timers.contains_key(&id)
    }

    pub fn timer_count(&self) -> usize {
        let running = usize::from(self.dispatching.id.is_some() && !self.dispatching.cancelled);
        self.timers.len() + running
    }

    pub fn next_waketime(&self) -> Option<Waketime> {
        self.timers
            .values()
            .map(|entry| entry.waketime)
            .filter_map(|waketime| waketime.sort_key().map(|key| (key, waketime)))
            .min_by_key(|(key, _)| *key)
            .map(|(_, waketime)| waketime)
    }

    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        match self.next_waketime()? {
            Waketime::Now => Some(Duration::ZERO),
            Waketime::At(at) => Some(at.saturating_duration_since(now)),
            Waketime::Never => None,
        }
    }

    // Runs every timer that is due at `now`, in waketime order. Timers armed or woken
    // by a callback during this pass wait for the next pass.
    pub fn run_due(&mut self, context: &mut C, now: Instant) -> usize {
        let mut due: Vec<(Option<Instant>, TimerId)> = self
            .timers
            .iter()
            .filter(|(_, entry)| entry.waketime.is_due(now))
            .filter_map(|(id, entry)| entry.waketime.sort_key().map(|key| (key, *id)))
            .collect();
        due.sort();

        let mut dispatched = 0;
        for (_, id) in due {
            let Some(mut entry) = self.timers.remove(&id) else {
                continue;
            };
            if !entry.waketime.is_due(now) {
                self.timers.insert(id, entry);
                continue;
            }

            self.dispatching = Dispatching {
                id: Some(id),
                cancelled: false,
                rescheduled: None,
            };
            let returned = (entry.callback)(context, self, now);
            let dispatching = std::mem::take(&mut self.dispatching);
            dispatched += 1;

            if dispatching.cancelled {
                continue;
            }

            let next = dispatching.rescheduled.unwrap_or(returned);
            if next != Waketime::Never {
                entry.waketime = next;
                self.timers.insert(id, entry);
            }
        }

        dispatched
    }
}

impl<C> fmt::Debug for Reactor<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("timers", &self.timers.len())
            .field("next_timer_id", &self.next_timer_id)
            .field("next_waketime", &self.next_waketime())
            .finish()
    }
}
