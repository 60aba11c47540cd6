//! FIFO of user-facing messages with a minimum visible duration.
//!
//! A message removed right after being added stays visible until
//! `start + min_duration`. One timer task always targets the nearest pending
//! end time; when it fires it culls every expired message and re-arms for the
//! next one, or disarms when nothing is pending.

use std::{
    sync::{Arc, Mutex, MutexGuard, Weak},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};

const ENABLE_LOGS: bool = false;

use crate::log_debug;

/// Invoked with the ordered visible texts whenever they change. Runs under the
/// list's lock and must not call back into the list.
pub type MessagesObserver = Arc<dyn Fn(&[String]) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TimedMessage {
    /// Identity of this occurrence, independent of its text.
    pub id: u64,
    pub text: String,
    pub start: Instant,
    end: Option<Instant>,
}

impl TimedMessage {
    pub fn end(&self) -> Option<Instant> {
        self.end
    }

    fn has_expired(&self, now: Instant) -> bool {
        self.end.map(|end| now >= end).unwrap_or(false)
    }
}

struct Inner {
    messages: Vec<TimedMessage>,
    timer: Option<JoinHandle<()>>,
    /// Identifies the timer in `timer`; a task that wakes with an older value was replaced.
    timer_generation: u64,
    next_id: u64,
    min_duration: Duration,
    observer: Option<MessagesObserver>,
    published: Vec<String>,
}

#[derive(Clone)]
pub struct TimedMessageList {
    inner: Arc<Mutex<Inner>>,
}

impl TimedMessageList {
    pub fn new(min_duration: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                messages: Vec::new(),
                timer: None,
                timer_generation: 0,
                next_id: 0,
                min_duration,
                observer: None,
                published: Vec::new(),
            })),
        }
    }

    pub fn set_observer(&self, observer: MessagesObserver) {
        self.lock().observer = Some(observer);
    }

    pub fn add(&self, text: &str) {
        let mut inner = self.lock();
        if let Some(index) = inner.messages.iter().rposition(|m| m.text == text) {
            inner.messages[index].end = None;
        } else {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.messages.push(TimedMessage {
                id,
                text: text.to_string(),
                start: Instant::now(),
                end: None,
            });
        }
        self.rearm(&mut inner);
    }

    pub fn remove(&self, text: &str) {
        let mut inner = self.lock();
        let min_duration = inner.min_duration;
        let Some(index) = inner.messages.iter().rposition(|m| m.text == text) else {
            return;
        };
        let earliest = inner.messages[index].start + min_duration;
        inner.messages[index].end = Some(Instant::now().max(earliest));
        self.rearm(&mut inner);
    }

    pub fn remove_all(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.timer_generation += 1;
        inner.messages.clear();
        publish(&mut inner);
    }

    /// The message currently shown to the user.
    pub fn active_message(&self) -> Option<String> {
        self.lock().messages.first().map(|m| m.text.clone())
    }

    pub fn messages(&self) -> Vec<TimedMessage> {
        self.lock().messages.clone()
    }

    pub fn is_timer_armed(&self) -> bool {
        self.lock().timer.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn rearm(&self, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        arm_timer(Arc::downgrade(&self.inner), inner);
    }
}

fn arm_timer(weak: Weak<Mutex<Inner>>, inner: &mut Inner) {
    inner.timer_generation += 1;
    let generation = inner.timer_generation;
    let now = Instant::now();
    inner.messages.retain(|m| !m.has_expired(now));
    publish(inner);

    let Some(nearest) = inner.messages.iter().filter_map(|m| m.end).min() else {
        return;
    };

    log_debug!("feedback timer armed for {:?}", nearest.saturating_duration_since(now));
    inner.timer = Some(tokio::spawn(async move {
        tokio::time::sleep_until(nearest).await;
        fire_timer(&weak, generation);
    }));
}

/// Culls expired messages and re-arms, unless a newer timer has replaced the
/// one identified by `generation`.
fn fire_timer(weak: &Weak<Mutex<Inner>>, generation: u64) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let mut inner = match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if inner.timer_generation != generation {
        log_debug!("feedback timer {generation} was superseded");
        return;
    }
    // This task is the armed timer; detach it instead of aborting itself.
    inner.timer.take();
    arm_timer(Arc::downgrade(&shared), &mut inner);
}

fn publish(inner: &mut Inner) {
    let texts: Vec<String> = inner.messages.iter().map(|m| m.text.clone()).collect();
    if texts == inner.published {
        return;
    }
    inner.published = texts;
    if let Some(observer) = inner.observer.clone() {
        observer(&inner.published);
    }
}
