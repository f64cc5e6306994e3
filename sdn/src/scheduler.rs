use std::collections::VecDeque;
use std::time::Duration;

use crate::concepts::message::MessageHeader;
use crate::concepts::packet::PKT_HEADER_SIZE;
use crate::framework::{Clock, RoutingSystem, TimerEvent};

/// The send queue and the two protocol timers.
///
/// Messages wait here until the flush timer fires; the timer is armed by
/// the first enqueue of a burst and never rescheduled by later enqueues,
/// so everything queued inside the window leaves together. The hello timer
/// lives here too so that disposal can cancel both in one place.
pub struct MessageScheduler<T: RoutingSystem + ?Sized> {
    queue: VecDeque<MessageHeader>,
    flush_timer: Option<T::TimerHandle>,
    hello_timer: Option<T::TimerHandle>,
}

impl<T: RoutingSystem + ?Sized> Default for MessageScheduler<T> {
    fn default() -> Self {
        MessageScheduler {
            queue: VecDeque::new(),
            flush_timer: None,
            hello_timer: None,
        }
    }
}

impl<T: RoutingSystem + ?Sized> MessageScheduler<T> {
    pub fn new() -> Self {
        MessageScheduler::default()
    }

    /// Number of messages waiting for the next flush.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Appends `message` and arms the flush timer with `delay` unless a
    /// flush is already pending.
    pub fn enqueue(&mut self, clock: &mut T::Clock, message: MessageHeader, delay: Duration) {
        self.queue.push_back(message);
        if self.flush_timer.is_none() {
            self.flush_timer = Some(clock.schedule_after(delay, TimerEvent::FlushQueue));
        }
    }

    /// Takes every queued message in enqueue order and clears the flush
    /// slot. Called when the flush timer fires.
    pub fn drain(&mut self) -> Vec<MessageHeader> {
        self.flush_timer = None;
        self.queue.drain(..).collect()
    }

    /// (Re-)arms the hello timer. The previous handle, if any, has either
    /// fired already or is being replaced deliberately.
    pub fn start_hello(&mut self, clock: &mut T::Clock, interval: Duration) {
        self.hello_timer = Some(clock.schedule_after(interval, TimerEvent::Hello));
    }

    /// Cancels both timers and discards the queue without sending.
    pub fn cancel_all(&mut self, clock: &mut T::Clock) {
        if let Some(timer) = self.flush_timer.take() {
            clock.cancel(timer);
        }
        if let Some(timer) = self.hello_timer.take() {
            clock.cancel(timer);
        }
        self.queue.clear();
    }
}

/// Greedy packing of drained messages into frames of at most
/// `max_packet_size` bytes, preserving order. A frame always carries at
/// least one message, even one that alone exceeds the cap.
pub fn partition(messages: Vec<MessageHeader>, max_packet_size: usize) -> Vec<Vec<MessageHeader>> {
    let mut frames = Vec::new();
    let mut current = Vec::new();
    let mut size = PKT_HEADER_SIZE;
    for message in messages {
        let message_size = message.serialized_size();
        if !current.is_empty() && size + message_size > max_packet_size {
            frames.push(std::mem::take(&mut current));
            size = PKT_HEADER_SIZE;
        }
        size += message_size;
        current.push(message);
    }
    if !current.is_empty() {
        frames.push(current);
    }
    frames
}
