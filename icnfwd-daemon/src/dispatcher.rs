//! The single-threaded event loop.
//!
//! The dispatcher owns the event channel every connector feeds, a 1 ms
//! tick that advances the forwarder's timebase, the timer wheel, and the
//! termination signals. Every callback runs to completion on this thread
//! before the next one starts; that serialization is the forwarder's
//! entire concurrency model. Other threads may only talk to the loop by
//! sending on the event channel or through a [`StopHandle`].

use crate::connections::{ConnKind, ConnectionSink};
use crate::control::ControlReply;
use crate::forwarder::Forwarder;
use anyhow::{Context, Result};
use bytes::Bytes;
use icnfwd_common::{ConnectionId, Ticks};
use log::{debug, info};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, oneshot, watch, Notify};

/// Everything a connector can hand to the forwarder.
pub enum Event {
    /// One framed packet from an established stream connection.
    Frame {
        connection: ConnectionId,
        bytes: Bytes,
    },
    /// A datagram; the connection is resolved (or created) from the peer
    /// address, replying through `writer`.
    Datagram {
        local: SocketAddr,
        peer: SocketAddr,
        bytes: Bytes,
        writer: mpsc::Sender<(SocketAddr, Bytes)>,
    },
    /// A stream peer appeared (inbound accept or outbound connect); the
    /// connector waits on `id_tx` for its assigned connection id.
    StreamOpened {
        name: Option<String>,
        kind: ConnKind,
        peer: SocketAddr,
        sink: Box<dyn ConnectionSink>,
        id_tx: oneshot::Sender<ConnectionId>,
    },
    /// EOF or error on a stream connection.
    StreamClosed { connection: ConnectionId },
    /// One control-plane command line awaiting an ack/nack.
    Control {
        line: String,
        reply: oneshot::Sender<ControlReply>,
    },
}

pub type TimerId = usize;

type TimerCallback = Box<dyn FnMut(&mut Forwarder, &mut Timers)>;

struct TimerEntry {
    callback: Option<TimerCallback>,
    periodic: bool,
    period_ms: u64,
    deadline: Option<Ticks>,
}

/// The timer wheel. Callbacks run on the dispatcher thread, serialized
/// with everything else; a callback may start, stop, or destroy timers,
/// including its own.
pub struct Timers {
    now: Ticks,
    next_id: TimerId,
    entries: HashMap<TimerId, TimerEntry>,
    heap: BinaryHeap<Reverse<(Ticks, TimerId)>>,
}

impl Timers {
    fn new() -> Self {
        Self {
            now: 0,
            next_id: 0,
            entries: HashMap::new(),
            heap: BinaryHeap::new(),
        }
    }

    /// Register a timer; it is idle until [`Timers::start_timer`].
    pub fn create_timer(
        &mut self,
        periodic: bool,
        callback: impl FnMut(&mut Forwarder, &mut Timers) + 'static,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            id,
            TimerEntry {
                callback: Some(Box::new(callback)),
                periodic,
                period_ms: 0,
                deadline: None,
            },
        );
        id
    }

    /// Arm a timer `delay` from now. A periodic timer keeps firing with
    /// this delay until stopped.
    pub fn start_timer(&mut self, id: TimerId, delay: Duration) {
        let period_ms = (delay.as_millis() as u64).max(1);
        let deadline = self.now + period_ms;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.period_ms = period_ms;
            entry.deadline = Some(deadline);
            self.heap.push(Reverse((deadline, id)));
        }
    }

    pub fn stop_timer(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.deadline = None;
        }
    }

    pub fn destroy_timer(&mut self, id: TimerId) {
        self.entries.remove(&id);
    }

    fn set_now(&mut self, now: Ticks) {
        self.now = now;
    }

    fn fire_due(&mut self, forwarder: &mut Forwarder) {
        loop {
            let Some(&Reverse((deadline, id))) = self.heap.peek() else {
                break;
            };
            if deadline > self.now {
                break;
            }
            self.heap.pop();

            // Heap items are never removed eagerly; skip ones that no
            // longer match the entry's armed deadline.
            let armed = self
                .entries
                .get(&id)
                .is_some_and(|entry| entry.deadline == Some(deadline));
            if !armed {
                continue;
            }

            let (callback, periodic) = {
                let entry = self.entries.get_mut(&id).expect("armed entry exists");
                entry.deadline = None;
                (entry.callback.take(), entry.periodic)
            };
            let Some(mut callback) = callback else {
                continue;
            };
            callback(forwarder, self);
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.callback = Some(callback);
                if periodic && entry.deadline.is_none() {
                    let deadline = self.now + entry.period_ms.max(1);
                    entry.deadline = Some(deadline);
                    self.heap.push(Reverse((deadline, id)));
                }
            }
        }
    }
}

/// Cross-thread remote control for a running dispatcher.
#[derive(Clone)]
pub struct StopHandle {
    stop: Arc<Notify>,
    stopped: watch::Receiver<bool>,
}

impl StopHandle {
    /// Ask the loop to stop. Safe from any thread; does not block.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    /// Resolve once the loop has exited.
    pub async fn wait_stopped(&mut self) {
        while !*self.stopped.borrow() {
            if self.stopped.changed().await.is_err() {
                break;
            }
        }
    }
}

pub struct Dispatcher {
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    timers: Timers,
    stop: Arc<Notify>,
    stopped_tx: watch::Sender<bool>,
    stopped_rx: watch::Receiver<bool>,
    start: Instant,
}

/// Tick granularity of the forwarder clock.
const TICK: Duration = Duration::from_millis(1);

impl Dispatcher {
    pub fn new(queue_depth: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(queue_depth);
        let (stopped_tx, stopped_rx) = watch::channel(false);
        Self {
            events_tx,
            events_rx,
            timers: Timers::new(),
            stop: Arc::new(Notify::new()),
            stopped_tx,
            stopped_rx,
            start: Instant::now(),
        }
    }

    /// The channel connectors feed.
    pub fn events_sender(&self) -> mpsc::Sender<Event> {
        self.events_tx.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            stop: self.stop.clone(),
            stopped: self.stopped_rx.clone(),
        }
    }

    pub fn timers_mut(&mut self) -> &mut Timers {
        &mut self.timers
    }

    /// Run until a signal or [`StopHandle::stop`].
    pub async fn run(&mut self, forwarder: &mut Forwarder) -> Result<()> {
        self.run_inner(forwarder, None).await
    }

    /// Run for at most `duration`; may be called repeatedly.
    pub async fn run_duration(
        &mut self,
        forwarder: &mut Forwarder,
        duration: Duration,
    ) -> Result<()> {
        self.run_inner(forwarder, Some(Instant::now() + duration))
            .await
    }

    async fn run_inner(
        &mut self,
        forwarder: &mut Forwarder,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        let mut tick = tokio::time::interval(TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let far_future = Instant::now() + Duration::from_secs(3600 * 24 * 365);
        let until = tokio::time::sleep_until(deadline.unwrap_or(far_future).into());
        tokio::pin!(until);

        loop {
            tokio::select! {
                biased;
                _ = self.stop.notified() => {
                    debug!("dispatcher: stop requested");
                    break;
                }
                _ = sigint.recv() => {
                    info!("dispatcher: SIGINT");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("dispatcher: SIGTERM");
                    break;
                }
                _ = &mut until, if deadline.is_some() => {
                    break;
                }
                _ = tick.tick() => {
                    let now = self.start.elapsed().as_millis() as Ticks;
                    forwarder.on_tick(now);
                    self.timers.set_now(now);
                    self.timers.fire_due(forwarder);
                }
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => forwarder.handle_event(event),
                        None => break,
                    }
                }
            }
        }

        let _ = self.stopped_tx.send(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icnfwd_common::metrics::ForwarderMetrics;
    use std::cell::Cell;
    use std::rc::Rc;

    fn forwarder(dispatcher: &Dispatcher) -> Forwarder {
        Forwarder::new(
            dispatcher.events_sender(),
            4,
            Arc::new(ForwarderMetrics::new()),
        )
    }

    #[test]
    fn one_shot_and_periodic_timers() {
        let dispatcher = Dispatcher::new(4);
        let mut fwd = forwarder(&dispatcher);
        let mut timers = Timers::new();

        let once_fired = Rc::new(Cell::new(0u32));
        let fired = once_fired.clone();
        let once = timers.create_timer(false, move |_fwd, _timers| {
            fired.set(fired.get() + 1);
        });
        let periodic_fired = Rc::new(Cell::new(0u32));
        let fired = periodic_fired.clone();
        let periodic = timers.create_timer(true, move |_fwd, _timers| {
            fired.set(fired.get() + 1);
        });

        timers.start_timer(once, Duration::from_millis(10));
        timers.start_timer(periodic, Duration::from_millis(10));

        for now in [5, 10, 20, 30] {
            timers.set_now(now);
            timers.fire_due(&mut fwd);
        }
        assert_eq!(once_fired.get(), 1, "one-shot fires exactly once");
        assert_eq!(periodic_fired.get(), 3, "periodic fires every 10ms");

        timers.stop_timer(periodic);
        timers.set_now(100);
        timers.fire_due(&mut fwd);
        assert_eq!(periodic_fired.get(), 3, "stopped timer stays quiet");
    }

    #[test]
    fn callbacks_may_destroy_their_own_timer() {
        let dispatcher = Dispatcher::new(4);
        let mut fwd = forwarder(&dispatcher);
        let mut timers = Timers::new();

        let fired = Rc::new(Cell::new(0u32));
        let count = fired.clone();
        let id = Rc::new(Cell::new(0usize));
        let own_id = id.clone();
        let timer = timers.create_timer(true, move |_fwd, timers| {
            count.set(count.get() + 1);
            timers.destroy_timer(own_id.get());
        });
        id.set(timer);
        timers.start_timer(timer, Duration::from_millis(1));

        for now in 1..10 {
            timers.set_now(now);
            timers.fire_due(&mut fwd);
        }
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn run_duration_returns_and_stop_handle_interrupts_run() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let local = tokio::task::LocalSet::new();
        runtime.block_on(local.run_until(async {
            let mut dispatcher = Dispatcher::new(16);
            let mut fwd = forwarder(&dispatcher);

            let ticked = Rc::new(Cell::new(0u32));
            let count = ticked.clone();
            let timer = dispatcher.timers_mut().create_timer(true, move |_fwd, _timers| {
                count.set(count.get() + 1);
            });
            dispatcher
                .timers_mut()
                .start_timer(timer, Duration::from_millis(5));

            dispatcher
                .run_duration(&mut fwd, Duration::from_millis(80))
                .await
                .unwrap();
            assert!(ticked.get() >= 2, "periodic timer ran under the loop");

            // A stop handle fired from a concurrent task ends run().
            let handle = dispatcher.stop_handle();
            let stopper = handle.clone();
            tokio::task::spawn_local(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stopper.stop();
            });
            dispatcher.run(&mut fwd).await.unwrap();

            let mut handle = handle;
            handle.wait_stopped().await;
        }));
    }
}
