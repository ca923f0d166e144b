//! Engine thread.
//!
//! Connection threads never touch tracker state. They send a [`Command`]
//! down a channel to the one thread that owns the [`Tracker`], which also
//! wakes itself for debounced saves and the periodic sweep.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tabtrail_protocol::EventEnvelope;

use crate::engine::{Tracker, TrackerHealth};
use crate::types::CurrentData;

pub enum Command {
    Event(EventEnvelope),
    Health(Sender<TrackerHealth>),
    CurrentData(Sender<CurrentData>),
    Clear(Sender<()>),
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
#[error("tracker engine is not running")]
pub struct EngineGone;

#[derive(Clone)]
pub struct EngineHandle {
    sender: Sender<Command>,
}

impl EngineHandle {
    /// Queues an event. Events are processed in the order they are sent.
    pub fn send_event(&self, event: EventEnvelope) -> Result<(), EngineGone> {
        self.sender
            .send(Command::Event(event))
            .map_err(|_| EngineGone)
    }

    pub fn health(&self) -> Result<TrackerHealth, EngineGone> {
        self.request(Command::Health)
    }

    pub fn current_data(&self) -> Result<CurrentData, EngineGone> {
        self.request(Command::CurrentData)
    }

    pub fn clear(&self) -> Result<(), EngineGone> {
        self.request(Command::Clear)
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
    }

    fn request<T>(&self, command: impl FnOnce(Sender<T>) -> Command) -> Result<T, EngineGone> {
        let (reply, response) = mpsc::channel();
        self.sender.send(command(reply)).map_err(|_| EngineGone)?;
        response.recv().map_err(|_| EngineGone)
    }
}

pub fn spawn_engine(tracker: Tracker) -> std::io::Result<(EngineHandle, JoinHandle<()>)> {
    let (sender, receiver) = mpsc::channel();
    let join = thread::Builder::new()
        .name("tabtrail-engine".to_string())
        .spawn(move || run_engine(tracker, receiver))?;
    Ok((EngineHandle { sender }, join))
}

fn run_engine(mut tracker: Tracker, receiver: Receiver<Command>) {
    loop {
        let received = match tracker.time_until_next_deadline() {
            Some(timeout) => receiver.recv_timeout(timeout),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Shutdown) => break,
            Ok(command) => handle_command(&mut tracker, command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        tracker.run_due_timers();
    }

    tracker.teardown();
}

fn handle_command(tracker: &mut Tracker, command: Command) {
    match command {
        Command::Event(event) => tracker.handle_event(&event),
        Command::Health(reply) => {
            let _ = reply.send(tracker.health());
        }
        Command::CurrentData(reply) => {
            let _ = reply.send(tracker.current_data());
        }
        Command::Clear(reply) => {
            tracker.clear_data();
            let _ = reply.send(());
        }
        Command::Shutdown => {}
    }
}
