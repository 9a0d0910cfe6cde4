#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Frame queues between the USB task and the tasks speaking over each port.
//!
//! A [`SerialPort`] pairs an inbound and an outbound channel with a flag the
//! USB task raises while the host holds DTR. Writers check the flag so that
//! nothing queues up for a port with no reader on the other end.

use embassy_sync::channel::{Channel, Receiver, Sender};
use portable_atomic::{AtomicBool, Ordering};

#[cfg(not(target_os = "none"))]
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
#[cfg(target_os = "none")]
use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;

use crate::feedback::{CUE_QUEUE_DEPTH, Cue};
use crate::line::{self, Frame};

#[cfg(target_os = "none")]
pub type PortMutex = ThreadModeRawMutex;
#[cfg(not(target_os = "none"))]
pub type PortMutex = NoopRawMutex;

/// Depth of each frame channel; deep enough for one full QR echo.
pub const PORT_QUEUE_DEPTH: usize = 12;

pub type FrameChannel = Channel<PortMutex, Frame, PORT_QUEUE_DEPTH>;

pub type CueChannel = Channel<PortMutex, Cue, CUE_QUEUE_DEPTH>;
pub type CueSender<'a> = Sender<'a, PortMutex, Cue, CUE_QUEUE_DEPTH>;
pub type CueReceiver<'a> = Receiver<'a, PortMutex, Cue, CUE_QUEUE_DEPTH>;

/// One CDC interface as seen by the application tasks.
pub struct SerialPort {
    /// Frames read from the host.
    pub rx: FrameChannel,
    /// Frames waiting to be written to the host.
    pub tx: FrameChannel,
    connected: AtomicBool,
}

impl SerialPort {
    pub const fn new() -> Self {
        Self {
            rx: Channel::new(),
            tx: Channel::new(),
            connected: AtomicBool::new(false),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Queues `text` without waiting. Returns `false` if any frame was dropped.
    pub fn try_write(&self, text: &str) -> bool {
        for frame in line::frames(text) {
            if self.tx.try_send(frame).is_err() {
                return false;
            }
        }
        true
    }

    /// Queues `text`, waiting for room as the USB task drains the channel.
    pub async fn write(&self, text: &str) {
        for frame in line::frames(text) {
            self.tx.send(frame).await;
        }
    }

    /// Drops every inbound frame and returns how many there were.
    pub fn discard_input(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_receive().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// Drops every outbound frame.
    pub fn discard_output(&self) {
        while self.tx.try_receive().is_ok() {}
    }
}
