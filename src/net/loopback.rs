//! In-process transport over tokio channels
//!
//! The reliable path is an unbounded ordered queue. The unreliable path is a
//! small bounded queue that silently drops packets when full, which is what a
//! congested datagram link does to snapshots.

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use super::transport::{Packet, Reliability, Transport, TransportError};

/// Default unreliable queue depth
pub const UNRELIABLE_CAPACITY: usize = 64;

/// Sending half of one direction
#[derive(Debug, Clone)]
pub struct LoopbackSender {
    reliable: mpsc::UnboundedSender<Packet>,
    unreliable: mpsc::Sender<Packet>,
}

impl LoopbackSender {
    pub fn send_packet(&self, packet: Packet) -> Result<(), TransportError> {
        match packet.reliability {
            Reliability::Reliable => self
                .reliable
                .send(packet)
                .map_err(|_| TransportError::Disconnected),
            Reliability::Unreliable => match self.unreliable.try_send(packet) {
                Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
                Err(TrySendError::Closed(_)) => Err(TransportError::Disconnected),
            },
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reliable.is_closed()
    }
}

/// Receiving half of one direction
#[derive(Debug)]
pub struct LoopbackReceiver {
    reliable: mpsc::UnboundedReceiver<Packet>,
    unreliable: mpsc::Receiver<Packet>,
}

impl LoopbackReceiver {
    /// Wait for the next packet; reliable traffic is served first.
    /// Returns `None` once the sender is gone and both queues are empty.
    pub async fn recv(&mut self) -> Option<Packet> {
        tokio::select! {
            biased;
            Some(packet) = self.reliable.recv() => Some(packet),
            Some(packet) = self.unreliable.recv() => Some(packet),
            else => None,
        }
    }

    /// Drain whatever is queued without waiting
    pub fn try_drain(&mut self) -> Result<Vec<Packet>, TransportError> {
        let mut packets = Vec::new();
        let mut closed = false;

        loop {
            match self.reliable.try_recv() {
                Ok(packet) => packets.push(packet),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
        while let Ok(packet) = self.unreliable.try_recv() {
            packets.push(packet);
        }

        if closed && packets.is_empty() {
            return Err(TransportError::Disconnected);
        }
        Ok(packets)
    }
}

/// One end of a bidirectional loopback link
#[derive(Debug)]
pub struct LoopbackEnd {
    tx: LoopbackSender,
    rx: LoopbackReceiver,
}

impl LoopbackEnd {
    /// Two connected ends with the given unreliable queue depth per direction
    pub fn pair(unreliable_capacity: usize) -> (LoopbackEnd, LoopbackEnd) {
        let (a_tx, b_rx) = channel(unreliable_capacity);
        let (b_tx, a_rx) = channel(unreliable_capacity);
        (
            LoopbackEnd { tx: a_tx, rx: a_rx },
            LoopbackEnd { tx: b_tx, rx: b_rx },
        )
    }

    pub fn split(self) -> (LoopbackSender, LoopbackReceiver) {
        (self.tx, self.rx)
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }
}

fn channel(unreliable_capacity: usize) -> (LoopbackSender, LoopbackReceiver) {
    let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
    let (unreliable_tx, unreliable_rx) = mpsc::channel(unreliable_capacity.max(1));
    (
        LoopbackSender {
            reliable: reliable_tx,
            unreliable: unreliable_tx,
        },
        LoopbackReceiver {
            reliable: reliable_rx,
            unreliable: unreliable_rx,
        },
    )
}

impl Transport for LoopbackEnd {
    fn send_packet(&self, packet: Packet) -> Result<(), TransportError> {
        self.tx.send_packet(packet)
    }

    fn poll(&mut self) -> Result<Vec<Packet>, TransportError> {
        self.rx.try_drain()
    }
}
