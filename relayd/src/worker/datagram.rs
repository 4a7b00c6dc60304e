//! QUIC listener served by one worker.

use relayd_net::ListenSocket;
use relayd_quic::{PacketDisposition, QuicDispatcher, QuicErrorCode, WorkerDispatcher};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Datagrams read from one socket before the worker moves on.
const RECV_BATCH: usize = 64;

pub struct DatagramListener {
    name: String,
    socket: Arc<ListenSocket>,
    dispatcher: QuicDispatcher<WorkerDispatcher>,
    sweep_interval: Duration,
    last_sweep: Instant,
}

impl DatagramListener {
    pub fn new(
        name: impl Into<String>,
        socket: Arc<ListenSocket>,
        dispatcher: QuicDispatcher<WorkerDispatcher>,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            socket,
            dispatcher,
            sweep_interval,
            last_sweep: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dispatcher(&self) -> &QuicDispatcher<WorkerDispatcher> {
        &self.dispatcher
    }

    /// Drain up to a batch of datagrams into the dispatcher, then run the idle
    /// sweep when it is due. Returns the number of datagrams read.
    pub fn poll(&mut self, buf: &mut [u8], now: Instant) -> usize {
        let mut received = 0;
        while received < RECV_BATCH {
            match self.socket.recv_from(buf) {
                Ok((len, peer)) => {
                    received += 1;
                    let disposition = self.dispatcher.process_packet(&peer, &buf[..len], now);
                    if let PacketDisposition::SessionCreated(id) = &disposition {
                        debug!(
                            worker_id = self.dispatcher.hooks().worker_id(),
                            listener = %self.name,
                            cid = %id,
                            %peer,
                            "quic session created"
                        );
                    } else {
                        trace!(listener = %self.name, %peer, ?disposition, "datagram dispatched");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(
                        worker_id = self.dispatcher.hooks().worker_id(),
                        listener = %self.name,
                        error = %e,
                        "datagram receive failed"
                    );
                    break;
                }
            }
        }

        if now.duration_since(self.last_sweep) >= self.sweep_interval {
            self.last_sweep = now;
            let closed = self.dispatcher.close_idle_sessions(now);
            if closed > 0 {
                debug!(
                    worker_id = self.dispatcher.hooks().worker_id(),
                    listener = %self.name,
                    closed,
                    "idle quic sessions closed"
                );
            }
        }

        received
    }

    /// Close every session; called when the worker stops.
    pub fn shutdown(&mut self) -> usize {
        self.dispatcher
            .close_all(QuicErrorCode::PeerGoingAway, "worker shutting down")
    }
}
