//! An adapter bridging the ports of a rank to a foreign endpoint living in
//! the same process.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::time::{Interval, TimeGrid};

use super::{Adapter, PortData, PortError, PortSpec};

/// Data published by the kernel on an outbound port.
#[derive(Clone, Debug, PartialEq)]
pub struct Published {
    /// Interval at the end of which the data was published.
    pub interval: Interval,
    /// Name of the port.
    pub port: String,
    /// Published data.
    pub data: PortData,
}

/// Creates a connected pair of adapter and foreign endpoint.
pub fn channel_adapter() -> (ChannelAdapter, ForeignEndpoint) {
    let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded();
    let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
    let ports = Arc::new(Mutex::new(Vec::new()));

    (
        ChannelAdapter {
            outbound: outbound_tx,
            inbound: inbound_rx,
            pending: HashMap::new(),
            ports: ports.clone(),
            max_width: None,
        },
        ForeignEndpoint {
            inbound: outbound_rx,
            outbound: inbound_tx,
            ports,
        },
    )
}

/// Kernel side of a channel-based coupling.
pub struct ChannelAdapter {
    outbound: Sender<Published>,
    inbound: Receiver<(String, PortData)>,
    pending: HashMap<String, Vec<PortData>>,
    ports: Arc<Mutex<Vec<PortSpec>>>,
    max_width: Option<usize>,
}

impl ChannelAdapter {
    /// Rejects during negotiation any port wider than `max_width`.
    pub fn with_max_width(mut self, max_width: usize) -> Self {
        self.max_width = Some(max_width);

        self
    }

    fn collect_inbound(&mut self) {
        for (port, data) in self.inbound.try_iter() {
            self.pending.entry(port).or_default().push(data);
        }
    }
}

impl Adapter for ChannelAdapter {
    fn negotiate(&mut self, ports: &[PortSpec], _grid: &TimeGrid) -> Result<(), PortError> {
        if let Some(max_width) = self.max_width {
            if let Some(port) = ports.iter().find(|p| p.width > max_width) {
                return Err(PortError::Rejected(format!(
                    "port '{}' is wider than {}",
                    port.name, max_width
                )));
            }
        }
        *self.ports.lock().unwrap() = ports.to_vec();

        Ok(())
    }

    fn publish(
        &mut self,
        interval: Interval,
        port: &PortSpec,
        data: PortData,
    ) -> Result<(), PortError> {
        self.outbound
            .send(Published {
                interval,
                port: port.name.clone(),
                data,
            })
            .map_err(|_| PortError::Disconnected)
    }

    /// Returns the data sent for the port since the previous poll: the latest
    /// vector for continuous ports, all events or messages in sending order
    /// otherwise.
    fn poll(&mut self, _interval: Interval, port: &PortSpec) -> Result<Option<PortData>, PortError> {
        self.collect_inbound();

        let Some(batches) = self.pending.remove(&port.name) else {
            return Ok(None);
        };
        let mut merged: Option<PortData> = None;
        for data in batches {
            if data.kind() != port.kind {
                return Err(PortError::KindMismatch {
                    expected: port.kind,
                    found: data.kind(),
                });
            }
            merged = Some(match (merged, data) {
                (Some(PortData::Events(mut all)), PortData::Events(events)) => {
                    all.extend(events);
                    PortData::Events(all)
                }
                (Some(PortData::Messages(mut all)), PortData::Messages(messages)) => {
                    all.extend(messages);
                    PortData::Messages(all)
                }
                (_, data) => data,
            });
        }

        Ok(merged)
    }
}

impl fmt::Debug for ChannelAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelAdapter")
            .field("max_width", &self.max_width)
            .finish_non_exhaustive()
    }
}

/// Foreign side of a channel-based coupling.
pub struct ForeignEndpoint {
    inbound: Receiver<Published>,
    outbound: Sender<(String, PortData)>,
    ports: Arc<Mutex<Vec<PortSpec>>>,
}

impl ForeignEndpoint {
    /// Returns the negotiated ports, or an empty list before negotiation.
    pub fn ports(&self) -> Vec<PortSpec> {
        self.ports.lock().unwrap().clone()
    }

    /// Sends data to an inbound port of the kernel.
    ///
    /// The data is picked up at the end of the current interval.
    pub fn send(&self, port: &str, data: PortData) -> Result<(), PortError> {
        if !self.ports.lock().unwrap().iter().any(|p| p.name == port) {
            return Err(PortError::UnknownPort(port.to_string()));
        }

        self.outbound
            .send((port.to_string(), data))
            .map_err(|_| PortError::Disconnected)
    }

    /// Returns the next published data if any is available.
    pub fn try_recv(&self) -> Option<Published> {
        self.inbound.try_recv().ok()
    }

    /// Waits for the next published data, up to a timeout.
    ///
    /// Returns `None` on timeout or once the kernel is gone and all published
    /// data was received.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Published> {
        self.inbound.recv_timeout(timeout).ok()
    }

    /// Returns all data published so far and not yet received.
    pub fn drain(&self) -> Vec<Published> {
        self.inbound.try_iter().collect()
    }
}

impl fmt::Debug for ForeignEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignEndpoint").finish_non_exhaustive()
    }
}
