//! APEX port services consumed by the transport drivers.
//!
//! The partition OS is reached through the [`Apex`] trait: sampling and
//! queuing port creation plus the four message calls, with ARINC-653 return
//! codes. Reads are non-blocking (zero timeout) and writes fire-and-forget —
//! there are no suspension points inside a cycle.
//!
//! [`MemApex`] is the simulator fabric: an in-memory channel per port name,
//! used by `iom-sim` and the end-to-end tests.

use std::collections::{HashMap, VecDeque};

pub type PortId = i32;

/// Port id value that no APEX implementation hands out.
pub const INVALID_PORT: PortId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Source,
    Destination,
}

/// ARINC-653 return codes surfaced to the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnCode {
    NoError,
    NoAction,
    NotAvailable,
    /// Port already exists on create; queue overflow on receive (a message
    /// was still delivered when the reported length is non-zero).
    InvalidConfig,
    InvalidParam,
}

/// Sampling message age indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleValidity {
    Valid,
    Invalid,
}

/// Kind of a routed port table entry. Tables are terminated by
/// [`RoutedPortKind::Terminator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutedPortKind {
    RxA,
    RxB,
    TxA,
    TxB,
    RoutingTx,
    Terminator,
}

/// Partition OS services used by the I/O manager.
pub trait Apex {
    fn create_sampling_port(
        &mut self,
        name: &str,
        max_len: u32,
        dir: PortDirection,
        refresh_ns: i64,
    ) -> Result<PortId, ReturnCode>;

    fn create_queuing_port(
        &mut self,
        name: &str,
        max_len: u32,
        queue_len: u32,
        dir: PortDirection,
    ) -> Result<PortId, ReturnCode>;

    /// Handle of an already-created queuing port, for idempotent creation of
    /// shared routing ports.
    fn get_queuing_port_id(&self, name: &str) -> Option<PortId>;

    fn read_sampling_message(&mut self, port: PortId, buf: &mut [u8])
        -> (usize, SampleValidity, ReturnCode);

    fn receive_queuing_message(&mut self, port: PortId, buf: &mut [u8]) -> (usize, ReturnCode);

    fn write_sampling_message(&mut self, port: PortId, msg: &[u8]) -> ReturnCode;

    fn send_queuing_message(&mut self, port: PortId, msg: &[u8]) -> ReturnCode;
}

// ---------------------------------------------------------------------------
// In-memory fabric
// ---------------------------------------------------------------------------

struct Channel {
    queue_len: usize,
    sample: Vec<u8>,
    sample_fresh: bool,
    queue: VecDeque<Vec<u8>>,
    overflowed: bool,
}

impl Channel {
    fn new(queue_len: usize) -> Channel {
        Channel {
            queue_len: queue_len.max(1),
            sample: Vec::new(),
            sample_fresh: false,
            queue: VecDeque::new(),
            overflowed: false,
        }
    }
}

struct PortEntry {
    name: String,
    dir: PortDirection,
    channel: usize,
}

/// In-memory port fabric: every port name is one channel, a Source and a
/// Destination endpoint on the same name are connected back-to-back.
#[derive(Default)]
pub struct MemApex {
    ports: Vec<PortEntry>,
    channels: Vec<Channel>,
    by_name: HashMap<String, usize>,
}

impl MemApex {
    pub fn new() -> MemApex {
        MemApex::default()
    }

    fn channel_for(&mut self, name: &str, queue_len: usize) -> usize {
        if let Some(&idx) = self.by_name.get(name) {
            return idx;
        }
        self.channels.push(Channel::new(queue_len));
        let idx = self.channels.len() - 1;
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    fn add_port(&mut self, name: &str, dir: PortDirection, channel: usize) -> Result<PortId, ReturnCode> {
        if self
            .ports
            .iter()
            .any(|p| p.name == name && p.dir == dir)
        {
            return Err(ReturnCode::InvalidConfig);
        }
        self.ports.push(PortEntry {
            name: name.to_string(),
            dir,
            channel,
        });
        Ok(self.ports.len() as PortId)
    }

    fn channel_of(&mut self, port: PortId) -> Option<usize> {
        if port <= 0 {
            return None;
        }
        self.ports.get(port as usize - 1).map(|p| p.channel)
    }

    // -- test / simulator side ---------------------------------------------

    /// Deliver a sampling message into a named channel, as the network would.
    pub fn inject_sampling(&mut self, name: &str, msg: &[u8]) {
        let idx = self.channel_for(name, 1);
        let ch = &mut self.channels[idx];
        ch.sample = msg.to_vec();
        ch.sample_fresh = true;
    }

    /// Deliver a queuing message into a named channel.
    pub fn inject_queuing(&mut self, name: &str, msg: &[u8]) {
        let idx = self.channel_for(name, 64);
        self.channels[idx].queue.push_back(msg.to_vec());
    }

    /// Take everything queued on a named channel (what the IOM transmitted).
    pub fn drain(&mut self, name: &str) -> Vec<Vec<u8>> {
        match self.by_name.get(name) {
            Some(&idx) => self.channels[idx].queue.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Last sampling message written to a named channel.
    pub fn sample(&self, name: &str) -> Option<&[u8]> {
        self.by_name
            .get(name)
            .map(|&idx| self.channels[idx].sample.as_slice())
            .filter(|s| !s.is_empty())
    }
}

impl Apex for MemApex {
    fn create_sampling_port(
        &mut self,
        name: &str,
        _max_len: u32,
        dir: PortDirection,
        _refresh_ns: i64,
    ) -> Result<PortId, ReturnCode> {
        let channel = self.channel_for(name, 1);
        self.add_port(name, dir, channel)
    }

    fn create_queuing_port(
        &mut self,
        name: &str,
        _max_len: u32,
        queue_len: u32,
        dir: PortDirection,
    ) -> Result<PortId, ReturnCode> {
        let channel = self.channel_for(name, queue_len as usize);
        self.add_port(name, dir, channel)
    }

    fn get_queuing_port_id(&self, name: &str) -> Option<PortId> {
        self.ports
            .iter()
            .position(|p| p.name == name && p.dir == PortDirection::Source)
            .map(|i| (i + 1) as PortId)
    }

    fn read_sampling_message(
        &mut self,
        port: PortId,
        buf: &mut [u8],
    ) -> (usize, SampleValidity, ReturnCode) {
        let Some(idx) = self.channel_of(port) else {
            return (0, SampleValidity::Invalid, ReturnCode::InvalidParam);
        };
        let ch = &mut self.channels[idx];
        if ch.sample.is_empty() {
            return (0, SampleValidity::Invalid, ReturnCode::NoError);
        }
        let len = ch.sample.len().min(buf.len());
        buf[..len].copy_from_slice(&ch.sample[..len]);
        let validity = if ch.sample_fresh {
            SampleValidity::Valid
        } else {
            SampleValidity::Invalid
        };
        ch.sample_fresh = false;
        (len, validity, ReturnCode::NoError)
    }

    fn receive_queuing_message(&mut self, port: PortId, buf: &mut [u8]) -> (usize, ReturnCode) {
        let Some(idx) = self.channel_of(port) else {
            return (0, ReturnCode::InvalidParam);
        };
        let ch = &mut self.channels[idx];
        match ch.queue.pop_front() {
            Some(msg) => {
                let len = msg.len().min(buf.len());
                buf[..len].copy_from_slice(&msg[..len]);
                let code = if ch.overflowed {
                    ch.overflowed = false;
                    ReturnCode::InvalidConfig
                } else {
                    ReturnCode::NoError
                };
                (len, code)
            }
            None => (0, ReturnCode::NotAvailable),
        }
    }

    fn write_sampling_message(&mut self, port: PortId, msg: &[u8]) -> ReturnCode {
        let Some(idx) = self.channel_of(port) else {
            return ReturnCode::InvalidParam;
        };
        let ch = &mut self.channels[idx];
        ch.sample = msg.to_vec();
        ch.sample_fresh = true;
        ReturnCode::NoError
    }

    fn send_queuing_message(&mut self, port: PortId, msg: &[u8]) -> ReturnCode {
        let Some(idx) = self.channel_of(port) else {
            return ReturnCode::InvalidParam;
        };
        let ch = &mut self.channels[idx];
        if ch.queue.len() >= ch.queue_len {
            ch.overflowed = true;
            return ReturnCode::InvalidConfig;
        }
        ch.queue.push_back(msg.to_vec());
        ReturnCode::NoError
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_roundtrip_and_freshness() {
        let mut apex = MemApex::new();
        let dst = apex
            .create_sampling_port("CHAN", 16, PortDirection::Destination, 16_000_000)
            .unwrap();

        apex.inject_sampling("CHAN", &[1, 2, 3]);
        let mut buf = [0u8; 16];
        let (len, validity, code) = apex.read_sampling_message(dst, &mut buf);
        assert_eq!((len, validity, code), (3, SampleValidity::Valid, ReturnCode::NoError));
        assert_eq!(&buf[..3], &[1, 2, 3]);

        // Re-reading without a new injection is stale.
        let (_, validity, _) = apex.read_sampling_message(dst, &mut buf);
        assert_eq!(validity, SampleValidity::Invalid);
    }

    #[test]
    fn test_queuing_fifo_and_empty() {
        let mut apex = MemApex::new();
        let dst = apex
            .create_queuing_port("Q", 16, 4, PortDirection::Destination)
            .unwrap();
        apex.inject_queuing("Q", &[1]);
        apex.inject_queuing("Q", &[2]);

        let mut buf = [0u8; 4];
        assert_eq!(apex.receive_queuing_message(dst, &mut buf).0, 1);
        assert_eq!(buf[0], 1);
        assert_eq!(apex.receive_queuing_message(dst, &mut buf).0, 1);
        assert_eq!(buf[0], 2);
        assert_eq!(
            apex.receive_queuing_message(dst, &mut buf).1,
            ReturnCode::NotAvailable
        );
    }

    #[test]
    fn test_duplicate_create_rejected_and_lookup() {
        let mut apex = MemApex::new();
        let id = apex
            .create_queuing_port("TX", 16, 4, PortDirection::Source)
            .unwrap();
        assert!(apex
            .create_queuing_port("TX", 16, 4, PortDirection::Source)
            .is_err());
        assert_eq!(apex.get_queuing_port_id("TX"), Some(id));
        assert_eq!(apex.get_queuing_port_id("NOPE"), None);
    }

    #[test]
    fn test_send_drain() {
        let mut apex = MemApex::new();
        let tx = apex
            .create_queuing_port("OUT", 16, 2, PortDirection::Source)
            .unwrap();
        apex.send_queuing_message(tx, &[9, 9]);
        let sent = apex.drain("OUT");
        assert_eq!(sent, vec![vec![9, 9]]);
    }
}
