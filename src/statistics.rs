use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use dashmap::DashMap;

/// The type of information passed in the statistics channel.
#[derive(Debug, Clone, Copy)]
pub enum Stats {
    ReceivedBytes(usize),
    ReceivedPkts(usize),
    SendBytes(usize),
    SendPkts(usize),
    DroppedPkts(usize),
}

pub trait Number {
    fn add(&self, value: usize);
    fn get(&self) -> usize;
}

#[derive(Default)]
pub struct Count(AtomicUsize);

impl Number for Count {
    fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per listener statistics.
pub struct Counts<T> {
    pub received_bytes: T,
    pub received_pkts: T,
    pub send_bytes: T,
    pub send_pkts: T,
    pub dropped_pkts: T,
}

impl<T: Number> Counts<T> {
    /// # Example
    ///
    /// ```
    /// use quic_bridge::statistics::*;
    ///
    /// let counts = Counts {
    ///     received_bytes: Count::default(),
    ///     received_pkts: Count::default(),
    ///     send_bytes: Count::default(),
    ///     send_pkts: Count::default(),
    ///     dropped_pkts: Count::default(),
    /// };
    ///
    /// counts.add(&Stats::ReceivedBytes(172));
    /// assert_eq!(counts.received_bytes.get(), 172);
    ///
    /// counts.add(&Stats::DroppedPkts(1));
    /// assert_eq!(counts.dropped_pkts.get(), 1);
    /// ```
    pub fn add(&self, payload: &Stats) {
        match payload {
            Stats::ReceivedBytes(v) => self.received_bytes.add(*v),
            Stats::ReceivedPkts(v) => self.received_pkts.add(*v),
            Stats::SendBytes(v) => self.send_bytes.add(*v),
            Stats::SendPkts(v) => self.send_pkts.add(*v),
            Stats::DroppedPkts(v) => self.dropped_pkts.add(*v),
        }
    }
}

/// Gateway wide statistics, one row per listening port.
#[derive(Clone)]
pub struct Statistics(Arc<DashMap<u16, Counts<Count>>>);

impl Default for Statistics {
    fn default() -> Self {
        Self(Arc::new(DashMap::with_capacity(16)))
    }
}

impl Statistics {
    /// Add a listening port to the watch list.
    ///
    /// # Example
    ///
    /// ```
    /// use quic_bridge::statistics::*;
    ///
    /// let statistics = Statistics::default();
    ///
    /// statistics.register(20000);
    /// assert_eq!(statistics.get(20000).is_some(), true);
    /// ```
    pub fn register(&self, port: u16) {
        self.0.insert(
            port,
            Counts {
                received_bytes: Count::default(),
                received_pkts: Count::default(),
                send_bytes: Count::default(),
                send_pkts: Count::default(),
                dropped_pkts: Count::default(),
            },
        );
    }

    /// Remove a listening port from the watch list.
    pub fn unregister(&self, port: u16) {
        self.0.remove(&port);
    }

    /// Update the counters of one port.
    ///
    /// # Example
    ///
    /// ```
    /// use quic_bridge::statistics::*;
    ///
    /// let statistics = Statistics::default();
    ///
    /// statistics.register(20000);
    /// statistics.report(20000, &[Stats::ReceivedPkts(1), Stats::ReceivedBytes(172)]);
    ///
    /// let counts = statistics.get(20000).unwrap();
    /// assert_eq!(counts.received_pkts, 1);
    /// assert_eq!(counts.received_bytes, 172);
    /// ```
    pub fn report(&self, port: u16, reports: &[Stats]) {
        if let Some(counts) = self.0.get(&port) {
            for item in reports {
                counts.add(item);
            }
        }
    }

    /// Snapshot the counters of one port.
    pub fn get(&self, port: u16) -> Option<Counts<usize>> {
        self.0.get(&port).map(|counts| Counts {
            received_bytes: counts.received_bytes.get(),
            received_pkts: counts.received_pkts.get(),
            send_bytes: counts.send_bytes.get(),
            send_pkts: counts.send_pkts.get(),
            dropped_pkts: counts.dropped_pkts.get(),
        })
    }
}
