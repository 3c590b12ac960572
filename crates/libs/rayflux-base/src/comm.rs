//! Message passing between mesh partitions (ranks).
//!
//! Every rank owns one [`Communicator`] endpoint. Payloads are opaque byte
//! buffers; [`encode`] and [`decode`] turn serialisable records into buffers
//! with `bincode`. Collective operations (barrier and reductions) block until
//! every rank of the world has reached them.

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::{Arc, Barrier, Mutex, PoisonError};

/// Errors raised by rank communication.
#[derive(Debug, thiserror::Error)]
pub enum CommError {
    /// The peer endpoint has been dropped.
    #[error("Channel between rank {from} and rank {to} is disconnected")]
    Disconnected {
        /// Sending rank.
        from: usize,
        /// Receiving rank.
        to: usize,
    },

    /// The rank is outside the world or addresses the calling rank itself.
    #[error("Invalid peer rank {rank} (world size {size}, caller {caller})")]
    InvalidRank {
        /// Requested peer.
        rank: usize,
        /// World size.
        size: usize,
        /// Calling rank.
        caller: usize,
    },

    /// A record could not be encoded.
    #[error("Failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    /// A buffer could not be decoded into the expected record.
    #[error("Failed to decode message: {0}")]
    Decode(#[source] bincode::Error),
}

/// Point-to-point and collective communication between ranks.
pub trait Communicator: Send + Sync {
    /// Rank of the caller.
    fn rank(&self) -> usize;

    /// Number of ranks in the world.
    fn size(&self) -> usize;

    /// Sends a buffer to `dest`. Never blocks.
    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), CommError>;

    /// Receives the next buffer sent by `source`, blocking until it arrives.
    /// Buffers from one source arrive in the order they were sent.
    fn recv(&self, source: usize) -> Result<Vec<u8>, CommError>;

    /// Blocks until every rank has called `barrier`.
    fn barrier(&self);

    /// Sum of `value` over all ranks, summed in rank order.
    fn all_reduce_sum_f64(&self, value: f64) -> f64;

    /// Sum of `value` over all ranks.
    fn all_reduce_sum_u64(&self, value: u64) -> u64;

    /// Logical AND of `value` over all ranks.
    fn all_reduce_and(&self, value: bool) -> bool { self.all_reduce_sum_u64(u64::from(!value)) == 0 }
}

/// Serialises a record into a message buffer.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CommError> {
    bincode::serialize(value).map_err(CommError::Encode)
}

/// Deserialises a message buffer into a record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CommError> {
    bincode::deserialize(bytes).map_err(CommError::Decode)
}

/// Reduction slots shared by all ranks of one world.
#[derive(Debug)]
struct Collective {
    barrier: Barrier,
    reals: Mutex<Vec<f64>>,
    counts: Mutex<Vec<u64>>,
}

/// In-process communicator: one unbounded channel per ordered rank pair and a
/// shared barrier. Each rank runs on its own thread.
#[derive(Debug)]
pub struct ChannelComm {
    rank: usize,
    size: usize,
    /// Senders indexed by destination rank; `None` for the caller itself.
    outgoing: Vec<Option<Sender<Vec<u8>>>>,
    /// Receivers indexed by source rank; `None` for the caller itself.
    incoming: Vec<Option<Receiver<Vec<u8>>>>,
    collective: Arc<Collective>,
}

impl ChannelComm {
    /// Creates the endpoints of a world with `size` ranks; the endpoint at
    /// index `i` belongs to rank `i`.
    pub fn world(size: usize) -> Vec<ChannelComm> {
        let size = size.max(1);
        let collective = Arc::new(Collective {
            barrier: Barrier::new(size),
            reals: Mutex::new(vec![0.0; size]),
            counts: Mutex::new(vec![0; size]),
        });
        let mut outgoing: Vec<Vec<Option<Sender<Vec<u8>>>>> =
            (0..size).map(|_| vec![None; size]).collect();
        let mut incoming: Vec<Vec<Option<Receiver<Vec<u8>>>>> =
            (0..size).map(|_| vec![None; size]).collect();
        for src in 0..size {
            for dst in 0..size {
                if src == dst {
                    continue;
                }
                let (tx, rx) = unbounded();
                outgoing[src][dst] = Some(tx);
                incoming[dst][src] = Some(rx);
            }
        }
        outgoing
            .into_iter()
            .zip(incoming)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| ChannelComm {
                rank,
                size,
                outgoing,
                incoming,
                collective: collective.clone(),
            })
            .collect()
    }

    fn check_peer(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size || peer == self.rank {
            return Err(CommError::InvalidRank {
                rank: peer,
                size: self.size,
                caller: self.rank,
            });
        }
        Ok(())
    }

    fn reduce<T: Copy>(&self, slots: &Mutex<Vec<T>>, value: T, fold: impl Fn(T, T) -> T, init: T) -> T {
        slots.lock().unwrap_or_else(PoisonError::into_inner)[self.rank] = value;
        self.collective.barrier.wait();
        let result = slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .fold(init, |acc, v| fold(acc, *v));
        // Nobody may overwrite a slot before every rank has read it.
        self.collective.barrier.wait();
        result
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize { self.rank }

    fn size(&self) -> usize { self.size }

    fn send(&self, dest: usize, payload: Vec<u8>) -> Result<(), CommError> {
        self.check_peer(dest)?;
        let disconnected = CommError::Disconnected {
            from: self.rank,
            to: dest,
        };
        match &self.outgoing[dest] {
            Some(tx) => tx.send(payload).map_err(|_| disconnected),
            None => Err(disconnected),
        }
    }

    fn recv(&self, source: usize) -> Result<Vec<u8>, CommError> {
        self.check_peer(source)?;
        let disconnected = CommError::Disconnected {
            from: source,
            to: self.rank,
        };
        match &self.incoming[source] {
            Some(rx) => rx.recv().map_err(|_| disconnected),
            None => Err(disconnected),
        }
    }

    fn barrier(&self) { self.collective.barrier.wait(); }

    fn all_reduce_sum_f64(&self, value: f64) -> f64 {
        self.reduce(&self.collective.reals, value, |a, b| a + b, 0.0)
    }

    fn all_reduce_sum_u64(&self, value: u64) -> u64 {
        self.reduce(&self.collective.counts, value, |a, b| a + b, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_to_point_preserves_order() {
        let mut world = ChannelComm::world(2);
        let r1 = world.pop().unwrap();
        let r0 = world.pop().unwrap();
        r0.send(1, vec![1]).unwrap();
        r0.send(1, vec![2, 3]).unwrap();
        assert_eq!(r1.recv(0).unwrap(), vec![1]);
        assert_eq!(r1.recv(0).unwrap(), vec![2, 3]);
    }

    #[test]
    fn invalid_peers_are_rejected() {
        let world = ChannelComm::world(2);
        assert!(matches!(
            world[0].send(0, vec![]),
            Err(CommError::InvalidRank { rank: 0, .. })
        ));
        assert!(matches!(
            world[1].recv(5),
            Err(CommError::InvalidRank { rank: 5, .. })
        ));
    }

    #[test]
    fn dropped_peer_disconnects() {
        let mut world = ChannelComm::world(2);
        let r1 = world.pop().unwrap();
        drop(world);
        assert!(matches!(
            r1.recv(0),
            Err(CommError::Disconnected { from: 0, to: 1 })
        ));
    }

    #[test]
    fn reductions_agree_on_every_rank() {
        let world = ChannelComm::world(4);
        let results: Vec<(f64, u64, bool, bool)> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let r = comm.rank();
                        (
                            comm.all_reduce_sum_f64(r as f64 + 0.5),
                            comm.all_reduce_sum_u64(r as u64),
                            comm.all_reduce_and(true),
                            comm.all_reduce_and(r != 2),
                        )
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for (sum, count, all, not_all) in results {
            assert_eq!(sum, 8.0);
            assert_eq!(count, 6);
            assert!(all);
            assert!(!not_all);
        }
    }

    #[test]
    fn records_round_trip_through_buffers() {
        let buf = encode(&(3u32, vec![1.5f64, -2.0])).unwrap();
        let back: (u32, Vec<f64>) = decode(&buf).unwrap();
        assert_eq!(back, (3, vec![1.5, -2.0]));
        assert!(matches!(decode::<(u32, Vec<f64>)>(&buf[..3]), Err(CommError::Decode(_))));
    }
}
