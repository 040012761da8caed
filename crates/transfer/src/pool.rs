use std::collections::{HashSet, VecDeque};

use chunkdrop_protocol::Endpoint;

use crate::TransferError;

/// FIFO pool of upload endpoints.
///
/// An endpoint is either free (queued) or checked out to exactly one
/// transfer unit. Returned endpoints go to the tail, so free endpoints
/// are handed out round-robin.
#[derive(Debug)]
pub struct EndpointPool {
    free: VecDeque<Endpoint>,
    checked_out: HashSet<String>,
}

impl EndpointPool {
    /// Seeds the pool in the given order.
    ///
    /// Fails with `NoEndpoints` for an empty list and `InvalidEndpoint` if
    /// two endpoints share an id.
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, TransferError> {
        if endpoints.is_empty() {
            return Err(TransferError::NoEndpoints);
        }
        let mut seen = HashSet::with_capacity(endpoints.len());
        for e in &endpoints {
            if !seen.insert(e.id.as_str()) {
                return Err(TransferError::InvalidEndpoint(format!(
                    "duplicate endpoint id: {}",
                    e.id
                )));
            }
        }

        let checked_out = HashSet::with_capacity(endpoints.len());
        Ok(Self {
            free: endpoints.into(),
            checked_out,
        })
    }

    /// Removes and returns the head of the queue.
    pub fn dequeue(&mut self) -> Option<Endpoint> {
        let endpoint = self.free.pop_front()?;
        self.checked_out.insert(endpoint.id.clone());
        Some(endpoint)
    }

    /// Returns a checked-out endpoint to the tail of the queue.
    ///
    /// Rejects endpoints that were never dequeued (or were already
    /// returned), so the pool can neither duplicate nor invent endpoints.
    pub fn enqueue(&mut self, endpoint: Endpoint) -> Result<(), TransferError> {
        if !self.checked_out.remove(&endpoint.id) {
            return Err(TransferError::UnknownEndpoint(endpoint.id));
        }
        self.free.push_back(endpoint);
        Ok(())
    }

    /// Number of free endpoints.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of endpoints currently checked out.
    pub fn in_flight(&self) -> usize {
        self.checked_out.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n)
            .map(|i| Endpoint::new(format!("e{i}"), format!("https://hooks.example.com/{i}")))
            .collect()
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(matches!(
            EndpointPool::new(Vec::new()),
            Err(TransferError::NoEndpoints)
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut list = endpoints(2);
        list.push(list[0].clone());
        assert!(matches!(
            EndpointPool::new(list),
            Err(TransferError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn dequeue_is_fifo() {
        let mut pool = EndpointPool::new(endpoints(3)).unwrap();
        assert_eq!(pool.dequeue().unwrap().id, "e0");
        assert_eq!(pool.dequeue().unwrap().id, "e1");
        assert_eq!(pool.dequeue().unwrap().id, "e2");
        assert!(pool.dequeue().is_none());
        assert_eq!(pool.in_flight(), 3);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn returned_endpoints_rotate_to_tail() {
        let mut pool = EndpointPool::new(endpoints(3)).unwrap();
        let first = pool.dequeue().unwrap();
        pool.enqueue(first).unwrap();

        // e0 went behind e1 and e2.
        let order: Vec<String> = (0..3).map(|_| pool.dequeue().unwrap().id).collect();
        assert_eq!(order, vec!["e1", "e2", "e0"]);
    }

    #[test]
    fn enqueue_unknown_endpoint_rejected() {
        let mut pool = EndpointPool::new(endpoints(1)).unwrap();
        let stranger = Endpoint::new("x", "https://hooks.example.com/x");
        assert!(matches!(
            pool.enqueue(stranger),
            Err(TransferError::UnknownEndpoint(_))
        ));
    }

    #[test]
    fn double_return_rejected() {
        let mut pool = EndpointPool::new(endpoints(2)).unwrap();
        let e = pool.dequeue().unwrap();
        pool.enqueue(e.clone()).unwrap();
        assert!(pool.enqueue(e).is_err());
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.in_flight(), 0);
    }
}
