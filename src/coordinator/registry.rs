use crate::array::{Array, ArrayId};
use crate::core::{NodeId, NodeRecord};
use std::collections::{HashMap, HashSet};

/// What happened to a registration.
#[derive(Debug, Clone)]
pub(crate) struct Admission {
    /// Authoritative record handed back to the node.
    pub record: NodeRecord,
    /// A new identifier was issued.
    pub fresh: bool,
    /// The node was still listed in this array, which is now dissolved.
    pub dissolved: Option<Array>,
    /// The pool can now cover every required role.
    pub launch_formation: bool,
}

/// How registered nodes are spread over the registry right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Census {
    pub unassigned: usize,
    pub forming: usize,
    pub in_arrays: usize,
    /// Released from a dissolved array, not re-registered yet.
    pub detached: usize,
    pub arrays: usize,
    pub issued: usize,
}

impl Census {
    /// Every issued identifier sits in exactly one place.
    pub fn is_conserved(&self) -> bool {
        self.unassigned + self.forming + self.in_arrays + self.detached == self.issued
    }
}

/// Coordinator-owned membership store.
///
/// Not synchronized by itself: the coordinator keeps it behind one mutex and
/// every method here is one atomic step under that mutex.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    required: usize,
    issued: HashSet<NodeId>,
    /// Registration order is claim order.
    unassigned: Vec<NodeRecord>,
    forming: HashMap<NodeId, NodeRecord>,
    arrays: Vec<Array>,
    detached: HashMap<NodeId, NodeRecord>,
    /// Set by `drain`; nothing is admitted or published afterwards.
    closed: bool,
}

impl Registry {
    pub fn new(required: usize) -> Self {
        Self {
            required,
            ..Self::default()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Callers check `is_closed` first, under the same lock.
    pub fn register(&mut self, node: NodeRecord) -> Admission {
        let (id, fresh) = match node.id {
            Some(id) if self.issued.contains(&id) => (id, false),
            _ => {
                let id = NodeId::new();
                self.issued.insert(id);
                (id, true)
            }
        };
        let record = node.with_id(id).unassigned();
        self.detached.remove(&id);

        let dissolved = self
            .arrays
            .iter()
            .position(|a| a.contains(&id))
            .map(|idx| self.arrays.remove(idx));
        if let Some(array) = &dissolved {
            self.detach_members(array, Some(id));
        }

        if let Some(forming) = self.forming.get_mut(&id) {
            // Mid-formation: the formation task decides where it ends up.
            *forming = record.clone();
        } else if let Some(existing) = self.unassigned.iter_mut().find(|n| n.id == Some(id)) {
            *existing = record.clone();
        } else {
            self.unassigned.push(record.clone());
        }

        Admission {
            record,
            fresh,
            dissolved,
            launch_formation: self.unassigned.len() >= self.required,
        }
    }

    fn detach_members(&mut self, array: &Array, except: Option<NodeId>) {
        for (_, member) in array.members() {
            if let Some(id) = member.id {
                if Some(id) != except {
                    self.detached.insert(id, member.clone().unassigned());
                }
            }
        }
    }

    /// Atomically claims `n` nodes from the pool, or none at all.
    pub fn checkout(&mut self, n: usize) -> Option<Vec<NodeRecord>> {
        if self.closed || n == 0 || n > self.unassigned.len() {
            return None;
        }
        let batch: Vec<NodeRecord> = self.unassigned.drain(..n).collect();
        for node in &batch {
            if let Some(id) = node.id {
                self.forming.insert(id, node.clone());
            }
        }
        Some(batch)
    }

    /// Re-registers a batch. Returns true when a formation can start.
    /// A closed registry drops the batch.
    pub fn check_in(&mut self, nodes: Vec<NodeRecord>) -> bool {
        if self.closed {
            return false;
        }
        let mut launch = false;
        for node in nodes {
            if let Some(id) = node.id {
                self.forming.remove(&id);
            }
            launch = self.register(node).launch_formation;
        }
        launch
    }

    /// Forgets a node for good.
    pub fn forget(&mut self, id: &NodeId) {
        self.forming.remove(id);
        self.detached.remove(id);
        self.unassigned.retain(|n| n.id.as_ref() != Some(id));
        self.issued.remove(id);
    }

    /// Moves a formed array from the forming set to the active list.
    /// Returns false once the registry is closed.
    pub fn publish(&mut self, array: Array) -> bool {
        if self.closed {
            return false;
        }
        for id in array.node_ids() {
            self.forming.remove(&id);
        }
        self.arrays.push(array);
        true
    }

    /// Forgets a released array member that could not be told about it.
    /// No-op if it re-registered in the meantime.
    pub fn forget_detached(&mut self, id: &NodeId) -> bool {
        if self.detached.remove(id).is_none() {
            return false;
        }
        self.issued.remove(id);
        true
    }

    pub fn remove_array(&mut self, array_id: &ArrayId) -> Option<Array> {
        let idx = self.arrays.iter().position(|a| a.id() == *array_id)?;
        let array = self.arrays.remove(idx);
        self.detach_members(&array, None);
        Some(array)
    }

    /// Empties the registry: active arrays plus every node not in one.
    pub fn drain(&mut self) -> (Vec<Array>, Vec<NodeRecord>) {
        let arrays = std::mem::take(&mut self.arrays);
        let mut loose = std::mem::take(&mut self.unassigned);
        loose.extend(self.forming.drain().map(|(_, n)| n));
        loose.extend(self.detached.drain().map(|(_, n)| n));
        self.issued.clear();
        self.closed = true;
        (arrays, loose)
    }

    pub fn unassigned(&self) -> Vec<NodeRecord> {
        self.unassigned.clone()
    }

    pub fn arrays(&self) -> Vec<Array> {
        self.arrays.clone()
    }

    pub fn census(&self) -> Census {
        Census {
            unassigned: self.unassigned.len(),
            forming: self.forming.len(),
            in_arrays: self.arrays.iter().map(Array::len).sum(),
            detached: self.detached.len(),
            arrays: self.arrays.len(),
            issued: self.issued.len(),
        }
    }
}
