use std::fmt;

use crate::rdma::type_alias::*;

/// Routable parameters of one end of a reliable connection.
///
/// Exactly what a peer needs to bring its own queue pair to RTR: where to
/// send (`lid`, `qpn`) and which packet sequence number to expect first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct QpEndpoint {
    pub lid: Lid,
    pub qpn: Qpn,
    pub psn: Psn,
}

impl QpEndpoint {
    pub fn new(lid: Lid, qpn: Qpn, psn: Psn) -> Self {
        Self { lid, qpn, psn }
    }
}

impl fmt::Display for QpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lid {} qpn {} psn {}", self.lid, self.qpn, self.psn)
    }
}
