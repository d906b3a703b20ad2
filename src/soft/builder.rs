use std::io;
use std::sync::Arc;

use super::{DeviceAttr, SoftCq, SoftNic, SoftQp};
use crate::rdma::qp::*;
use crate::rdma::type_alias::Psn;

/// Queue pair builder.
///
/// A builder is reusable: every [`build`](Self::build) creates a fresh
/// queue pair with the same attributes, which makes it a [`QpFactory`] for
/// [`Acceptor`](crate::ctrl::Acceptor) and [`Connector`](crate::ctrl::Connector).
#[derive(Clone, Debug)]
pub struct QpBuilder {
    nic: SoftNic,

    /// Send completion queue for this QP.
    send_cq: Option<SoftCq>,

    /// Receive completion queue for this QP. Can be the same to send CQ.
    recv_cq: Option<SoftCq>,

    /// Capabilities of this QP.
    caps: QpCaps,

    /// Initial send packet sequence number.
    sq_psn: Psn,
}

impl QpBuilder {
    /// Create a new queue pair builder on `nic`.
    pub fn new(nic: &SoftNic) -> Self {
        Self {
            nic: nic.clone(),
            send_cq: None,
            recv_cq: None,
            caps: QpCaps::default(),
            sq_psn: Qp::GLOBAL_INIT_PSN,
        }
    }

    /// Set the send completion queue for this QP.
    pub fn send_cq(mut self, send_cq: &SoftCq) -> Self {
        self.send_cq = Some(send_cq.clone());
        self
    }

    /// Set the receive completion queue for this QP.
    pub fn recv_cq(mut self, recv_cq: &SoftCq) -> Self {
        self.recv_cq = Some(recv_cq.clone());
        self
    }

    /// Set the capabilities of this QP.
    /// If not set, [`QpCaps::default()`] is used.
    pub fn caps(mut self, caps: QpCaps) -> Self {
        self.caps = caps;
        self
    }

    /// Set the initial send packet sequence number announced to peers.
    pub fn sq_psn(mut self, sq_psn: Psn) -> Self {
        self.sq_psn = sq_psn;
        self
    }

    /// Check whether the given capabilities are supported by the device.
    fn check_caps(attr: &DeviceAttr, caps: &QpCaps) -> Result<(), QpCreationError> {
        let checks = [
            ("max_send_wr", attr.max_qp_wr, caps.max_send_wr),
            ("max_recv_wr", attr.max_qp_wr, caps.max_recv_wr),
            ("max_send_sge", attr.max_sge, caps.max_send_sge),
            ("max_recv_sge", attr.max_sge, caps.max_recv_sge),
        ];
        for (name, max, required) in checks {
            if required > max {
                return Err(QpCreationError::CapabilityNotEnough(
                    name.to_string(),
                    max,
                    required,
                ));
            }
        }
        Ok(())
    }

    /// Build a queue pair in the RESET state.
    pub fn build(&self) -> Result<SoftQp, QpCreationError> {
        Self::check_caps(self.nic.attr(), &self.caps)?;
        let missing = |what: &str| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} CQ must be set", what),
            )
        };
        let send_cq = self.send_cq.as_ref().ok_or_else(|| missing("send"))?;
        let recv_cq = self.recv_cq.as_ref().ok_or_else(|| missing("recv"))?;

        Ok(SoftQp::new(
            self.nic.inner().clone(),
            self.caps,
            self.sq_psn,
            send_cq.ring().clone(),
            recv_cq.ring().clone(),
        ))
    }
}

impl QpFactory for QpBuilder {
    fn create_qp(&self) -> Result<Arc<dyn RawQp>, QpCreationError> {
        Ok(Arc::new(self.build()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::Fabric;

    #[test]
    fn test_caps_checked() {
        let nic = Fabric::new().open_nic();
        let cq = nic.create_cq(16).unwrap();
        let builder = QpBuilder::new(&nic).send_cq(&cq).recv_cq(&cq);

        let caps = QpCaps {
            max_send_sge: 17,
            ..QpCaps::default()
        };
        match builder.clone().caps(caps).build() {
            Err(QpCreationError::CapabilityNotEnough(name, max, req)) => {
                assert_eq!((name.as_str(), max, req), ("max_send_sge", 16, 17));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let qp = builder.sq_psn(77).build().unwrap();
        assert_eq!(qp.state(), QpState::Reset);
        assert_eq!(qp.endpoint().psn, 77);
        assert_eq!(qp.endpoint().lid, nic.lid());
    }

    #[test]
    fn test_missing_cq() {
        let nic = Fabric::new().open_nic();
        assert!(matches!(
            QpBuilder::new(&nic).build(),
            Err(QpCreationError::IoError(_))
        ));
    }

    #[test]
    fn test_factory_yields_distinct_qps() {
        let nic = Fabric::new().open_nic();
        let cq = nic.create_cq(16).unwrap();
        let factory = QpBuilder::new(&nic).send_cq(&cq).recv_cq(&cq);
        let a = factory.create_qp().unwrap();
        let b = factory.create_qp().unwrap();
        assert_ne!(a.endpoint().qpn, b.endpoint().qpn);
    }
}
