/// Queue pair capability attributes.
///
/// Documentation heavily borrowed from [RDMAmojo](https://www.rdmamojo.com/2012/12/21/ibv_create_qp/).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QpCaps {
    /// The maximum number of outstanding work requests that can be posted to
    /// the send queue in that queue pair.
    ///
    /// Value can be [0..`dev_cap.max_qp_wr`].
    pub max_send_wr: u32,

    /// The maximum number of outstanding work requests that can be posted to
    /// the receive queue in that queue pair.
    ///
    /// Value can be [0..`dev_cap.max_qp_wr`].
    pub max_recv_wr: u32,

    /// The maximum number of scatter/gather elements in any work request that
    /// can be posted to the send queue in that queue pair.
    ///
    /// Value can be [0..`dev_cap.max_sge`].
    pub max_send_sge: u32,

    /// The maximum number of scatter/gather elements in any work request that
    /// can be posted to the receive queue in that queue pair.
    ///
    /// Value can be [0..`dev_cap.max_sge`].
    pub max_recv_sge: u32,
}

impl Default for QpCaps {
    /// Generate a default RDMA queue pair capabilities setting.
    /// The queue pair capabilities are set to:
    /// - 128 outstanding send/recv work requests, and
    /// - 16 SGEs per send/recv work request.
    ///
    /// **NOTE:** Such a setting might *not* be supported by the underlying
    /// RDMA device.
    fn default() -> Self {
        QpCaps {
            max_send_wr: 128,
            max_recv_wr: 128,
            max_send_sge: 16,
            max_recv_sge: 16,
        }
    }
}
