/// [`u16`]: **Local identifier (LID)**, identifies a port on a switch or an HCA in the cluster.
pub type Lid = u16;

/// [`u32`]: **Queue pair number**, identifies a local queue pair.
pub type Qpn = u32;

/// [`u32`]: **Packet sequence number (PSN)**, identifies a packet in a flow.
pub type Psn = u32;

/// [`u32`]: **Local key**, identifies a local memory region.
pub type LKey = u32;

/// [`u32`]: **Remote key**, identifies a remote memory region.
pub type RKey = u32;

/// [`u64`]: **Work request identifier**, returned unchanged in the work completion.
///
/// Work requests posted through [`Qp`](crate::Qp) carry a token issued by the
/// [`Executor`](crate::Executor) in this field.
pub type WrId = u64;

/// [`u32`]: **Immediate data**, can be carried in RDMA send work requests in network byte order.
pub type ImmData = u32;
