//! RDMA functionalities.

pub mod cq;
pub mod mr;
pub mod qp;
pub mod type_alias;
pub mod wr;
