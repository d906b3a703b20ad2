/// Queue pair state.
///
/// Discriminants follow `enum ibv_qp_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum QpState {
    /// Reset.
    Reset = 0,

    /// Initialized.
    Init = 1,

    /// Ready To Receive.
    Rtr = 2,

    /// Ready To Send.
    Rts = 3,

    /// Send Queue Drain.
    Sqd = 4,

    /// Send Queue Error.
    Sqe = 5,

    /// Error.
    Error = 6,

    /// Unknown.
    Unknown = 7,
}

impl QpState {
    /// Whether receives may be posted in this state.
    #[inline]
    pub fn can_post_recv(self) -> bool {
        !matches!(self, QpState::Reset | QpState::Unknown)
    }

    /// Whether sends may be posted in this state.
    #[inline]
    pub fn can_post_send(self) -> bool {
        self == QpState::Rts
    }
}

impl From<u32> for QpState {
    fn from(qp_state: u32) -> Self {
        match qp_state {
            0 => QpState::Reset,
            1 => QpState::Init,
            2 => QpState::Rtr,
            3 => QpState::Rts,
            4 => QpState::Sqd,
            5 => QpState::Sqe,
            6 => QpState::Error,
            _ => QpState::Unknown,
        }
    }
}
