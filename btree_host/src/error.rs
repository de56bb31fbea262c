use std::fmt;

/// Error surfaced by the host transaction machinery (the B-tree trait seam).
///
/// `Restart` is not a real error: it signals that the transaction the
/// current closure is running under lost a race and must be re-run from
/// the top. [`lockrestart_do`] is the only place that is allowed to see it;
/// everything built on top of this crate should never observe `Restart`
/// escaping a call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HostError {
    Restart,
    NotFound,
    NoSpace,
    Invalid,
}

impl HostError {
    pub fn is_restart(&self) -> bool {
        matches!(self, HostError::Restart)
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            HostError::Restart => "transaction restart",
            HostError::NotFound => "row not found",
            HostError::NoSpace => "no space",
            HostError::Invalid => "invalid argument",
        };
        write!(f, "{s}")
    }
}

impl std::error::Error for HostError {}
