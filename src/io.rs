use core::fmt::{self, Debug, Display};

pub use crate::{CLIENT_PORT, SERVER_PORT};

pub mod client;
pub mod relay;
pub mod server;

/// What can stop one of the I/O loops: the transport failing, or an outgoing
/// packet not fitting the caller's buffer.
///
/// Malformed *incoming* packets never surface here; the loops count and drop
/// them and keep serving.
#[derive(Debug)]
pub enum Error<E> {
    Io(E),
    Codec(crate::Error),
}

impl<E> From<crate::Error> for Error<E> {
    fn from(err: crate::Error) -> Self {
        Self::Codec(err)
    }
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "IO error: {err}"),
            Self::Codec(err) => write!(f, "Codec error: {err}"),
        }
    }
}

impl<E> core::error::Error for Error<E> where E: Display + Debug {}
