pub mod tcp;

pub use tcp::{CancelHandle, PtpChannel};
