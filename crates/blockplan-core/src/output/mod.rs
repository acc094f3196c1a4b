//! Output delivery: the bus that routes encoded packets to an attachable
//! sink, and the sink trait boundary itself.

pub mod bus;
pub mod sink;
pub mod tcp;

pub use bus::OutputBus;
pub use sink::{CollectingSink, Hysteresis, Sink, ThrottleState};
pub use tcp::TcpSink;
