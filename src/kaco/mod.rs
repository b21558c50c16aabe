pub mod channel;   // Serial channel contract and transport adapters
pub mod frame;     // Frame model and wire codec
pub mod protocol;  // Request/response driver
pub mod simulator; // Scripted device for tests and dry runs

pub use channel::{ChannelGuard, Connection, ConnectionFactory, DefaultConnectionFactory, SerialChannel};
pub use frame::{Frame, KacoCommand};
pub use protocol::KacoProtocol;
pub use simulator::SimulatedChannel;
