pub mod broker;
pub mod dispatcher;
pub mod error;
pub mod presence;
pub mod subscription;
pub mod transport;

pub use broker::{BrokerConnection, BrokerSubscription, RedisBrokerLink};
pub use dispatcher::{PrpcClient, PrpcClientConfig};
pub use error::{Error, Result};
pub use presence::{PresenceEvent, PresenceState};
pub use subscription::{ChannelHandle, HandlerId};
pub use transport::CallTransport;
