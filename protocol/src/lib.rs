#![warn(clippy::all, clippy::pedantic, clippy::nursery, unused_extern_crates)]

pub mod channel;
pub mod error;
pub mod event;
pub mod grant;
pub mod member;
pub mod route;

pub use channel::{ChannelName, ChannelType};
pub use error::ProtocolError;
pub use event::{AuthRequest, ChannelEvent, WireError};
pub use grant::{AuthGrant, GrantSigner};
pub use member::{FieldKind, FieldSpec, Member, MemberSchema};
pub use route::{RouteCatalog, RouteSpec};
