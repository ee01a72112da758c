pub mod bindings;
pub mod dispatcher;
pub mod handler;
pub mod messages;
pub mod outbound;
pub mod session;

pub use bindings::{Binding, BindingStats, BindingTable};
pub use dispatcher::{BroadcastDispatcher, DispatchReport, DispatcherStats};
pub use handler::websocket_handler;
pub use messages::{ClientCommand, WsMessage};
pub use outbound::Outbound;
pub use session::Session;
