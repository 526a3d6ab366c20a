//! `vflow-server`: the dispatch server — state machine, flow-server
//! loop, dispatcher/invoker contracts (spec §4.7, C7).
//!
//! Layering: [`wire`] frames the request/response headers that travel
//! over a [`vflow_transport::Flow`]; [`invoker`]/[`dispatcher`] are the
//! user-facing extension points; [`call`] is what an invoker sees during
//! `Invoke`; [`state`] is the server's own lifecycle; [`server`] ties all
//! of it together.

pub mod call;
pub mod dispatcher;
pub mod invoker;
pub mod server;
pub mod state;
pub mod wire;

pub use call::ServerStream;
pub use dispatcher::{
    AllowEveryoneAuthorizer, Authorizer, Dispatcher, EmptyReservedInvoker, ReservedDispatcher, StaticDispatcher,
    RESERVED_NAME_PREFIX,
};
pub use invoker::{Invoker, MethodPrepare, MethodSignature};
pub use server::{AddrChange, ListenSpec, Server};
pub use state::{ServerState, ServerStateMachine};
pub use wire::{RequestHeader, ResponseHeader, WireError};

pub mod prelude {
    pub use crate::call::ServerStream;
    pub use crate::dispatcher::{AllowEveryoneAuthorizer, Authorizer, Dispatcher, StaticDispatcher};
    pub use crate::invoker::{Invoker, MethodPrepare, MethodSignature};
    pub use crate::server::{AddrChange, ListenSpec, Server};
    pub use crate::state::ServerState;
}
