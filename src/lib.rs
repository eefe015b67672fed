pub mod config;
pub mod exchange;
pub mod handler;
pub mod router;
pub mod status;

pub use exchange::{AbortSignal, Exchange, RequestContext};
pub use handler::{DispatchError, ErrorHandler, Handler, HandlerResult};
pub use router::executor::Next;
pub use router::method::Method;
pub use router::table::{MatchResult, Params, RouteError, RouteTable};
pub use router::{Router, RouterError};
