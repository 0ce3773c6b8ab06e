pub mod builder;
pub mod definition;
pub mod dispatcher;
pub mod handler;
pub mod middleware;
pub mod path;
pub mod rebuild;
pub mod validator;

pub use builder::{BuildError, BuildReport, RouteBuilder};
pub use definition::{
    MethodConfig, MethodKey, OpenApiMeta, RouteConfig, RouteDefinition, RouteDoc, RouteKey,
};
pub use dispatcher::{DispatchError, Dispatcher, RouteSummary};
pub use handler::{Context, Handler, HandlerError, HandlerResult, Next};
pub use middleware::{AppliedMiddlewareRecord, BindingKey, MiddlewareError, MiddlewareResolver};
pub use rebuild::RebuildCoordinator;
