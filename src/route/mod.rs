//! Route compilation, storage, and refresh: C11 (Route Table), C12
//! (Route Refresh Service), plus the `compile` helpers both depend on.

pub mod compile;
pub mod refresh;
pub mod table;

pub use compile::{compile_all, compile_route, CompiledRoute, PathMatcher, RouteCompileError};
pub use refresh::RouteRefreshService;
pub use table::{RouteSnapshot, RouteTable};
