// Routing Module
//
// Path naming and interface capability tables. Everything here is pure: no state, no I/O.

pub mod interface;
pub mod path;

pub use interface::{
    Interface, InterfaceBuilder, LocalHandler, Method, MethodFuture, MethodHandler,
    MethodSignature, TypeKind,
};
pub use path::RoutePath;
