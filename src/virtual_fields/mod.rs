//! Virtual fields
//!
//! Values computed on read and never stored: an accessor registered at
//! startup, or a side-effect-free expression over the document's fields.

pub mod expr;
mod registry;
mod resolver;

pub use expr::{parse as parse_expression, Expr, ExprError, Scalar};
pub use registry::{Accessor, AccessorRegistry};
pub use resolver::{ResolveError, VirtualFieldResolver};
