//! Request middleware.

pub mod interceptor;

pub use interceptor::{RequestContext, RequestInterceptor};
