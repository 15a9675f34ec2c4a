//! runbridge adapter
//!
//! Bridges a host invocation context into fetch-style request/response
//! objects. The request side is a [`RequestProxy`] that builds its
//! [`RealizedRequest`] lazily and once. The response side accepts either a
//! cheap cache record or a realized [`Response`] and writes it to the
//! invocation's response sink exactly once.
//!
//! ```ignore
//! use runbridge_adapter::{FetchOutput, Response, ResponseInit, serve};
//!
//! let listener = serve(
//!     |request: Arc<RealizedRequest>, _ctx: &InvocationContext| -> Result<FetchOutput> {
//!         Ok(FetchOutput::from(Response::new(
//!             format!("{} {}", request.method(), request.url()),
//!             ResponseInit::default(),
//!         )))
//!     },
//! );
//! listener.handle(ctx).await;
//! ```

pub mod dispatch;
pub mod listener;
pub mod proxy;
pub mod request;
pub mod response;

pub use dispatch::{
    Delivery, DeliveryMode, DispatchOptions, ErrorHandler, FetchOutput, dispatch, error_handler,
    fetch_error_response, should_stream,
};
pub use listener::{Fetch, InvocationHandler, ListenerOptions, RequestListener, serve, serve_with};
pub use proxy::RequestProxy;
pub use request::{
    RealizedRequest, RequestCache, RequestCredentials, RequestInit, RequestMode, RequestRedirect,
};
pub use response::{
    CachedBody, CachedResponse, RealizedResponse, Response, ResponseBody, ResponseConstructor,
    ResponseInit,
};
