//! Adapter entrypoint
//!
//! [`serve`] wraps a framework's `fetch` into a listener that handles one
//! invocation at a time: build the request proxy, hand the realized request
//! to the framework, and dispatch the result to the response sink. Every
//! failure ends up on the invocation's error sink, and the invocation always
//! completes with exactly one response write.

use crate::dispatch::{
    Delivery, DeliveryMode, DispatchOptions, ErrorHandler, FetchOutput, dispatch,
};
use crate::proxy::RequestProxy;
use crate::request::RealizedRequest;
use crate::response::ResponseConstructor;
use futures::future::BoxFuture;
use runbridge_core::{
    AbortController, AbortSignal, InvocationContext, LogEntry, LogSink, ResponseSink, Result,
    SinkGuard,
};
use runbridge_observability::Metrics;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// The framework side of the adapter
///
/// An `Err` is a synchronous failure; a [`FetchOutput::Pending`] that
/// resolves to an error is an asynchronous one.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: Arc<RealizedRequest>, ctx: &InvocationContext)
    -> Result<FetchOutput>;
}

impl<F> Fetch for F
where
    F: Fn(Arc<RealizedRequest>, &InvocationContext) -> Result<FetchOutput> + Send + Sync,
{
    fn fetch(
        &self,
        request: Arc<RealizedRequest>,
        ctx: &InvocationContext,
    ) -> Result<FetchOutput> {
        self(request, ctx)
    }
}

#[derive(Clone, Default)]
pub struct ListenerOptions {
    /// Trusted host used when the invocation does not carry one
    pub hostname: Option<String>,
    pub error_handler: Option<ErrorHandler>,
    pub delivery: DeliveryMode,
    pub response_constructor: ResponseConstructor,
    pub max_buffer_bytes: Option<usize>,
    pub metrics: Option<Arc<Metrics>>,
}

impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("hostname", &self.hostname)
            .field("error_handler", &self.error_handler.is_some())
            .field("delivery", &self.delivery)
            .field("response_constructor", &self.response_constructor)
            .field("max_buffer_bytes", &self.max_buffer_bytes)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Boxed invocation handler for hosts
pub type InvocationHandler = Arc<dyn Fn(InvocationContext) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct RequestListener<F> {
    framework: F,
    options: ListenerOptions,
    dispatch: DispatchOptions,
}

pub fn serve<F: Fetch>(framework: F) -> RequestListener<F> {
    serve_with(framework, ListenerOptions::default())
}

pub fn serve_with<F: Fetch>(framework: F, options: ListenerOptions) -> RequestListener<F> {
    let dispatch = DispatchOptions {
        error_handler: options.error_handler.clone(),
        delivery: options.delivery,
        constructor: options.response_constructor,
        max_buffer_bytes: options.max_buffer_bytes,
    };

    RequestListener {
        framework,
        options,
        dispatch,
    }
}

impl<F: Fetch> RequestListener<F> {
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Handle one invocation
    #[instrument(
        name = "invocation",
        skip(self, ctx),
        fields(method = %ctx.req.method, url = %ctx.req.url)
    )]
    pub async fn handle(&self, ctx: InvocationContext) {
        let started = Instant::now();
        let guard = Arc::new(SinkGuard::new(ctx.res.clone()));
        let ctx = InvocationContext {
            res: guard.clone(),
            ..ctx
        };

        let outcome = self.run(&ctx).await;
        let elapsed = started.elapsed();

        match outcome {
            Ok(delivery) => {
                debug!(
                    delivery = delivery.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Invocation completed"
                );
                if let Some(metrics) = &self.options.metrics {
                    metrics.record_delivery(delivery.as_str(), elapsed.as_secs_f64());
                }
            }
            Err(err) => {
                warn!(error_name = err.name(), "Invocation failed: {}", err);
                ctx.report(&err);
                if let Some(metrics) = &self.options.metrics {
                    metrics.record_failure(err.name(), elapsed.as_secs_f64());
                }
            }
        }

        if !guard.written() {
            guard.empty();
        }
    }

    async fn run(&self, ctx: &InvocationContext) -> Result<Delivery> {
        let proxy = RequestProxy::new(&ctx.req, self.options.hostname.as_deref())?;

        let request = proxy.get_realized()?;
        if let Some(metrics) = &self.options.metrics {
            metrics.record_request_build();
        }

        let controller = proxy.abort_controller()?.clone();
        if let Some(reason) = ctx.abort.as_ref().and_then(AbortSignal::reason) {
            controller.abort(reason);
        }

        let mut output = self.framework.fetch(request, ctx)?;
        if self.dispatch.error_handler.is_none() {
            let error = ctx.error.clone();
            output = output.inspect_rejection(move |err| error.write(LogEntry::from(err)));
        }
        let sink: &dyn ResponseSink = ctx.res.as_ref();
        let dispatched = dispatch(output, sink, &self.dispatch);

        match ctx.abort.clone() {
            Some(signal) => {
                tokio::pin!(dispatched);
                tokio::select! {
                    delivery = &mut dispatched => delivery,
                    _ = forward_abort(signal, controller) => dispatched.await,
                }
            }
            None => dispatched.await,
        }
    }

    /// Box the listener for hosts that store handlers
    pub fn into_handler(self) -> InvocationHandler
    where
        F: 'static,
    {
        let listener = Arc::new(self);
        Arc::new(move |ctx: InvocationContext| -> BoxFuture<'static, ()> {
            let listener = listener.clone();
            Box::pin(async move { listener.handle(ctx).await })
        })
    }
}

/// Abort the proxy's controller once the host aborts
async fn forward_abort(signal: AbortSignal, controller: AbortController) {
    signal.cancelled().await;
    let reason = signal
        .reason()
        .unwrap_or_else(|| "invocation aborted".to_string());
    debug!(reason = %reason, "Host aborted invocation");
    controller.abort(reason);
}
