//! Demo framework served by the development host
//!
//! A handful of routes that exercise each delivery path of the adapter.

use axum::http::{HeaderValue, Method, StatusCode, header};
use bytes::Bytes;
use futures::stream;
use runbridge_adapter::{
    Fetch, FetchOutput, RealizedRequest, Response, ResponseConstructor, ResponseInit,
};
use runbridge_core::{BodyStream, Error, InvocationContext, OutgoingHeaders, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TICKS: u32 = 3;
const TICK_INTERVAL: Duration = Duration::from_millis(20);
const SLOW_DEADLINE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Default)]
pub struct DemoApp {
    constructor: ResponseConstructor,
}

impl DemoApp {
    pub fn new(constructor: ResponseConstructor) -> Self {
        Self { constructor }
    }

    fn text(&self, body: impl Into<String>, status: StatusCode) -> FetchOutput {
        FetchOutput::from(
            self.constructor
                .build(body.into(), ResponseInit::status(status)),
        )
    }
}

impl Fetch for DemoApp {
    fn fetch(&self, request: Arc<RealizedRequest>, ctx: &InvocationContext) -> Result<FetchOutput> {
        let path = request.parsed_url().path().to_string();

        match (request.method(), path.as_str()) {
            (&Method::GET, "/") => Ok(self.text("runbridge is up", StatusCode::OK)),

            (&Method::GET, "/json") => {
                let body = json!({
                    "method": request.method().as_str(),
                    "url": request.url(),
                    "query": ctx.req.query,
                });
                Ok(FetchOutput::from(Response::json(&body, StatusCode::OK)?))
            }

            (&Method::POST, "/echo") => {
                let mut init = ResponseInit::default();
                if let Some(content_type) = request.headers().get(header::CONTENT_TYPE) {
                    init.headers.insert(header::CONTENT_TYPE, content_type.clone());
                }
                Ok(FetchOutput::from(Response::realized(
                    request.array_buffer()?,
                    init,
                )))
            }

            (&Method::GET, "/events") => {
                let ticks = stream::unfold(0, |tick| async move {
                    if tick >= TICKS {
                        return None;
                    }
                    tokio::time::sleep(TICK_INTERVAL).await;
                    let event = Bytes::from(format!("data: tick {}\n\n", tick));
                    Some((Ok::<_, Error>(event), tick + 1))
                });
                let init = ResponseInit::default()
                    .with_header("content-type", "text/event-stream")
                    .with_header("cache-control", "no-cache");
                Ok(FetchOutput::from(Response::new(BodyStream::new(ticks), init)))
            }

            (&Method::GET, "/slow") => {
                let signal = request.signal().clone();
                Ok(FetchOutput::pending(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(SLOW_DEADLINE) => {
                            Err(Error::timeout("upstream did not answer in time"))
                        }
                        _ = signal.cancelled() => {
                            Err(Error::Aborted(signal.reason().unwrap_or_default()))
                        }
                    }
                }))
            }

            (&Method::GET, "/cookies") => {
                let mut init = ResponseInit::default();
                init.headers
                    .append(header::SET_COOKIE, HeaderValue::from_static("a=1; Path=/"));
                init.headers
                    .append(header::SET_COOKIE, HeaderValue::from_static("b=2; Path=/"));
                Ok(FetchOutput::from(Response::realized("cookies set", init)))
            }

            (&Method::GET, "/redirect") => {
                ctx.log("redirecting to /");
                ctx.res.redirect("/", StatusCode::FOUND, OutgoingHeaders::new());
                Ok(FetchOutput::from(Response::empty(StatusCode::OK)))
            }

            (_, "/boom") => Err(Error::handler("demo failure")),

            _ => Ok(self.text("Not Found", StatusCode::NOT_FOUND)),
        }
    }
}
