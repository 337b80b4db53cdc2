use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use bytes::BytesMut;
use futures::future::BoxFuture;
use tokio::net::TcpStream;

use crate::{
    http_request::{Method, Request},
    http_response::ResponseBuilder,
    HTTPServer,
};

/// Takes over a socket after the upgrade response was written, along with any
/// bytes the client sent after the request head.
pub type OnUpgrade = Box<dyn FnOnce(TcpStream, BytesMut, SocketAddr) -> BoxFuture<'static, ()> + Send>;

pub struct Upgrade {
    pub response: Vec<u8>,
    pub on_upgrade: OnUpgrade,
}

pub struct Context {
    pub request: Arc<Request>,
    pub response: ResponseBuilder,
    pub params: Vec<RequestPathParams>,
    upgrade: Option<Upgrade>,
}

impl Context {
    pub fn new(request: Arc<Request>, response: ResponseBuilder) -> Self {
        Self {
            request,
            response,
            params: Vec::new(),
            upgrade: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.param == name)
            .map(|p| p.value.as_str())
    }

    /// Answers with a raw `response` and hands the connection to `on_upgrade`
    /// instead of writing `self.response`.
    pub fn upgrade(&mut self, response: Vec<u8>, on_upgrade: OnUpgrade) {
        self.upgrade = Some(Upgrade {
            response,
            on_upgrade,
        })
    }

    pub fn take_upgrade(&mut self) -> Option<Upgrade> {
        self.upgrade.take()
    }
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &mut Context) -> Result<()>;
}

#[derive(Clone)]
pub struct Route {
    pub path: String,
    pub method: Option<Method>,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    fn accepts(&self, method: Option<Method>) -> bool {
        match (self.method, method) {
            (None, _) => true,
            // GET routes answer HEAD too
            (Some(Method::GET), Some(Method::HEAD)) => true,
            (expected, actual) => expected == actual,
        }
    }
}

pub trait Router {
    fn handle<H: Handler + 'static>(&mut self, method: Method, path: &str, handler: H) -> &mut Self;
    fn any<H: Handler + 'static>(&mut self, path: &str, handler: H) -> &mut Self;

    fn get<H: Handler + 'static>(&mut self, path: &str, handler: H) -> &mut Self {
        self.handle(Method::GET, path, handler)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct RequestPathParams {
    pub param: String,
    pub value: String,
}

/// Matches a request path against a route pattern.
///
/// `:name` segments capture one segment, `*` captures one segment or, as the
/// last segment, the whole remaining path.
pub fn match_path(request_path: &str, route_path: &str) -> Option<Vec<RequestPathParams>> {
    let mut request_segments = request_path.split('/');
    let mut route_segments = route_path.split('/').peekable();
    let mut params = Vec::new();

    loop {
        match (route_segments.next(), request_segments.next()) {
            (None, None) => return Some(params),
            (Some("*"), Some(segment)) if route_segments.peek().is_none() => {
                let rest: Vec<&str> = std::iter::once(segment).chain(request_segments).collect();
                params.push(RequestPathParams {
                    param: "*".to_string(),
                    value: rest.join("/"),
                });
                return Some(params);
            }
            (Some("*"), Some(segment)) => params.push(RequestPathParams {
                param: "*".to_string(),
                value: segment.to_string(),
            }),
            (Some(s), Some(segment)) if s.starts_with(':') => params.push(RequestPathParams {
                param: s[1..].to_string(),
                value: segment.to_string(),
            }),
            (Some(s), Some(segment)) if s == segment => {}
            _ => return None,
        }
    }
}

/// First route, in registration order, matching the request
pub fn find_route<'r>(
    routes: &'r [Route],
    request: &Request,
) -> Option<(&'r Route, Vec<RequestPathParams>)> {
    let path = request.route_path();
    routes
        .iter()
        .filter(|route| route.accepts(request.method))
        .find_map(|route| match_path(path, &route.path).map(|params| (route, params)))
}

impl Router for HTTPServer {
    fn handle<H: Handler + 'static>(&mut self, method: Method, path: &str, handler: H) -> &mut Self {
        self.add_route(Route {
            path: path.to_string(),
            method: Some(method),
            handler: Arc::new(handler),
        });
        self
    }

    fn any<H: Handler + 'static>(&mut self, path: &str, handler: H) -> &mut Self {
        self.add_route(Route {
            path: path.to_string(),
            method: None,
            handler: Arc::new(handler),
        });
        self
    }
}
