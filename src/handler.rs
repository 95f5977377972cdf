//! Request handling seam between the connection engine and the application.
//!
//! The engine calls [`Handler::handle`] once per fully parsed request. A
//! handler never fails: problems become 4xx/5xx responses.

use std::net::SocketAddr;

use crate::config::{Config, Location, ServerConfig};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request, ctx: &RouteContext<'_>) -> Response;
}

impl<F> Handler for F
where
    F: Fn(&Request, &RouteContext<'_>) -> Response + Send + Sync,
{
    fn handle(&self, request: &Request, ctx: &RouteContext<'_>) -> Response {
        self(request, ctx)
    }
}

/// Where a request arrived, plus access to route lookup.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext<'a> {
    pub config: &'a Config,
    /// Configured host of the listener that accepted the connection
    pub listen_host: &'a str,
    /// Configured port of the listener that accepted the connection
    pub listen_port: u16,
    pub peer: SocketAddr,
}

impl<'a> RouteContext<'a> {
    /// Server block selected by listener address and Host header.
    pub fn server(&self, request: &Request) -> Option<&'a ServerConfig> {
        let name = request.header("host").unwrap_or("");
        self.config
            .find_config(self.listen_host, self.listen_port, name)
    }

    pub fn location(&self, request: &Request) -> Option<&'a Location> {
        self.server(request)?.find_location(&request.path)
    }
}

/// Placeholder application: applies location redirects and method rules,
/// then answers with a small HTML page naming the requested path.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHandler;

impl Handler for DefaultHandler {
    fn handle(&self, request: &Request, ctx: &RouteContext<'_>) -> Response {
        let Some(location) = ctx.location(request) else {
            return Response::not_found();
        };

        if let Some(redirect) = &location.redirect {
            return ResponseBuilder::new(StatusCode::from_u16(redirect.status))
                .header("Location", redirect.target.clone())
                .build();
        }

        if !location.allows(request.method.as_str()) {
            let mut response = Response::error_page(StatusCode::METHOD_NOT_ALLOWED);
            response.set_header("Allow", location.methods.join(", "));
            return response;
        }

        let body = format!(
            "<html><body><h1>Hello from webserv!</h1><p>Request received for path: {}</p></body></html>",
            request.path
        );
        let length = body.len().to_string();
        let builder = ResponseBuilder::new(StatusCode::OK)
            .version(request.version.clone())
            .header("Content-Type", "text/html")
            .header("Content-Length", length);

        if request.method == Method::HEAD {
            builder.build()
        } else {
            builder.body(body).build()
        }
    }
}
