use std::collections::HashMap;

/// HTTP request methods.
///
/// The common verbs get their own variant. Extension methods are kept
/// verbatim in `Other` so that routing can still answer them (usually with
/// 405 or 501) instead of failing the parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
    /// Any other token sent in the method position
    Other(String),
}

impl Method {
    /// Parses an HTTP method token.
    ///
    /// Method names are case-sensitive, so `get` is an extension method and
    /// not `GET`.
    ///
    /// # Example
    ///
    /// ```
    /// # use webserv::http::request::Method;
    /// assert_eq!(Method::parse("GET"), Method::GET);
    /// assert_eq!(Method::parse("get"), Method::Other("get".to_string()));
    /// ```
    pub fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::GET,
            "POST" => Method::POST,
            "PUT" => Method::PUT,
            "DELETE" => Method::DELETE,
            "HEAD" => Method::HEAD,
            "OPTIONS" => Method::OPTIONS,
            "PATCH" => Method::PATCH,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::OPTIONS => "OPTIONS",
            Method::PATCH => "PATCH",
            Method::Other(s) => s,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a parsed HTTP request from a client.
///
/// Header names are stored lowercased; a repeated header keeps the last
/// value seen. The body is already de-chunked when the request arrived with
/// `Transfer-Encoding: chunked`.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// The HTTP method (GET, POST, etc.)
    pub method: Method,
    /// The path part of the request target, without the query string
    pub path: String,
    /// Everything after the first `?` of the request target, empty if none
    pub query: String,
    /// HTTP version, either "HTTP/1.1" or "HTTP/1.0"
    pub version: String,
    /// Request headers keyed by lowercased name
    pub headers: HashMap<String, String>,
    /// Request body
    pub body: Vec<u8>,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            path: String::new(),
            query: String::new(),
            version: String::new(),
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }
}

/// Builder for constructing Request objects.
pub struct RequestBuilder {
    method: Option<Method>,
    path: Option<String>,
    query: String,
    version: Option<String>,
    headers: HashMap<String, String>,
    body: Vec<u8>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            method: None,
            path: None,
            query: String::new(),
            version: None,
            headers: HashMap::new(),
            body: Vec::new(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn header(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(key.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn build(self) -> Result<Request, &'static str> {
        Ok(Request {
            method: self.method.ok_or("method missing")?,
            path: self.path.ok_or("path missing")?,
            query: self.query,
            version: self.version.unwrap_or_else(|| "HTTP/1.1".to_string()),
            headers: self.headers,
            body: self.body,
        })
    }
}

impl Request {
    /// Retrieves a header value by name, ignoring case.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(&key.to_ascii_lowercase())
            .map(|v| v.as_str())
    }

    /// The `Content-Length` header parsed as a usize, 0 when missing or invalid.
    pub fn content_length(&self) -> usize {
        self.header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.trim().to_ascii_lowercase().ends_with("chunked"))
            .unwrap_or(false)
    }

    /// Host header without a port suffix.
    pub fn host(&self) -> Option<&str> {
        self.header("host").map(|h| match h.rfind(':') {
            // "[::1]" has colons but no port
            Some(i) if !h[i..].contains(']') => &h[..i],
            _ => h,
        })
    }

    /// Whether the client asked to reuse the connection.
    ///
    /// Only an explicit `Connection` header containing `keep-alive`
    /// (case-insensitive) counts; a missing header means close.
    pub fn keep_alive(&self) -> bool {
        self.header("connection")
            .map(|v| v.to_ascii_lowercase().contains("keep-alive"))
            .unwrap_or(false)
    }

    /// Request target as sent by the client, path plus query string.
    pub fn target(&self) -> String {
        if self.query.is_empty() {
            self.path.clone()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}
