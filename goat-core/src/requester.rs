//! HTTP transport used by the executor.
//!
//! The executor only depends on the [`Requester`] trait. [`HttpRequester`] is the
//! `reqwest` backed implementation with named cookie jars shared across a run.
use crate::requestfile::Value;
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{
    cookie::{CookieStore, Jar},
    header::HeaderValue,
    redirect::Policy,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::*;

pub const DEFAULT_COOKIE_JAR: &str = "default";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HttpError: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to acquire cookie jar lock")]
    Lock,
    #[error("option '{name}' must be {expected}")]
    InvalidOption {
        name: &'static str,
        expected: &'static str,
    },
}

/// Transport options of a single request, read from its `[Options]` block.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub cookie_jar: String,
    pub store_cookies: bool,
    pub send_cookies: bool,
    pub follow_redirects: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        RequestOptions {
            cookie_jar: DEFAULT_COOKIE_JAR.to_string(),
            store_cookies: true,
            send_cookies: true,
            follow_redirects: true,
        }
    }
}

impl RequestOptions {
    pub fn from_options(options: &IndexMap<String, Value>) -> Result<RequestOptions, Error> {
        let mut opts = RequestOptions::default();

        if let Some(jar) = options.get("cookiejar") {
            opts.cookie_jar = match jar {
                Value::String(s) => s.clone(),
                Value::Integer(i) => i.to_string(),
                _ => {
                    return Err(Error::InvalidOption {
                        name: "cookiejar",
                        expected: "a string or an integer",
                    })
                }
            };
        }
        opts.store_cookies = bool_option(options, "storecookies", opts.store_cookies)?;
        opts.send_cookies = bool_option(options, "sendcookies", opts.send_cookies)?;
        opts.follow_redirects = bool_option(options, "followredirects", opts.follow_redirects)?;

        Ok(opts)
    }
}

fn bool_option(
    options: &IndexMap<String, Value>,
    name: &'static str,
    default: bool,
) -> Result<bool, Error> {
    match options.get(name) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(_) => Err(Error::InvalidOption {
            name,
            expected: "a boolean",
        }),
    }
}

#[async_trait]
pub trait Requester: Send + Sync {
    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
        options: &RequestOptions,
    ) -> Result<http::Response<Vec<u8>>, Error>;
}

/// Cookie store which forwards to a shared jar unless sending or storing is disabled for the
/// current request.
struct GatedJar {
    jar: Arc<Jar>,
    store: bool,
    send: bool,
}

impl CookieStore for GatedJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &url::Url) {
        if self.store {
            self.jar.set_cookies(cookie_headers, url);
        }
    }

    fn cookies(&self, url: &url::Url) -> Option<HeaderValue> {
        if self.send {
            self.jar.cookies(url)
        } else {
            None
        }
    }
}

#[derive(Default)]
pub struct HttpRequester {
    jars: Mutex<HashMap<String, Arc<Jar>>>,
    secure: bool,
}

impl HttpRequester {
    /// Creates a requester. TLS certificates are only verified when `secure` is set.
    pub fn new(secure: bool) -> HttpRequester {
        HttpRequester {
            jars: Mutex::default(),
            secure,
        }
    }

    fn jar(&self, name: &str) -> Result<Arc<Jar>, Error> {
        let mut jars = self.jars.lock().map_err(|_| Error::Lock)?;
        Ok(jars.entry(name.to_string()).or_default().clone())
    }

    fn client(&self, options: &RequestOptions) -> Result<reqwest::Client, Error> {
        let store = GatedJar {
            jar: self.jar(&options.cookie_jar)?,
            store: options.store_cookies,
            send: options.send_cookies,
        };
        let redirect = if options.follow_redirects {
            Policy::default()
        } else {
            Policy::none()
        };

        Ok(reqwest::Client::builder()
            .cookie_provider(Arc::new(store))
            .redirect(redirect)
            .danger_accept_invalid_certs(!self.secure)
            .build()?)
    }
}

#[async_trait]
impl Requester for HttpRequester {
    async fn execute(
        &self,
        request: http::Request<Vec<u8>>,
        options: &RequestOptions,
    ) -> Result<http::Response<Vec<u8>>, Error> {
        let client = self.client(options)?;
        let request = reqwest::Request::try_from(request)?;
        debug!(method = %request.method(), url = %request.url(), jar = %options.cookie_jar, "sending request");

        let res = client.execute(request).await?;
        let status = res.status();
        let version = res.version();
        let headers = res.headers().clone();
        let body = res.bytes().await?.to_vec();
        debug!(%status, len = body.len(), "received response");

        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Ok(response)
    }
}
