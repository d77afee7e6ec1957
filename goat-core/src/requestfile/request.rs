use super::{template, value::Value};
use crate::engine::State;
use indexmap::IndexMap;
use serde::Serialize;
use std::{fmt, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("request template has already been parsed")]
    AlreadyParsed,
    #[error("request template has already been pre-parsed")]
    AlreadyPreParsed,
    #[error(transparent)]
    Template(#[from] template::TemplateError),
    #[error("failed reading content file {path}: {source}")]
    ReadContent {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid request uri '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },
    #[error("failed building request: {0}")]
    Build(#[from] http::Error),
}

/// Raw content of a `[Body]`, `[PreScript]` or `[Script]` block.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub enum Data {
    #[default]
    None,
    Text(String),
    /// Content referenced with `@path`, resolved relative to `base_dir`.
    File { path: String, base_dir: PathBuf },
}

impl Data {
    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn read(&self) -> Result<Vec<u8>, Error> {
        match self {
            Data::None => Ok(Vec::new()),
            Data::Text(text) => Ok(text.as_bytes().to_vec()),
            Data::File { path, base_dir } => {
                let full = base_dir.join(path);
                std::fs::read(&full).map_err(|source| Error::ReadContent { path: full, source })
            }
        }
    }

    pub fn read_to_string(&self) -> Result<String, Error> {
        let bytes = self.read()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn apply_template(&self, state: &State) -> Result<Data, Error> {
        Ok(match self {
            Data::None => Data::None,
            Data::Text(text) => Data::Text(template::apply(text, state)?),
            Data::File { path, base_dir } => Data::File {
                path: template::apply(path, state)?,
                base_dir: base_dir.clone(),
            },
        })
    }
}

/// Case normalising, multi-valued header set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Headers(IndexMap<String, Vec<String>>);

impl Headers {
    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.0
            .entry(canonical_header_key(key))
            .or_default()
            .push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(&canonical_header_key(key)).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn merge(&mut self, other: &Headers) {
        for (key, values) in other.iter() {
            for value in values {
                self.add(key, value.clone());
            }
        }
    }
}

/// Canonical MIME header form: the first letter and any letter following a hyphen are upper
/// case, everything else lower case. `content-TYPE` becomes `Content-Type`.
pub fn canonical_header_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Request {
    pub method: String,
    pub uri: String,
    pub headers: Headers,
    pub query_params: IndexMap<String, Value>,
    pub body: Data,
    pub pre_script: Data,
    pub script: Data,
    pub options: IndexMap<String, Value>,
    /// File the request was declared in.
    #[serde(skip)]
    pub path: PathBuf,
    /// One based line of the request head.
    pub line: usize,

    #[serde(skip)]
    parsed: bool,
    #[serde(skip)]
    pre_parsed: bool,
}

impl Request {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Request {
        Request {
            method: method.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    /// Fills everything this request does not define itself from `defaults`. Headers are
    /// additive, explicitly set query parameters and options win over default ones.
    pub fn merge(&mut self, defaults: &Request) {
        self.headers.merge(&defaults.headers);

        for (key, value) in &defaults.query_params {
            if !self.query_params.contains_key(key) {
                self.query_params.insert(key.clone(), value.clone());
            }
        }
        for (key, value) in &defaults.options {
            if !self.options.contains_key(key) {
                self.options.insert(key.clone(), value.clone());
            }
        }

        if self.body.is_none() {
            self.body = defaults.body.clone();
        }
        if self.pre_script.is_none() {
            self.pre_script = defaults.pre_script.clone();
        }
        if self.script.is_none() {
            self.script = defaults.script.clone();
        }
    }

    /// Templates the `[PreScript]` block. Must run before [`Request::substitute`].
    pub fn pre_substitute(&mut self, state: &State) -> Result<(), Error> {
        if self.pre_parsed {
            return Err(Error::AlreadyPreParsed);
        }
        self.pre_parsed = true;
        self.pre_script = self.pre_script.apply_template(state)?;
        Ok(())
    }

    /// Templates the request against `state`. Options are evaluated first; when the
    /// `condition` option evaluates to `false` the remaining parts are left untouched since
    /// the request is not going to be sent.
    pub fn substitute(&mut self, state: &State) -> Result<(), Error> {
        if self.parsed {
            return Err(Error::AlreadyParsed);
        }
        self.parsed = true;

        template::apply_to_map(&mut self.options, state)?;
        if self.options.get("condition").and_then(Value::as_bool) == Some(false) {
            return Ok(());
        }

        self.uri = template::apply(&self.uri, state)?;
        template::apply_to_map(&mut self.query_params, state)?;

        let mut headers = Headers::default();
        for (key, values) in self.headers.iter() {
            for value in values {
                headers.add(key, template::apply(value, state)?);
            }
        }
        self.headers = headers;

        self.body = self.body.apply_template(state)?;
        self.script = self.script.apply_template(state)?;

        Ok(())
    }

    pub fn to_http_request(&self) -> Result<http::Request<Vec<u8>>, Error> {
        let mut url = url::Url::parse(&self.uri).map_err(|source| Error::InvalidUri {
            uri: self.uri.clone(),
            source,
        })?;

        if !self.query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.query_params {
                match value {
                    Value::Array(items) => {
                        for item in items {
                            pairs.append_pair(key, &item.to_string());
                        }
                    }
                    other => {
                        pairs.append_pair(key, &other.to_string());
                    }
                }
            }
        }

        let mut builder = http::Request::builder()
            .method(self.method.as_str())
            .uri(url.as_str());
        for (key, values) in self.headers.iter() {
            for value in values {
                builder = builder.header(key.as_str(), value.as_str());
            }
        }

        Ok(builder.body(self.body.read()?)?)
    }

    pub fn location(&self) -> String {
        format!("{}:{}", self.path.display(), self.line)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.uri)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    fn state(v: serde_json::Value) -> State {
        match v {
            serde_json::Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test_case("content-type", "Content-Type"; "lower")]
    #[test_case("X-API-KEY", "X-Api-Key"; "upper")]
    #[test_case("key-1", "Key-1"; "digits")]
    fn canonical_keys(input: &str, expected: &str) {
        assert_eq!(canonical_header_key(input), expected);
    }

    #[test]
    fn headers_accumulate_case_insensitively() {
        let mut headers = Headers::default();
        headers.add("Accept", "a");
        headers.add("accept", "b");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("ACCEPT"), Some(&["a".to_string(), "b".to_string()][..]));
    }

    #[test]
    fn merge_prefers_own_values() {
        let mut req = Request::new("GET", "http://localhost");
        req.query_params.insert("a".into(), Value::Integer(1));
        req.body = Data::Text("own".into());

        let mut defaults = Request::default();
        defaults.query_params.insert("a".into(), Value::Integer(2));
        defaults.query_params.insert("b".into(), Value::Integer(3));
        defaults.body = Data::Text("default".into());
        defaults.script = Data::Text("assert(true)".into());
        defaults.headers.add("X-Default", "1");

        req.merge(&defaults);

        assert_eq!(req.query_params.get("a"), Some(&Value::Integer(1)));
        assert_eq!(req.query_params.get("b"), Some(&Value::Integer(3)));
        assert_eq!(req.body, Data::Text("own".into()));
        assert_eq!(req.script, Data::Text("assert(true)".into()));
        assert_eq!(req.headers.get("x-default"), Some(&["1".to_string()][..]));
    }

    #[test]
    fn substitute_templates_all_parts() -> eyre::Result<()> {
        let mut req = Request::new("POST", "{{ host }}/users");
        req.headers.add("Authorization", "Bearer {{ token }}");
        req.query_params
            .insert("page".into(), Value::Placeholder(" page ".into()));
        req.body = Data::Text(r#"{"name": "{{ name }}"}"#.into());

        let st = state(json!({"host": "http://localhost", "token": "abc", "page": 2, "name": "x"}));
        req.substitute(&st)?;

        assert_eq!(req.uri, "http://localhost/users");
        assert_eq!(req.headers.get("authorization"), Some(&["Bearer abc".to_string()][..]));
        assert_eq!(req.query_params.get("page"), Some(&Value::Integer(2)));
        assert_eq!(req.body, Data::Text(r#"{"name": "x"}"#.into()));
        Ok(())
    }

    #[test]
    fn substitute_twice_fails() -> eyre::Result<()> {
        let mut req = Request::new("GET", "http://localhost");
        req.substitute(&State::new())?;
        assert!(matches!(req.substitute(&State::new()), Err(Error::AlreadyParsed)));
        Ok(())
    }

    #[test]
    fn pre_substitute_twice_fails() -> eyre::Result<()> {
        let mut req = Request::new("GET", "http://localhost");
        req.pre_substitute(&State::new())?;
        assert!(matches!(
            req.pre_substitute(&State::new()),
            Err(Error::AlreadyPreParsed)
        ));
        Ok(())
    }

    #[test]
    fn false_condition_skips_templating() -> eyre::Result<()> {
        let mut req = Request::new("GET", "{{ missing }}");
        req.options.insert("condition".into(), Value::Bool(false));
        req.substitute(&State::new())?;
        assert_eq!(req.uri, "{{ missing }}");
        Ok(())
    }

    #[test]
    fn http_request_repeats_array_params() -> eyre::Result<()> {
        let mut req = Request::new("GET", "http://localhost/search");
        req.query_params.insert(
            "tag".into(),
            Value::Array(vec!["a".into(), "b".into()]),
        );
        req.query_params.insert("limit".into(), Value::Integer(10));
        req.headers.add("Accept", "application/json");
        req.body = Data::Text("payload".into());

        let http_req = req.to_http_request()?;
        assert_eq!(
            http_req.uri().to_string(),
            "http://localhost/search?tag=a&tag=b&limit=10"
        );
        assert_eq!(http_req.headers()["accept"], "application/json");
        assert_eq!(http_req.body(), b"payload");
        Ok(())
    }

    #[test]
    fn file_data_is_read_relative_to_base_dir() -> eyre::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("body.json"), "{}")?;
        let data = Data::File {
            path: "body.json".into(),
            base_dir: dir.path().to_path_buf(),
        };
        assert_eq!(data.read_to_string()?, "{}");
        Ok(())
    }
}
