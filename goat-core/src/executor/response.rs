use crate::requestfile::request::canonical_header_key;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;

#[derive(Debug, thiserror::Error)]
#[error("response body is not valid JSON: {0}")]
pub struct ResponseError(#[from] serde_json::Error);

/// Response as exposed to scripts and templates under `response`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub status_code: u16,
    /// Status code with reason phrase, e.g. `200 OK`.
    pub status: String,
    /// Protocol version, e.g. `HTTP/1.1`.
    pub proto: String,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub header: IndexMap<String, Vec<String>>,
    /// Value of the `Content-Length` header or `-1` when unknown.
    pub content_length: i64,
    pub body: String,
    /// Body decoded as JSON, `null` when the body is not JSON.
    pub body_json: JsonValue,
}

impl Response {
    /// Converts a transport response. With `force_json` a body which does not decode as JSON
    /// is an error, otherwise decoding is best effort.
    pub fn from_http(res: &http::Response<Vec<u8>>, force_json: bool) -> Result<Response, ResponseError> {
        let status = res.status();
        let status_text = match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        };

        let (proto, proto_major, proto_minor) = match res.version() {
            http::Version::HTTP_09 => ("HTTP/0.9", 0, 9),
            http::Version::HTTP_10 => ("HTTP/1.0", 1, 0),
            http::Version::HTTP_2 => ("HTTP/2.0", 2, 0),
            http::Version::HTTP_3 => ("HTTP/3.0", 3, 0),
            _ => ("HTTP/1.1", 1, 1),
        };

        let mut header: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in res.headers() {
            header
                .entry(canonical_header_key(name.as_str()))
                .or_default()
                .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
        }

        let content_length = res
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(-1);

        let body = String::from_utf8_lossy(res.body()).into_owned();
        let body_json = if force_json {
            serde_json::from_str(&body)?
        } else {
            serde_json::from_str(&body).unwrap_or(JsonValue::Null)
        };

        Ok(Response {
            status_code: status.as_u16(),
            status: status_text,
            proto: proto.to_string(),
            proto_major,
            proto_minor,
            header,
            content_length,
            body,
            body_json,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn http_response(body: &str) -> http::Response<Vec<u8>> {
        http::Response::builder()
            .status(404)
            .header("content-type", "application/json")
            .header("x-multi", "a")
            .header("x-multi", "b")
            .header("content-length", body.len().to_string())
            .body(body.as_bytes().to_vec())
            .unwrap()
    }

    #[test]
    fn decodes_json_body() -> eyre::Result<()> {
        let res = Response::from_http(&http_response(r#"{"id": 1}"#), false)?;

        assert_eq!(res.status_code, 404);
        assert_eq!(res.status, "404 Not Found");
        assert_eq!(res.proto, "HTTP/1.1");
        assert_eq!(res.header["X-Multi"], vec!["a", "b"]);
        assert_eq!(res.content_length, 9);
        assert_eq!(res.body_json, json!({"id": 1}));
        Ok(())
    }

    #[test]
    fn non_json_body_is_null_unless_forced() -> eyre::Result<()> {
        let res = Response::from_http(&http_response("plain"), false)?;
        assert_eq!(res.body_json, JsonValue::Null);
        assert_eq!(res.body, "plain");

        assert!(Response::from_http(&http_response("plain"), true).is_err());
        Ok(())
    }

    #[test]
    fn serialized_field_names() -> eyre::Result<()> {
        let res = Response::from_http(&http_response("{}"), false)?;
        let value = serde_json::to_value(&res)?;
        for key in [
            "StatusCode",
            "Status",
            "Proto",
            "ProtoMajor",
            "ProtoMinor",
            "Header",
            "ContentLength",
            "Body",
            "BodyJson",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        Ok(())
    }
}
