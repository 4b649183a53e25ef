use hyper::{header, Method, Request, Uri};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Serialize};
use tokio_rustls::rustls;

use crate::{error::TransportError, settings::FirebaseSettings};

pub type HyperHttpsClient = hyper::Client<hyper_rustls::HttpsConnector<hyper::client::HttpConnector>>;

pub fn mk_hyper_https_client(settings: &FirebaseSettings) -> Result<HyperHttpsClient, TransportError> {
    let builder = hyper_rustls::HttpsConnectorBuilder::new();

    // Allow overriding the trusted roots, e.g. when talking to a local
    // emulator through a proxy with a self signed certificate
    let https = match &settings.ca_cert {
        Some(pem) => {
            let certs = rustls_pemfile::certs(&mut pem.as_bytes())
                .map_err(|e| TransportError::Request(format!("unreadable ca_cert: {e}")))?;

            let mut roots = rustls::RootCertStore::empty();
            let (added, _ignored) = roots.add_parsable_certificates(&certs);
            if added == 0 {
                return Err(TransportError::Request(
                    "ca_cert contains no usable certificates".to_string(),
                ));
            }

            let tls_config = rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(roots)
                .with_no_client_auth();

            builder
                .with_tls_config(tls_config)
                .https_or_http()
                .enable_http1()
                .build()
        }
        None => builder.with_native_roots().https_or_http().enable_http1().build(),
    };

    Ok(hyper::Client::builder().build(https))
}

async fn send<T: DeserializeOwned>(
    client: &HyperHttpsClient,
    request: Request<hyper::Body>,
) -> Result<T, TransportError> {
    let result = client.request(request).await?;
    let status = result.status();
    let body_bytes = hyper::body::to_bytes(result.into_body()).await?;

    if !status.is_success() {
        return Err(TransportError::Status {
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body_bytes).into_owned(),
        });
    }

    let de = &mut serde_json::Deserializer::from_slice(&body_bytes);
    let response: T = serde_path_to_error::deserialize(de)?;

    Ok(response)
}

pub async fn mk_get_request<T: DeserializeOwned>(
    client: &HyperHttpsClient,
    uri: &Uri,
) -> Result<T, TransportError> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(hyper::Body::empty())?;

    send(client, request).await
}

/// Sends `body` as JSON with the given method (PUT, PATCH, POST) and decodes
/// the JSON response.
pub async fn mk_json_request<RequestBody, ResponseBody>(
    client: &HyperHttpsClient,
    method: Method,
    uri: &Uri,
    body: &RequestBody,
) -> Result<ResponseBody, TransportError>
where
    RequestBody: Serialize + ?Sized,
    ResponseBody: DeserializeOwned,
{
    let body = serde_json::to_string(body)?;

    let request = Request::builder()
        .method(method)
        .header(header::CONTENT_TYPE, "application/json")
        .uri(uri)
        .body(body.into())?;

    send(client, request).await
}

fn encode_form(form: &[(&str, &str)]) -> String {
    form.iter()
        .map(|(k, v)| {
            format!(
                "{}={}",
                utf8_percent_encode(k, NON_ALPHANUMERIC),
                utf8_percent_encode(v, NON_ALPHANUMERIC)
            )
        })
        .collect::<Vec<_>>()
        .join("&")
}

pub async fn mk_form_request<ResponseBody: DeserializeOwned>(
    client: &HyperHttpsClient,
    uri: &Uri,
    form: &[(&str, &str)],
) -> Result<ResponseBody, TransportError> {
    let body = encode_form(form);

    let request = Request::builder()
        .method(Method::POST)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .uri(uri)
        .body(body.into())?;

    send(client, request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_values_are_percent_encoded() {
        let body = encode_form(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", "AMf-vB+x/y==&z"),
        ]);

        assert_eq!(
            body,
            "grant%5Ftype=refresh%5Ftoken&refresh%5Ftoken=AMf%2DvB%2Bx%2Fy%3D%3D%26z"
        );
    }
}
