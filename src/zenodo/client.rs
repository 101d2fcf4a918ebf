//! Blocking HTTP client for the Zenodo deposit API.

use std::fmt;
use std::fs::File;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use ureq::http::Response;
use ureq::Body;
use url::Url;

use crate::config::Settings;
use crate::error::ReleaseError;
use crate::metadata::Metadata;

use super::{base_url, DepositApi, Deposition};

/// Zenodo deposit API client authenticated with a personal access token.
pub struct ZenodoClient {
    base: String,
    authorization: String,
    agent: ureq::Agent,
    upload_agent: ureq::Agent,
}

impl fmt::Debug for ZenodoClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZenodoClient")
            .field("base", &self.base)
            .field("authorization", &"Bearer ***")
            .finish()
    }
}

impl ZenodoClient {
    /// Client for production Zenodo, or the sandbox when `settings.sandbox`.
    pub fn new(settings: &Settings) -> Self {
        Self::with_base_url(
            base_url(settings.sandbox),
            &settings.zenodo_token,
            settings.api_timeout,
            settings.upload_timeout,
        )
    }

    pub fn with_base_url(
        base: &str,
        token: &str,
        api_timeout: Duration,
        upload_timeout: Duration,
    ) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            authorization: format!("Bearer {token}"),
            agent: build_agent(api_timeout),
            upload_agent: build_agent(upload_timeout),
        }
    }

    /// Host every request is sent to.
    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base, path.trim_start_matches('/'))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    config.into()
}

/// Turn a transport result into a successful response or a publish error.
fn checked(
    operation: &str,
    result: Result<Response<Body>, ureq::Error>,
) -> Result<Response<Body>, ReleaseError> {
    let mut response = result.map_err(|source| ReleaseError::ZenodoTransport {
        operation: operation.to_string(),
        message: source.to_string(),
    })?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(ReleaseError::ZenodoStatus {
        operation: operation.to_string(),
        status: status.as_u16(),
        message: error_message(status.as_u16(), &body),
    })
}

fn read_json<T: DeserializeOwned>(
    operation: &str,
    result: Result<Response<Body>, ureq::Error>,
) -> Result<T, ReleaseError> {
    let mut response = checked(operation, result)?;
    response
        .body_mut()
        .read_json::<T>()
        .map_err(|source| ReleaseError::ZenodoResponse {
            operation: operation.to_string(),
            message: source.to_string(),
        })
}

/// Summarize a Zenodo error body, including per-field validation errors.
fn error_message(status: u16, body: &str) -> String {
    let detail = match serde_json::from_str::<Value>(body) {
        Ok(value) => {
            let mut parts = Vec::new();
            if let Some(message) = value.get("message").and_then(Value::as_str) {
                parts.push(message.to_string());
            }
            if let Some(errors) = value.get("errors").and_then(Value::as_array) {
                for error in errors {
                    let field = error.get("field").and_then(Value::as_str);
                    let message = error
                        .get("message")
                        .or_else(|| error.get("messages"))
                        .map(|m| match m {
                            Value::String(text) => text.clone(),
                            other => other.to_string(),
                        });
                    match (field, message) {
                        (Some(field), Some(message)) => parts.push(format!("{field}: {message}")),
                        (None, Some(message)) => parts.push(message),
                        _ => {}
                    }
                }
            }
            parts.join("; ")
        }
        Err(_) => body.trim().to_string(),
    };
    let detail = if detail.is_empty() {
        "no response body".to_string()
    } else {
        detail
    };

    match status {
        401 | 403 => format!("authentication failed: {detail}"),
        429 => format!("rate limited: {detail}"),
        _ => detail,
    }
}

/// Fuzz-only entrypoint for error body summaries.
#[cfg(feature = "fuzzing")]
pub fn fuzz_error_message(status: u16, body: &str) -> String {
    error_message(status, body)
}

/// `{bucket}/{file_name}` with the file name percent-encoded.
fn bucket_file_url(bucket: &str, file_name: &str) -> Result<Url, ReleaseError> {
    let invalid = |message: String| ReleaseError::ZenodoResponse {
        operation: "upload".to_string(),
        message,
    };
    let mut url = Url::parse(bucket).map_err(|source| invalid(format!("bucket link: {source}")))?;
    url.path_segments_mut()
        .map_err(|()| invalid(format!("bucket link '{bucket}' cannot take a path")))?
        .pop_if_empty()
        .push(file_name);
    Ok(url)
}

impl DepositApi for ZenodoClient {
    fn list_depositions(&self, page: u32, size: u32) -> Result<Vec<Deposition>, ReleaseError> {
        tracing::debug!(page, size, "GET depositions");
        let result = self
            .agent
            .get(self.api_url("deposit/depositions"))
            .header("Authorization", &self.authorization)
            .query("page", page.to_string())
            .query("size", size.to_string())
            .query("sort", "mostrecent")
            .call();
        read_json("list depositions", result)
    }

    fn get_deposition(&self, id: u64) -> Result<Deposition, ReleaseError> {
        tracing::debug!(id, "GET deposition");
        let result = self
            .agent
            .get(self.api_url(&format!("deposit/depositions/{id}")))
            .header("Authorization", &self.authorization)
            .call();
        read_json("get deposition", result)
    }

    fn create_deposition(&self) -> Result<Deposition, ReleaseError> {
        tracing::debug!("POST deposition");
        let result = self
            .agent
            .post(self.api_url("deposit/depositions"))
            .header("Authorization", &self.authorization)
            .send_json(serde_json::json!({}));
        read_json("create deposition", result)
    }

    fn new_version(&self, id: u64) -> Result<Deposition, ReleaseError> {
        tracing::debug!(id, "POST newversion");
        let result = self
            .agent
            .post(self.api_url(&format!("deposit/depositions/{id}/actions/newversion")))
            .header("Authorization", &self.authorization)
            .send_empty();
        let parent: Deposition = read_json("new version", result)?;

        let draft_url = parent
            .links
            .latest_draft
            .ok_or_else(|| ReleaseError::ZenodoResponse {
                operation: "new version".to_string(),
                message: format!("deposition {id} returned no latest_draft link"),
            })?;

        let result = self
            .agent
            .get(&draft_url)
            .header("Authorization", &self.authorization)
            .call();
        read_json("get new version draft", result)
    }

    fn delete_file(&self, deposition_id: u64, file_id: &str) -> Result<(), ReleaseError> {
        tracing::debug!(deposition_id, file_id, "DELETE file");
        let result = self
            .agent
            .delete(self.api_url(&format!(
                "deposit/depositions/{deposition_id}/files/{file_id}"
            )))
            .header("Authorization", &self.authorization)
            .call();
        checked("delete file", result).map(|_| ())
    }

    fn upload_file(
        &self,
        deposition: &Deposition,
        file_name: &str,
        path: &Path,
    ) -> Result<(), ReleaseError> {
        let bucket = deposition
            .links
            .bucket
            .as_deref()
            .ok_or_else(|| ReleaseError::ZenodoResponse {
                operation: "upload".to_string(),
                message: format!("deposition {} has no bucket link", deposition.id),
            })?;
        let url = bucket_file_url(bucket, file_name)?;

        let mut file = File::open(path)?;
        let size = file.metadata()?.len();
        tracing::debug!(url = %url, size, "PUT archive");

        let result = self
            .upload_agent
            .put(url.as_str())
            .header("Authorization", &self.authorization)
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", &size.to_string())
            .send(ureq::SendBody::from_reader(&mut file));
        checked("upload", result).map(|_| ())
    }

    fn update_metadata(
        &self,
        deposition_id: u64,
        metadata: &Metadata,
    ) -> Result<Deposition, ReleaseError> {
        tracing::debug!(deposition_id, "PUT metadata");
        let result = self
            .agent
            .put(self.api_url(&format!("deposit/depositions/{deposition_id}")))
            .header("Authorization", &self.authorization)
            .send_json(serde_json::json!({ "metadata": metadata }));
        read_json("update metadata", result)
    }

    fn publish(&self, deposition_id: u64) -> Result<Deposition, ReleaseError> {
        tracing::debug!(deposition_id, "POST publish");
        let result = self
            .agent
            .post(self.api_url(&format!(
                "deposit/depositions/{deposition_id}/actions/publish"
            )))
            .header("Authorization", &self.authorization)
            .send_empty();
        read_json("publish", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReleaseArgs;
    use clap::Parser;

    fn client(sandbox: bool) -> ZenodoClient {
        let mut argv = vec![
            "datalad-release",
            "--zenodo-api-token",
            "tok",
            "--repository",
            "org/data",
        ];
        if sandbox {
            argv.push("--sandbox");
        }
        let settings = Settings::from_args(ReleaseArgs::try_parse_from(argv).unwrap()).unwrap();
        ZenodoClient::new(&settings)
    }

    #[test]
    fn sandbox_flag_selects_sandbox_host() {
        assert_eq!(client(true).base_url(), "https://sandbox.zenodo.org");
        assert_eq!(client(false).base_url(), "https://zenodo.org");
        assert_eq!(
            client(true).api_url("deposit/depositions"),
            "https://sandbox.zenodo.org/api/deposit/depositions"
        );
    }

    #[test]
    fn debug_output_hides_token() {
        let rendered = format!("{:?}", client(false));
        assert!(!rendered.contains("tok"));
    }

    #[test]
    fn validation_errors_are_summarized() {
        let body = r#"{"status": 400, "message": "Validation error.",
            "errors": [{"field": "metadata.creators", "message": "Field may not be null."}]}"#;
        assert_eq!(
            error_message(400, body),
            "Validation error.; metadata.creators: Field may not be null."
        );
    }

    #[test]
    fn auth_and_rate_limit_are_labelled() {
        assert_eq!(
            error_message(401, r#"{"message": "The server could not verify"}"#),
            "authentication failed: The server could not verify"
        );
        assert_eq!(error_message(429, ""), "rate limited: no response body");
        assert_eq!(error_message(502, "Bad Gateway\n"), "Bad Gateway");
    }

    #[test]
    fn bucket_url_encodes_file_name() {
        let url = bucket_file_url("https://zenodo.org/api/files/abc-123", "v1 final.tar.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://zenodo.org/api/files/abc-123/v1%20final.tar.gz"
        );

        let trailing = bucket_file_url("https://zenodo.org/api/files/abc/", "a.tar").unwrap();
        assert_eq!(trailing.as_str(), "https://zenodo.org/api/files/abc/a.tar");
    }
}
