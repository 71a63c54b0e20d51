use std::time::Duration;

use log::debug;
use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::tc3::{self, Credential};

pub const DNSPOD_SERVICE: &str = "dnspod";
pub const DNSPOD_VERSION: &str = "2021-03-23";
/// Returned by DescribeRecordList when nothing matches the filter.
pub const NO_DATA_OF_RECORD: &str = "ResourceNotFound.NoDataOfRecord";
const PAGE_SIZE: u64 = 100;

pub type DnspodResult<T> = std::result::Result<T, DnspodError>;

#[derive(Debug, thiserror::Error)]
pub enum DnspodError {
    #[error("DNSPod API error [{code}] {message} (RequestId: {request_id})")]
    Api {
        code: String,
        message: String,
        request_id: String,
    },
    #[error("Failed to send request to DNSPod")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to parse DNSPod {action} response")]
    Json {
        action: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to sign DNSPod request: {0}")]
    Signing(String),
}

impl DnspodError {
    pub fn is_api(&self) -> bool {
        matches!(self, DnspodError::Api { .. })
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, DnspodError::Api { code, .. } if code == NO_DATA_OF_RECORD)
    }
}

pub struct DnspodClient {
    http: Client,
    endpoint: Url,
    host: String,
    region: String,
    credential: Credential,
}

impl DnspodClient {
    pub fn new(
        http: Client,
        endpoint: &str,
        region: &str,
        credential: Credential,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| anyhow::anyhow!("Invalid DNSPod endpoint {}: {}", endpoint, e))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("DNSPod endpoint {} has no host", endpoint),
        };

        Ok(Self {
            http,
            endpoint,
            host,
            region: region.to_string(),
            credential,
        })
    }

    pub fn http_client(timeout: Duration) -> anyhow::Result<Client> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
    }

    /// Lists every domain of the account, following pagination.
    pub async fn describe_domains(&self) -> DnspodResult<Vec<DomainListItem>> {
        let mut domains = Vec::new();
        loop {
            let request = DescribeDomainListRequest {
                domain_type: "ALL",
                offset: domains.len() as u64,
                limit: PAGE_SIZE,
            };
            let response: DescribeDomainListResponse =
                self.call("DescribeDomainList", &request).await?;

            let fetched = response.domain_list.len();
            domains.extend(response.domain_list);

            let total = response.domain_count_info.map(|info| info.all_total);
            if fetched == 0 || total.map_or(true, |total| domains.len() as u64 >= total) {
                break;
            }
        }
        Ok(domains)
    }

    /// Lists records of `record_type` at `subdomain`, following pagination.
    pub async fn describe_records(
        &self,
        domain: &str,
        subdomain: &str,
        record_type: &str,
    ) -> DnspodResult<Vec<RecordListItem>> {
        let mut records = Vec::new();
        loop {
            let request = DescribeRecordListRequest {
                domain,
                subdomain,
                record_type,
                offset: records.len() as u64,
                limit: PAGE_SIZE,
            };
            let response: DescribeRecordListResponse =
                self.call("DescribeRecordList", &request).await?;

            let fetched = response.record_list.len();
            records.extend(response.record_list);

            let total = response.record_count_info.map(|info| info.total_count);
            if fetched == 0 || total.map_or(true, |total| records.len() as u64 >= total) {
                break;
            }
        }
        Ok(records)
    }

    pub async fn create_record(&self, request: &CreateRecordRequest<'_>) -> DnspodResult<u64> {
        let response: CreateRecordResponse = self.call("CreateRecord", request).await?;
        Ok(response.record_id)
    }

    pub async fn delete_record(&self, domain: &str, record_id: u64) -> DnspodResult<()> {
        let request = DeleteRecordRequest { domain, record_id };
        let _: EmptyResponse = self.call("DeleteRecord", &request).await?;
        Ok(())
    }

    pub async fn modify_record_status(
        &self,
        domain: &str,
        record_id: u64,
        enabled: bool,
    ) -> DnspodResult<()> {
        let request = ModifyRecordStatusRequest {
            domain,
            record_id,
            status: if enabled { "ENABLE" } else { "DISABLE" },
        };
        let _: EmptyResponse = self.call("ModifyRecordStatus", &request).await?;
        Ok(())
    }

    async fn call<Req, Resp>(&self, action: &str, request: &Req) -> DnspodResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_string(request).map_err(|source| DnspodError::Json {
            action: action.to_string(),
            source,
        })?;
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let authorization =
            tc3::authorization(&self.credential, DNSPOD_SERVICE, &self.host, &payload, timestamp)
                .map_err(|e| DnspodError::Signing(e.to_string()))?;

        debug!("DNSPod {} request: {}", action, payload);

        let mut builder = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", authorization)
            .header("Content-Type", tc3::CONTENT_TYPE)
            .header("X-TC-Action", action)
            .header("X-TC-Timestamp", timestamp.to_string())
            .header("X-TC-Version", DNSPOD_VERSION);
        if !self.region.is_empty() {
            builder = builder.header("X-TC-Region", &self.region);
        }

        let body = builder
            .body(payload)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_response(action, &body)
    }
}

fn parse_response<Resp: DeserializeOwned>(action: &str, body: &str) -> DnspodResult<Resp> {
    let json_error = |source: serde_json::Error| DnspodError::Json {
        action: action.to_string(),
        source,
    };

    let envelope: ResponseEnvelope = serde_json::from_str(body).map_err(json_error)?;
    if let Some(error) = envelope.response.get("Error") {
        let error: ApiError = serde_json::from_value(error.clone()).map_err(json_error)?;
        return Err(DnspodError::Api {
            code: error.code,
            message: error.message,
            request_id: envelope
                .response
                .get("RequestId")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
        });
    }

    serde_json::from_value(envelope.response).map_err(json_error)
}

// DNSPod API types

#[derive(Debug, Serialize)]
struct DescribeDomainListRequest {
    #[serde(rename = "Type")]
    domain_type: &'static str,
    #[serde(rename = "Offset")]
    offset: u64,
    #[serde(rename = "Limit")]
    limit: u64,
}

#[derive(Debug, Serialize)]
struct DescribeRecordListRequest<'a> {
    #[serde(rename = "Domain")]
    domain: &'a str,
    #[serde(rename = "Subdomain")]
    subdomain: &'a str,
    #[serde(rename = "RecordType")]
    record_type: &'a str,
    #[serde(rename = "Offset")]
    offset: u64,
    #[serde(rename = "Limit")]
    limit: u64,
}

#[derive(Debug, Serialize)]
pub struct CreateRecordRequest<'a> {
    #[serde(rename = "Domain")]
    pub domain: &'a str,
    #[serde(rename = "SubDomain")]
    pub sub_domain: &'a str,
    #[serde(rename = "RecordType")]
    pub record_type: &'a str,
    #[serde(rename = "RecordLine")]
    pub record_line: &'a str,
    #[serde(rename = "Value")]
    pub value: &'a str,
    #[serde(rename = "TTL")]
    pub ttl: u32,
}

#[derive(Debug, Serialize)]
struct DeleteRecordRequest<'a> {
    #[serde(rename = "Domain")]
    domain: &'a str,
    #[serde(rename = "RecordId")]
    record_id: u64,
}

#[derive(Debug, Serialize)]
struct ModifyRecordStatusRequest<'a> {
    #[serde(rename = "Domain")]
    domain: &'a str,
    #[serde(rename = "RecordId")]
    record_id: u64,
    #[serde(rename = "Status")]
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResponseEnvelope {
    #[serde(rename = "Response")]
    response: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DescribeDomainListResponse {
    #[serde(rename = "DomainCountInfo")]
    domain_count_info: Option<DomainCountInfo>,
    #[serde(rename = "DomainList", default)]
    domain_list: Vec<DomainListItem>,
}

#[derive(Debug, Deserialize)]
struct DomainCountInfo {
    #[serde(rename = "AllTotal")]
    all_total: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DomainListItem {
    #[serde(rename = "DomainId")]
    pub domain_id: u64,
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct DescribeRecordListResponse {
    #[serde(rename = "RecordCountInfo")]
    record_count_info: Option<RecordCountInfo>,
    #[serde(rename = "RecordList", default)]
    record_list: Vec<RecordListItem>,
}

#[derive(Debug, Deserialize)]
struct RecordCountInfo {
    #[serde(rename = "TotalCount")]
    total_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordListItem {
    #[serde(rename = "RecordId")]
    pub record_id: u64,
    #[serde(rename = "Value", default)]
    pub value: String,
    #[serde(rename = "Status", default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct CreateRecordResponse {
    #[serde(rename = "RecordId")]
    record_id: u64,
}

#[derive(Debug, Deserialize)]
struct EmptyResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DnspodClient {
        DnspodClient::new(
            Client::new(),
            &server.uri(),
            "",
            Credential {
                secret_id: "AKIDtest".to_string(),
                secret_key: "secret".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn parses_api_error() {
        let err = parse_response::<EmptyResponse>(
            "DescribeRecordList",
            r#"{"Response":{"Error":{"Code":"ResourceNotFound.NoDataOfRecord","Message":"记录列表为空。"},"RequestId":"req-1"}}"#,
        )
        .unwrap_err();

        assert!(err.is_no_data());
        match err {
            DnspodError::Api { request_id, .. } => assert_eq!(request_id, "req-1"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn garbage_body_is_json_error() {
        let err = parse_response::<EmptyResponse>("DeleteRecord", "<html>").unwrap_err();
        assert!(!err.is_api());
        assert!(err.to_string().contains("DeleteRecord"));
    }

    #[test]
    fn endpoint_host_keeps_port() {
        let client = DnspodClient::new(
            Client::new(),
            "http://127.0.0.1:8080",
            "",
            Credential {
                secret_id: String::new(),
                secret_key: String::new(),
            },
        )
        .unwrap();
        assert_eq!(client.host, "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn create_record_sends_signed_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(header("X-TC-Action", "CreateRecord"))
            .and(header("X-TC-Version", DNSPOD_VERSION))
            .and(header_exists("X-TC-Timestamp"))
            .and(header_exists("Authorization"))
            .and(body_partial_json(serde_json::json!({
                "Domain": "example.com",
                "SubDomain": "_acme-challenge",
                "RecordType": "TXT",
                "Value": "token"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {"RecordId": 162, "RequestId": "req-2"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record_id = client(&server)
            .create_record(&CreateRecordRequest {
                domain: "example.com",
                sub_domain: "_acme-challenge",
                record_type: "TXT",
                record_line: "默认",
                value: "token",
                ttl: 600,
            })
            .await
            .unwrap();

        assert_eq!(record_id, 162);
    }

    #[tokio::test]
    async fn describe_domains_follows_pages() {
        let server = MockServer::start().await;
        let first_page: Vec<_> = (0..100)
            .map(|i| serde_json::json!({"DomainId": i, "Name": format!("d{}.com", i)}))
            .collect();

        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeDomainList"))
            .and(body_partial_json(serde_json::json!({"Offset": 0})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {
                    "DomainCountInfo": {"AllTotal": 101},
                    "DomainList": first_page,
                    "RequestId": "req-3"
                }
            })))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeDomainList"))
            .and(body_partial_json(serde_json::json!({"Offset": 100})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {
                    "DomainCountInfo": {"AllTotal": 101},
                    "DomainList": [{"DomainId": 1000, "Name": "example.com"}],
                    "RequestId": "req-4"
                }
            })))
            .mount(&server)
            .await;

        let domains = client(&server).describe_domains().await.unwrap();
        assert_eq!(domains.len(), 101);
        assert_eq!(domains[100].name, "example.com");
    }

    #[tokio::test]
    async fn http_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client(&server).delete_record("example.com", 1).await.unwrap_err();
        assert!(matches!(err, DnspodError::Transport(_)));

        let chain = format!("{:#}", anyhow::Error::new(err));
        assert!(chain.starts_with("Failed to send request to DNSPod: "));
        assert_eq!(chain.matches("Bad Gateway").count(), 1);
    }

    #[tokio::test]
    async fn describe_records_follows_pages() {
        let server = MockServer::start().await;
        let first_page: Vec<_> = (0..100)
            .map(|i| serde_json::json!({"RecordId": i, "Value": format!("v{}", i), "Status": "ENABLE"}))
            .collect();

        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeRecordList"))
            .and(body_partial_json(serde_json::json!({
                "Domain": "example.com",
                "Subdomain": "_acme-challenge",
                "RecordType": "TXT",
                "Offset": 0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {
                    "RecordCountInfo": {"TotalCount": 101},
                    "RecordList": first_page,
                    "RequestId": "req-5"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(header("X-TC-Action", "DescribeRecordList"))
            .and(body_partial_json(serde_json::json!({"Offset": 100})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Response": {
                    "RecordCountInfo": {"TotalCount": 101},
                    "RecordList": [{"RecordId": 500, "Value": "token", "Status": "ENABLE"}],
                    "RequestId": "req-6"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = client(&server)
            .describe_records("example.com", "_acme-challenge", "TXT")
            .await
            .unwrap();
        assert_eq!(records.len(), 101);
        assert_eq!(records[100].record_id, 500);
        assert_eq!(records[100].value, "token");
    }

    #[test]
    fn json_error_message_does_not_repeat_source() {
        let err = parse_response::<EmptyResponse>("DeleteRecord", "<html>").unwrap_err();
        let chain = format!("{:#}", anyhow::Error::new(err));
        assert!(chain.starts_with("Failed to parse DNSPod DeleteRecord response: "));
        assert_eq!(chain.matches("expected value").count(), 1);
    }
}
