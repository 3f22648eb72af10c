use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration as StdDuration,
};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use psync_core::{ExistingKeySet, ProfileRecord, RecordSchema, SheetInput};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, Instrument};

use crate::{PartialWrite, Sink};

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

/// The subset of a Google service-account key file the token exchange needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl ServiceAccountKey {
    pub fn from_json(raw: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(raw).context("service account json is malformed")
    }

    /// Decodes the base64 form used by `GSHEET_JSON`. Embedded whitespace is ignored.
    pub fn from_base64(encoded: &str) -> anyhow::Result<Self> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let raw = STANDARD
            .decode(compact.as_bytes())
            .context("service account credentials are not valid base64")?;
        Self::from_json(&raw)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read(path)
            .with_context(|| format!("reading service account file {}", path.display()))?;
        Self::from_json(&raw)
    }

    /// RS256-signed JWT exchanged for an access token.
    pub fn signed_assertion(&self, now: DateTime<Utc>) -> anyhow::Result<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("service account private key is not a valid RSA PEM")?;
        encode(&Header::new(Algorithm::RS256), &claims, &key).context("signing token assertion")
    }
}

#[derive(Clone)]
pub enum SheetCredentials {
    /// Base64 of the key file, as carried in `GSHEET_JSON`.
    Base64(String),
    File(PathBuf),
}

impl fmt::Debug for SheetCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SheetCredentials::Base64(_) => f.write_str("Base64(<redacted>)"),
            SheetCredentials::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl SheetCredentials {
    pub fn load(&self) -> anyhow::Result<ServiceAccountKey> {
        match self {
            SheetCredentials::Base64(encoded) => ServiceAccountKey::from_base64(encoded),
            SheetCredentials::File(path) => ServiceAccountKey::from_file(path),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub spreadsheet_id: String,
    pub sheet_name: String,
    pub credentials: SheetCredentials,
    pub value_input: SheetInput,
    /// Rows per `values:append` call.
    pub append_chunk: usize,
    pub api_base: String,
    pub timeout: StdDuration,
}

/// Spreadsheet column letter for a zero-based index: 0 → A, 25 → Z, 26 → AA.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(char::from(b'A' + rem as u8));
        n = (n - 1) / 26;
    }
    out.iter().rev().collect()
}

/// A1-notation sheet reference; quotes are doubled inside the quoted name.
fn quote_sheet(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

fn values_url(
    api_base: &str,
    spreadsheet_id: &str,
    range: &str,
    suffix: &str,
) -> anyhow::Result<Url> {
    let mut url =
        Url::parse(api_base).with_context(|| format!("invalid sheets api base {api_base}"))?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("sheets api base {api_base} cannot carry a path"))?
        .pop_if_empty()
        .push(spreadsheet_id)
        .push("values")
        .push(&format!("{range}{suffix}"));
    Ok(url)
}

/// Builds the snapshot from the identifier column. A first cell equal to the
/// column's own name is treated as a header row.
fn keys_from_column(cells: Vec<String>, identifier_column: &str) -> ExistingKeySet {
    let mut cells = cells.into_iter().peekable();
    if cells
        .peek()
        .is_some_and(|first| first.trim().eq_ignore_ascii_case(identifier_column))
    {
        cells.next();
    }
    ExistingKeySet::from_cells(cells)
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AppendBody<'a> {
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: &'a [Vec<String>],
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

pub struct SheetsSink {
    name: String,
    config: SheetsConfig,
    client: reqwest::Client,
    identifier_column: String,
    identifier_letter: String,
    key: Option<ServiceAccountKey>,
    token: Option<AccessToken>,
}

impl SheetsSink {
    pub fn new(config: SheetsConfig, schema: &RecordSchema) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building sheets http client")?;
        Ok(Self {
            name: format!("sheet:{}", config.sheet_name),
            identifier_column: schema.identifier_column().to_string(),
            identifier_letter: column_letter(schema.identifier_index()),
            config,
            client,
            key: None,
            token: None,
        })
    }

    async fn access_token(&mut self) -> anyhow::Result<String> {
        let now = Utc::now();
        if let Some(token) = &self.token {
            if token.expires_at - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now {
                return Ok(token.value.clone());
            }
        }

        let key = match &self.key {
            Some(key) => key.clone(),
            None => {
                let key = self.config.credentials.load()?;
                self.key = Some(key.clone());
                key
            }
        };
        let assertion = key.signed_assertion(now)?;
        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .context("requesting sheets access token")?
            .error_for_status()
            .context("token endpoint rejected the service account")?
            .json()
            .await
            .context("decoding token response")?;

        let lifetime = resp.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS);
        let expires_at = now + Duration::seconds(lifetime);
        debug!(client_email = %key.client_email, %expires_at, "obtained sheets access token");
        self.token = Some(AccessToken {
            value: resp.access_token.clone(),
            expires_at,
        });
        Ok(resp.access_token)
    }

    async fn append_rows(&mut self, rows: &[Vec<String>]) -> anyhow::Result<()> {
        let token = self.access_token().await?;
        let range = format!("{}!A1", quote_sheet(&self.config.sheet_name));
        let url = values_url(
            &self.config.api_base,
            &self.config.spreadsheet_id,
            &range,
            ":append",
        )?;
        self.client
            .post(url)
            .query(&[
                ("valueInputOption", self.config.value_input.as_str()),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(token)
            .json(&AppendBody {
                major_dimension: "ROWS",
                values: rows,
            })
            .send()
            .await
            .context("sending values:append")?
            .error_for_status()
            .context("values:append rejected")?;
        Ok(())
    }
}

#[async_trait]
impl Sink for SheetsSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_keys(&mut self) -> anyhow::Result<Option<ExistingKeySet>> {
        let span = info_span!("sheet_load_keys", sheet = %self.config.sheet_name);
        async {
            let token = self.access_token().await?;
            let column = &self.identifier_letter;
            let range = format!("{}!{column}:{column}", quote_sheet(&self.config.sheet_name));
            let url = values_url(&self.config.api_base, &self.config.spreadsheet_id, &range, "")?;
            let body: ValueRange = self
                .client
                .get(url)
                .query(&[("majorDimension", "COLUMNS")])
                .bearer_auth(token)
                .send()
                .await
                .context("reading identifier column")?
                .error_for_status()
                .context("identifier column read rejected")?
                .json()
                .await
                .context("decoding identifier column")?;

            let cells = body.values.into_iter().next().unwrap_or_default();
            let keys = keys_from_column(cells, &self.identifier_column);
            info!(existing = keys.len(), "loaded sheet keys");
            Ok(Some(keys))
        }
        .instrument(span)
        .await
    }

    async fn write(
        &mut self,
        schema: &RecordSchema,
        records: &[&ProfileRecord],
    ) -> Result<usize, PartialWrite> {
        let chunk_size = self.config.append_chunk.max(1);
        let mut written = 0usize;
        for chunk in records.chunks(chunk_size) {
            let rows: Vec<Vec<String>> = chunk.iter().map(|r| r.to_row(schema)).collect();
            if let Err(err) = self.append_rows(&rows).await {
                return Err(PartialWrite::new(written, err));
            }
            written += rows.len();
            debug!(
                sheet = %self.config.sheet_name,
                written,
                total = records.len(),
                "appended chunk"
            );
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::BTreeMap,
        io::Write as _,
        sync::{Arc, Mutex},
    };

    use base64::Engine as _;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
    };

    use super::*;

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = socket.read(&mut chunk).await.unwrap_or(0);
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(split) = text.find("\r\n\r\n") {
                let length = text[..split]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= split + 4 + length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Token endpoint plus the two Sheets calls the sink makes. Request lines are logged.
    async fn fake_sheets() -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { break };
                let request = read_request(&mut socket).await;
                let line = request.lines().next().unwrap_or_default().to_string();
                let body = if line.contains("/token") {
                    r#"{"access_token":"test-token","expires_in":3600}"#
                } else if line.starts_with("GET") {
                    r#"{"majorDimension":"COLUMNS","values":[["url","https://a.test/1"]]}"#
                } else {
                    "{}"
                };
                log.lock().unwrap().push(line);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), requests)
    }

    fn credentials_for(base: &str) -> tempfile::NamedTempFile {
        let mut key: serde_json::Value = serde_json::from_slice(&fixture_key_json()).unwrap();
        key["token_uri"] = serde_json::Value::String(format!("{base}/token"));
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(key.to_string().as_bytes()).unwrap();
        file
    }

    fn local_config(base: &str, credentials: &Path, value_input: SheetInput) -> SheetsConfig {
        SheetsConfig {
            spreadsheet_id: "sid".into(),
            sheet_name: "fanza".into(),
            credentials: SheetCredentials::File(credentials.to_path_buf()),
            value_input,
            append_chunk: 200,
            api_base: format!("{base}/v4/spreadsheets"),
            timeout: StdDuration::from_secs(5),
        }
    }

    fn fixture_key_json() -> Vec<u8> {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/sheets/service_account.json");
        std::fs::read(path).unwrap()
    }

    #[test]
    fn column_letters() {
        assert_eq!(column_letter(0), "A");
        assert_eq!(column_letter(2), "C");
        assert_eq!(column_letter(25), "Z");
        assert_eq!(column_letter(26), "AA");
        assert_eq!(column_letter(51), "AZ");
        assert_eq!(column_letter(52), "BA");
    }

    #[test]
    fn values_url_encodes_sheet_names() {
        let range = format!("{}!C:C", quote_sheet("fanza"));
        let url = values_url(SHEETS_API_BASE, "abc123", &range, "").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/'fanza'!C:C"
        );
        let url = values_url(
            "http://127.0.0.1:9/v4/spreadsheets/",
            "id",
            &format!("{}!A1", quote_sheet("jewel live")),
            ":append",
        )
        .unwrap();
        assert_eq!(url.path(), "/v4/spreadsheets/id/values/'jewel%20live'!A1:append");
        assert_eq!(quote_sheet("it's"), "'it''s'");
    }

    #[test]
    fn header_cell_is_not_a_key() {
        let keys = keys_from_column(
            vec!["URL".into(), "https://a.test/1".into(), "".into()],
            "url",
        );
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("https://a.test/1"));

        let keys = keys_from_column(vec!["https://a.test/1".into()], "url");
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn credentials_load_from_base64_and_file() {
        let raw = fixture_key_json();
        let encoded = STANDARD.encode(&raw);
        let wrapped = format!("{}\n{}", &encoded[..40], &encoded[40..]);
        let key = SheetCredentials::Base64(wrapped).load().unwrap();
        assert_eq!(key.client_email, "psync-test@psync-test.iam.gserviceaccount.com");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&raw).unwrap();
        let key = SheetCredentials::File(file.path().to_path_buf()).load().unwrap();
        assert_eq!(key.token_uri, "https://oauth2.googleapis.com/token");

        assert!(SheetCredentials::Base64("not base64!".into()).load().is_err());
        assert_eq!(
            format!("{:?}", SheetCredentials::Base64("secret".into())),
            "Base64(<redacted>)"
        );
    }

    #[test]
    fn assertion_is_rs256_with_sheets_scope() {
        let key = ServiceAccountKey::from_json(&fixture_key_json()).unwrap();
        let now = Utc::now();
        let jwt = key.signed_assertion(now).unwrap();
        let header = jsonwebtoken::decode_header(&jwt).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);

        let payload = jwt.split('.').nth(1).unwrap();
        let claims: serde_json::Value = serde_json::from_slice(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD
                .decode(payload)
                .unwrap(),
        )
        .unwrap();
        assert_eq!(claims["scope"], SHEETS_SCOPE);
        assert_eq!(claims["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 3600);
    }

    #[test]
    fn sink_name_and_identifier_column_follow_schema() {
        let schema = RecordSchema::new(&["name", "image", "url"], "url");
        let sink = SheetsSink::new(
            SheetsConfig {
                spreadsheet_id: "id".into(),
                sheet_name: "fanza".into(),
                credentials: SheetCredentials::File(PathBuf::from("/nonexistent")),
                value_input: SheetInput::Raw,
                append_chunk: 200,
                api_base: SHEETS_API_BASE.into(),
                timeout: StdDuration::from_secs(5),
            },
            &schema,
        )
        .unwrap();
        assert_eq!(sink.name(), "sheet:fanza");
        assert_eq!(sink.identifier_letter, "C");
    }

    #[tokio::test]
    async fn append_sends_the_configured_value_input_option() {
        let schema = RecordSchema::new(&["name", "image", "url"], "url");
        let fields = BTreeMap::from([("name".to_string(), "=HYPERLINK(\"x\")".to_string())]);
        let record = ProfileRecord::new("https://a.test/2", fields).unwrap();

        for (input, expected) in [
            (SheetInput::Raw, "valueInputOption=RAW&"),
            (SheetInput::UserEntered, "valueInputOption=USER_ENTERED&"),
        ] {
            let (base, requests) = fake_sheets().await;
            let credentials = credentials_for(&base);
            let mut sink =
                SheetsSink::new(local_config(&base, credentials.path(), input), &schema).unwrap();

            assert_eq!(sink.write(&schema, &[&record]).await.unwrap(), 1);

            let requests = requests.lock().unwrap().clone();
            let append = requests.iter().find(|l| l.contains(":append")).unwrap();
            assert!(append.starts_with("POST /v4/spreadsheets/sid/values/"), "{append}");
            assert!(append.contains(expected), "{append}");
            assert!(append.contains("insertDataOption=INSERT_ROWS"), "{append}");
        }
    }

    #[tokio::test]
    async fn load_keys_reads_the_identifier_column() {
        let schema = RecordSchema::new(&["name", "image", "url"], "url");
        let (base, requests) = fake_sheets().await;
        let credentials = credentials_for(&base);
        let mut sink =
            SheetsSink::new(local_config(&base, credentials.path(), SheetInput::Raw), &schema)
                .unwrap();

        let keys = sink.load_keys().await.unwrap().unwrap();

        assert_eq!(keys.len(), 1);
        assert!(keys.contains("https://a.test/1"));
        let requests = requests.lock().unwrap().clone();
        assert!(requests[0].starts_with("POST /token"));
        assert!(requests[1].contains("!C:C?majorDimension=COLUMNS"), "{}", requests[1]);
    }
}
