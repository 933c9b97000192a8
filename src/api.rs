use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::blocking::{Client as HttpClient, Response};
use reqwest::header::{CONTENT_LENGTH, USER_AGENT};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::gallery::{GalleryFolder, SortOrder, UploadFile};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";
pub const MEDIA_TYPE_IMAGE: u32 = 1;
pub const MEDIA_TYPE_VIDEO: u32 = 2;

const LIST_PATH: &str = "api/images/list";
const DELETE_PATH: &str = "api/images/delete";
const UPLOAD_PATH: &str = "api/images/upload";
const CHARACTERS_PATH: &str = "api/characters/all";
const CSRF_PATH: &str = "csrf-token";
const CSRF_HEADER: &str = "X-CSRF-Token";

const PATH_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBody<'a> {
    folder: &'a str,
    sort_field: &'a str,
    sort_order: &'a str,
    #[serde(rename = "type")]
    media_type: u32,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    path: &'a str,
}

#[derive(Debug, Serialize)]
pub struct UploadRequest {
    pub image: String,
    pub format: String,
    pub ch_name: String,
    pub filename: String,
}

impl UploadRequest {
    pub fn new(folder: &GalleryFolder, file: &UploadFile) -> Self {
        Self {
            image: file.base64(),
            format: file.format().to_string(),
            ch_name: folder.to_string(),
            filename: file.stored_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CharacterRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Deserialize)]
struct CsrfToken {
    token: String,
}

#[derive(Debug, Clone, Default)]
enum CsrfState {
    #[default]
    Unknown,
    Missing,
    Token(String),
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
    csrf: Mutex<CsrfState>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.user_agent.trim().is_empty() {
            bail!("host client user agent required");
        }
        let mut base = config
            .base_url
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).with_context(|| format!("parse host url {base}"))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .cookie_store(true)
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
            csrf: Mutex::new(CsrfState::Unknown),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn list_images(&self, folder: &GalleryFolder, sort: SortOrder) -> Result<Vec<String>> {
        let body = ListBody {
            folder: folder.as_str(),
            sort_field: sort.field(),
            sort_order: sort.direction(),
            media_type: MEDIA_TYPE_IMAGE | MEDIA_TYPE_VIDEO,
        };
        let files: Vec<String> = self
            .post_json(LIST_PATH, &body)?
            .json()
            .context("host: decode image list")?;
        Ok(files)
    }

    pub fn delete_image(&self, path: &str) -> Result<()> {
        self.post_json(DELETE_PATH, &DeleteBody { path })?;
        Ok(())
    }

    pub fn upload_image(&self, request: &UploadRequest) -> Result<UploadResponse> {
        self.post_json(UPLOAD_PATH, request)?
            .json()
            .context("host: decode upload response")
    }

    pub fn characters(&self) -> Result<Vec<CharacterRecord>> {
        self.post_json(CHARACTERS_PATH, &serde_json::json!({}))?
            .json()
            .context("host: decode character list")
    }

    pub fn media_url(&self, src: &str) -> Result<Url> {
        let encoded = src
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| utf8_percent_encode(segment, PATH_SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/");
        self.base_url
            .join(&encoded)
            .with_context(|| format!("host: build media url for {src}"))
    }

    pub fn fetch_media(&self, src: &str) -> Result<Vec<u8>> {
        let url = self.media_url(src)?;
        let response = self
            .http
            .get(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("host: request media {url}"))?;
        let response = check_status(response)?;
        let bytes = response
            .bytes()
            .with_context(|| format!("host: read media body {url}"))?;
        Ok(bytes.to_vec())
    }

    /// Confirms a media file is reachable without downloading it.
    pub fn probe_media(&self, src: &str) -> Result<Option<u64>> {
        let url = self.media_url(src)?;
        let response = self
            .http
            .head(url.clone())
            .header(USER_AGENT, &self.user_agent)
            .send()
            .with_context(|| format!("host: probe media {url}"))?;
        let response = check_status(response)?;
        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok()))
    }

    fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.base_url.join(path)?;
        let mut request = self
            .http
            .post(url)
            .header(USER_AGENT, &self.user_agent)
            .json(body);
        if let Some(token) = self.csrf_token() {
            request = request.header(CSRF_HEADER, token);
        }
        let response = request
            .send()
            .with_context(|| format!("host: POST /{path}"))?;
        check_status(response)
    }

    fn csrf_token(&self) -> Option<String> {
        let mut state = self.csrf.lock();
        if let CsrfState::Unknown = *state {
            *state = match self.fetch_csrf_token() {
                Ok(token) => CsrfState::Token(token),
                Err(err) => {
                    log::debug!("host: continuing without csrf token: {err:#}");
                    CsrfState::Missing
                }
            };
        }
        match &*state {
            CsrfState::Token(token) => Some(token.clone()),
            _ => None,
        }
    }

    fn fetch_csrf_token(&self) -> Result<String> {
        let url = self.base_url.join(CSRF_PATH)?;
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .send()?;
        let token: CsrfToken = check_status(response)?.json()?;
        Ok(token.token)
    }
}

fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().unwrap_or_default();
    match status.as_u16() {
        401 => Err(anyhow!("host: unauthorized")),
        403 => Err(anyhow!("host: forbidden")),
        404 => Err(anyhow!("host: not found")),
        _ => Err(anyhow!("host: api error {}: {}", status, body.trim())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base: &str) -> Client {
        Client::new(ClientConfig {
            base_url: Some(base.to_string()),
            user_agent: "tavern-gallery/test".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }

    #[test]
    fn base_url_gains_trailing_slash() {
        let client = client("http://localhost:8000/st");
        assert_eq!(client.base_url().as_str(), "http://localhost:8000/st/");
    }

    #[test]
    fn media_url_encodes_segments() {
        let client = client("http://localhost:8000/");
        let url = client
            .media_url("user/images/Ann Lee/pic #1.png")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8000/user/images/Ann%20Lee/pic%20%231.png"
        );
    }

    #[test]
    fn list_body_uses_wire_names() {
        let body = ListBody {
            folder: "Ann",
            sort_field: SortOrder::NameDesc.field(),
            sort_order: SortOrder::NameDesc.direction(),
            media_type: MEDIA_TYPE_IMAGE | MEDIA_TYPE_VIDEO,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "folder": "Ann",
                "sortField": "name",
                "sortOrder": "desc",
                "type": 3,
            })
        );
    }

    #[test]
    fn upload_request_from_file() {
        let folder = GalleryFolder::new("Ann").unwrap();
        let file = UploadFile {
            name: "cat.jpeg".into(),
            bytes: b"hi".to_vec(),
        };
        let request = UploadRequest::new(&folder, &file);
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "image": "aGk=",
                "format": "jpeg",
                "ch_name": "Ann",
                "filename": "cat_jpeg",
            })
        );
    }
}
