use std::io::Read;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tavern_gallery::api::{Client, ClientConfig, UploadRequest};
use tavern_gallery::gallery::{GalleryFolder, SortOrder, UploadFile};
use tiny_http::{Response, Server};

#[derive(Debug, Clone)]
struct Recorded {
    method: String,
    url: String,
    csrf: Option<String>,
    body: String,
}

type Route = dyn Fn(&str, &str) -> (u16, Vec<u8>) + Send + Sync;

struct FakeHost {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl FakeHost {
    fn start(route: impl Fn(&str, &str) -> (u16, Vec<u8>) + Send + Sync + 'static) -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();
        let route: Arc<Route> = Arc::new(route);
        thread::spawn(move || {
            for mut request in server.incoming_requests() {
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let csrf = request
                    .headers()
                    .iter()
                    .find(|header| header.field.equiv("X-CSRF-Token"))
                    .map(|header| header.value.as_str().to_string());
                let method = request.method().as_str().to_string();
                let url = request.url().to_string();
                let (status, payload) = route(&method, &url);
                recorded.lock().push(Recorded {
                    method,
                    url,
                    csrf,
                    body,
                });
                let _ = request.respond(Response::from_data(payload).with_status_code(status));
            }
        });
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            requests,
        }
    }

    fn client(&self) -> Client {
        Client::new(ClientConfig {
            base_url: Some(self.base_url.clone()),
            user_agent: "tavern-gallery/test".into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn posts(&self) -> Vec<Recorded> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.method == "POST")
            .cloned()
            .collect()
    }
}

fn ok_json(value: Value) -> (u16, Vec<u8>) {
    (200, value.to_string().into_bytes())
}

fn standard_routes(method: &str, url: &str) -> (u16, Vec<u8>) {
    match (method, url) {
        ("GET", "/csrf-token") => ok_json(json!({ "token": "tok-1" })),
        ("POST", "/api/images/list") => ok_json(json!(["a.png", "b.mp4"])),
        ("POST", "/api/images/delete") => (200, b"OK".to_vec()),
        ("POST", "/api/images/upload") => {
            ok_json(json!({ "path": "user/images/Ann/cat_png.png" }))
        }
        ("POST", "/api/characters/all") => ok_json(json!([
            { "name": "Ann", "avatar": "ann.png" },
            { "name": "Bo", "avatar": "bo.png" }
        ])),
        ("GET", "/user/images/Ann/a.png") => (200, vec![1, 2, 3, 4]),
        ("HEAD", "/user/images/Ann/b.mp4") => (200, Vec::new()),
        _ => (404, b"missing".to_vec()),
    }
}

fn folder() -> GalleryFolder {
    GalleryFolder::new("Ann").unwrap()
}

#[test]
fn list_sends_sort_and_csrf_token() {
    let host = FakeHost::start(standard_routes);
    let files = host
        .client()
        .list_images(&folder(), SortOrder::NameDesc)
        .unwrap();
    assert_eq!(files, vec!["a.png".to_string(), "b.mp4".to_string()]);

    let posts = host.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].csrf.as_deref(), Some("tok-1"));
    let body: Value = serde_json::from_str(&posts[0].body).unwrap();
    assert_eq!(
        body,
        json!({ "folder": "Ann", "sortField": "name", "sortOrder": "desc", "type": 3 })
    );
}

#[test]
fn csrf_token_is_fetched_once() {
    let host = FakeHost::start(standard_routes);
    let client = host.client();
    client.list_images(&folder(), SortOrder::DateAsc).unwrap();
    client.delete_image("user/images/Ann/a.png").unwrap();
    let token_requests = host
        .requests
        .lock()
        .iter()
        .filter(|request| request.url == "/csrf-token")
        .count();
    assert_eq!(token_requests, 1);
}

#[test]
fn requests_proceed_without_csrf_endpoint() {
    let host = FakeHost::start(|method, url| match (method, url) {
        ("POST", "/api/images/delete") => (200, b"OK".to_vec()),
        _ => (404, Vec::new()),
    });
    host.client().delete_image("user/images/Ann/a.png").unwrap();
    let posts = host.posts();
    assert_eq!(posts[0].csrf, None);
    let body: Value = serde_json::from_str(&posts[0].body).unwrap();
    assert_eq!(body, json!({ "path": "user/images/Ann/a.png" }));
}

#[test]
fn upload_sends_encoded_file() {
    let host = FakeHost::start(standard_routes);
    let file = UploadFile {
        name: "cat.png".into(),
        bytes: b"png".to_vec(),
    };
    let response = host
        .client()
        .upload_image(&UploadRequest::new(&folder(), &file))
        .unwrap();
    assert_eq!(response.path, "user/images/Ann/cat_png.png");

    let body: Value = serde_json::from_str(&host.posts()[0].body).unwrap();
    assert_eq!(body["image"], "cG5n");
    assert_eq!(body["format"], "png");
    assert_eq!(body["ch_name"], "Ann");
    assert_eq!(body["filename"], "cat_png");
}

#[test]
fn characters_are_listed() {
    let host = FakeHost::start(standard_routes);
    let records = host.client().characters().unwrap();
    let names: Vec<&str> = records.iter().map(|record| record.name.as_str()).collect();
    assert_eq!(names, vec!["Ann", "Bo"]);
    assert_eq!(records[1].avatar, "bo.png");
}

#[test]
fn media_is_fetched_and_probed() {
    let host = FakeHost::start(standard_routes);
    let client = host.client();
    assert_eq!(
        client.fetch_media("user/images/Ann/a.png").unwrap(),
        vec![1, 2, 3, 4]
    );
    assert!(client.probe_media("user/images/Ann/b.mp4").is_ok());

    let err = client.fetch_media("user/images/Ann/gone.png").unwrap_err();
    assert!(format!("{err:#}").contains("not found"));
}

#[test]
fn error_statuses_become_errors() {
    let host = FakeHost::start(|method, url| match (method, url) {
        ("POST", "/api/images/list") => (500, b"boom".to_vec()),
        ("POST", "/api/images/delete") => (403, Vec::new()),
        _ => (404, Vec::new()),
    });
    let client = host.client();

    let err = client
        .list_images(&folder(), SortOrder::DateAsc)
        .unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("500"), "message was {message}");
    assert!(message.contains("boom"), "message was {message}");

    let err = client.delete_image("user/images/Ann/a.png").unwrap_err();
    assert!(format!("{err:#}").contains("forbidden"));
}
