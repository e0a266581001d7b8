#![allow(dead_code)]

use bytes::Buf;
use futures_util::TryStreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use portra_cv::config::{AuthConfig, ChatConfig, Config};

/// Serves `$filter` on a free local port and evaluates to its base URL.
macro_rules! spawn_server {
    ($filter:expr) => {{
        let port = common::free_port();
        tokio::spawn(warp::serve($filter).run(([127, 0, 0, 1], port)));
        common::wait_for_port(port).await;
        format!("http://127.0.0.1:{}", port)
    }};
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn wait_for_port(port: u16) {
    for _ in 0..200 {
        if std::net::TcpStream::connect(("127.0.0.1", port)).is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server on port {} did not come up", port);
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 5 % 256) as u8, (y * 7 % 256) as u8, 128])
    });
    encode(DynamicImage::ImageRgb8(img))
}

pub fn encode(img: DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// All parts of a multipart body as (name, bytes).
pub async fn collect_parts(form: warp::multipart::FormData) -> Vec<(String, Vec<u8>)> {
    form.and_then(|part| async move {
        let name = part.name().to_string();
        let data = part
            .stream()
            .try_fold(Vec::new(), |mut acc, chunk| async move {
                acc.extend_from_slice(chunk.chunk());
                Ok(acc)
            })
            .await?;
        Ok((name, data))
    })
    .try_collect()
    .await
    .unwrap()
}

pub fn test_config() -> Config {
    Config {
        port: 0,
        host: "127.0.0.1".to_string(),
        public_url: "http://studio.test".to_string(),
        max_upload_mb: 2,
        print_dpi: 72,
        session_ttl_minutes: 60,
        background_removal_url: "http://127.0.0.1:9/unused".to_string(),
        chat: ChatConfig {
            gemini_api_key: None,
            gemini_base_url: "http://127.0.0.1:9".to_string(),
            models: Vec::new(),
            backup_url: None,
            backup_api_key: None,
            backup_model: "backup".to_string(),
            attempt_timeout: Duration::from_secs(2),
            backoff: Duration::from_millis(10),
        },
        auth: AuthConfig {
            url: "http://127.0.0.1:9".to_string(),
            anon_key: "anon".to_string(),
            bootstrap_timeout: Duration::from_millis(200),
        },
    }
}

/// Minimal cookie-keeping HTTP client.
pub struct Browser {
    client: reqwest::Client,
    base: String,
    cookies: Mutex<HashMap<String, String>>,
}

impl Browser {
    pub fn new(base: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base: base.to_string(),
            cookies: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(format!("{}{}", self.base, path))
    }

    pub fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(format!("{}{}", self.base, path))
    }

    pub fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.put(format!("{}{}", self.base, path))
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        self.cookies.lock().unwrap().get(name).cloned()
    }

    pub async fn send(&self, request: reqwest::RequestBuilder) -> reqwest::Response {
        let header = {
            let cookies = self.cookies.lock().unwrap();
            cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; ")
        };
        let request = if header.is_empty() {
            request
        } else {
            request.header("cookie", header)
        };

        let response = request.send().await.unwrap();

        let mut cookies = self.cookies.lock().unwrap();
        for value in response.headers().get_all("set-cookie") {
            let value = value.to_str().unwrap();
            let pair = value.split(';').next().unwrap();
            let (name, content) = pair.split_once('=').unwrap();
            if content.is_empty() {
                cookies.remove(name);
            } else {
                cookies.insert(name.to_string(), content.to_string());
            }
        }
        drop(cookies);

        response
    }

    pub async fn json(&self, request: reqwest::RequestBuilder) -> (u16, serde_json::Value) {
        let response = self.send(request).await;
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    pub async fn text(&self, request: reqwest::RequestBuilder) -> (u16, String) {
        let response = self.send(request).await;
        let status = response.status().as_u16();
        (status, response.text().await.unwrap())
    }
}
