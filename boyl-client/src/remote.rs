//! Client for the catalog server.
//!
//! The server speaks a small JSON API: password authentication yields a
//! bearer token that is attached to every later request, game records are
//! fetched by id, and archives stream from `/api/download`.

use std::future::Future;
use std::io::{self, Read};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::error::RemoteError;
use crate::settings::{SettingKey, Settings};

const AUTH_PATH: &str = "/api/collections/users/auth-with-password";
const GAMES_PATH: &str = "/api/collections/games/records";
const DOWNLOAD_PATH: &str = "/api/download";

/// A game as the server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteGame {
    pub id: String,
    pub name: String,
    /// Archive path on the server; its file name selects the extractor.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub executable: String,
}

/// An archive body being streamed from the server.
pub struct RemoteDownload {
    pub reader: Box<dyn Read + Send>,
    /// `Content-Length`, when the server sent one.
    pub total: Option<u64>,
}

/// The operations a download job needs from the server.
pub trait Remote: Send + Sync {
    fn get_game(&self, id: &str) -> Result<RemoteGame, RemoteError>;

    /// Start streaming the archive of `game_id`.
    ///
    /// Once `cancel` fires, the request is abandoned and further reads of
    /// the body fail.
    fn download(
        &self,
        game_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteDownload, RemoteError>;
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    identity: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Default)]
struct Session {
    url: String,
    token: Option<String>,
    identity: String,
}

/// HTTP implementation of [`Remote`].
///
/// Requests run on a small runtime owned by the client, so callers stay
/// synchronous. The URL and credentials can change while jobs are running;
/// each request reads the session at the moment it is built.
pub struct RemoteClient {
    runtime: Arc<Runtime>,
    http: Client,
    session: RwLock<Session>,
}

impl RemoteClient {
    pub fn new(url: &str) -> Result<Self, RemoteError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("boyl-http")
            .enable_all()
            .build()
            .map_err(RemoteError::Runtime)?;
        let http = Client::builder()
            .user_agent(concat!("boyl-client/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            runtime: Arc::new(runtime),
            http,
            session: RwLock::new(Session {
                url: trim_url(url),
                ..Session::default()
            }),
        })
    }

    /// Build a client from the stored settings, authenticating when both
    /// an email and a password are configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, crate::DownloadError> {
        let client = Self::new(&settings.get_string(SettingKey::ServerUrl)?)?;
        client.reconfigure(settings)?;
        Ok(client)
    }

    /// Re-read the server URL and credentials and re-authenticate.
    pub fn reconfigure(&self, settings: &Settings) -> Result<(), crate::DownloadError> {
        self.set_url(&settings.get_string(SettingKey::ServerUrl)?);
        let email = settings.get_string(SettingKey::Email)?;
        let password = settings.get_string(SettingKey::Password)?;
        if email.is_empty() || password.is_empty() {
            log::debug!("No credentials configured, staying anonymous");
            return Ok(());
        }
        self.authenticate(&email, &password)?;
        Ok(())
    }

    pub fn url(&self) -> String {
        self.read().url.clone()
    }

    pub fn set_url(&self, url: &str) {
        self.write().url = trim_url(url);
    }

    /// The email of the authenticated user, or empty.
    pub fn identity(&self) -> String {
        self.read().identity.clone()
    }

    /// Exchange credentials for a bearer token used by every later request.
    pub fn authenticate(&self, email: &str, password: &str) -> Result<(), RemoteError> {
        let body = serde_json::to_vec(&AuthRequest {
            identity: email,
            password,
        })?;
        let request = self
            .request(reqwest::Method::POST, AUTH_PATH)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let text = self.block_on(async { Ok::<_, RemoteError>(send(request).await?.text().await?) })?;
        let auth: AuthResponse = serde_json::from_str(&text)?;
        if auth.token.is_empty() {
            return Err(RemoteError::Auth("server returned an empty token".to_string()));
        }

        let mut session = self.write();
        session.token = Some(auth.token);
        session.identity = email.to_string();
        log::info!("Authenticated as {email}");
        Ok(())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let session = self.read();
        let builder = self.http.request(method, format!("{}{path}", session.url));
        match &session.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Session> {
        self.session.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.session.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Remote for RemoteClient {
    fn get_game(&self, id: &str) -> Result<RemoteGame, RemoteError> {
        let request = self.request(reqwest::Method::GET, &format!("{GAMES_PATH}/{id}"));
        let text = self.block_on(async { Ok::<_, RemoteError>(send(request).await?.text().await?) })?;
        Ok(serde_json::from_str(&text)?)
    }

    fn download(
        &self,
        game_id: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteDownload, RemoteError> {
        let request = self
            .request(reqwest::Method::GET, DOWNLOAD_PATH)
            .query(&[("id", game_id)]);
        let response = self.block_on(async {
            tokio::select! {
                _ = cancel.cancelled() => Err(RemoteError::Cancelled),
                response = send(request) => response,
            }
        })?;
        let total = response.content_length();
        Ok(RemoteDownload {
            reader: Box::new(Body {
                runtime: self.runtime.clone(),
                response: Some(response),
                cancel: cancel.clone(),
                chunk: Vec::new(),
                pos: 0,
            }),
            total,
        })
    }
}

/// A response body read chunk by chunk.
///
/// Each chunk is raced against the cancel token; when the token wins the
/// response is dropped, which closes the connection.
struct Body {
    runtime: Arc<Runtime>,
    response: Option<Response>,
    cancel: CancellationToken,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            if self.cancel.is_cancelled() {
                self.response = None;
                return Err(io::Error::other(RemoteError::Cancelled));
            }
            let Some(response) = self.response.as_mut() else {
                return Ok(0);
            };
            let cancel = &self.cancel;
            let next = self.runtime.block_on(async {
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    chunk = response.chunk() => Some(chunk),
                }
            });
            match next {
                None => {
                    self.response = None;
                    return Err(io::Error::other(RemoteError::Cancelled));
                }
                Some(Ok(Some(bytes))) => {
                    self.chunk = bytes.to_vec();
                    self.pos = 0;
                }
                Some(Ok(None)) => {
                    self.response = None;
                    return Ok(0);
                }
                Some(Err(e)) => {
                    self.response = None;
                    return Err(io::Error::other(e));
                }
            }
        }

        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Send a request, turning any non-2xx answer into [`RemoteError::Status`].
async fn send(builder: RequestBuilder) -> Result<Response, RemoteError> {
    let resp = builder.send().await?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Status {
        code: status.as_u16(),
        body,
    })
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
