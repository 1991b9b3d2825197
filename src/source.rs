//! Where the bytes of a frame come from
//!
//! A source hands out raw bytes and nothing else, one attempt per call. Retrying is
//! up to the [`Pipeline`](crate::pipeline::Pipeline).

use std::error::Error as _;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::error::AcquireError;

/// Responses above this size are not an image meant for the panel
pub const MAX_BODY_BYTES: u64 = 16 * 1024 * 1024;

/// Anything a frame can be fetched from
pub trait ImageSource {
    /// Performs one attempt to obtain the full byte content
    fn fetch(&self) -> Result<Vec<u8>, AcquireError>;

    /// Human readable origin for logs
    fn describe(&self) -> String;
}

/// One plain HTTP GET per fetch
pub struct NetworkSource {
    url: String,
    timeout: Duration,
    agent: ureq::Agent,
}

impl NetworkSource {
    /// Source for `http://{host}:{port}{path}`
    ///
    /// `timeout` bounds the whole request, connecting and reading the body included.
    pub fn new(host: &str, port: u16, path: &str, timeout: Duration) -> Self {
        let path = if path.starts_with('/') {
            path.to_owned()
        } else {
            format!("/{path}")
        };
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        NetworkSource {
            url: format!("http://{host}:{port}{path}"),
            timeout,
            agent,
        }
    }

    /// The requested URL
    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, err: &ureq::Transport) -> AcquireError {
        if timed_out(err) {
            AcquireError::Timeout {
                url: self.url.clone(),
                timeout: self.timeout,
            }
        } else {
            AcquireError::Transport {
                url: self.url.clone(),
                reason: err.to_string(),
            }
        }
    }
}

impl ImageSource for NetworkSource {
    fn fetch(&self) -> Result<Vec<u8>, AcquireError> {
        debug!(url = %self.url, "GET");
        let response = match self.agent.get(&self.url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(AcquireError::HttpStatus {
                    url: self.url.clone(),
                    status,
                })
            }
            Err(ureq::Error::Transport(err)) => return Err(self.transport_error(&err)),
        };

        let status = response.status();
        if !(200..300).contains(&status) {
            return Err(AcquireError::HttpStatus {
                url: self.url.clone(),
                status,
            });
        }

        read_body(response.into_reader(), &self.url, MAX_BODY_BYTES).map_err(|err| match err {
            BodyError::Io(err) if is_timeout(&err) => AcquireError::Timeout {
                url: self.url.clone(),
                timeout: self.timeout,
            },
            err => AcquireError::MalformedData {
                origin: self.url.clone(),
                reason: err.to_string(),
            },
        })
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Reads a file from disk on every fetch
#[derive(Debug, Clone)]
pub struct LocalFileSource {
    path: PathBuf,
}

impl LocalFileSource {
    /// Source for the file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalFileSource { path: path.into() }
    }

    /// The file that is read
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ImageSource for LocalFileSource {
    fn fetch(&self) -> Result<Vec<u8>, AcquireError> {
        let bytes = fs::read(&self.path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                AcquireError::NotFound {
                    path: self.path.clone(),
                }
            } else {
                AcquireError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })?;
        if bytes.is_empty() {
            return Err(AcquireError::MalformedData {
                origin: self.describe(),
                reason: "file is empty".into(),
            });
        }
        debug!(path = %self.path.display(), len = bytes.len(), "read frame file");
        Ok(bytes)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

#[derive(Debug, Error)]
enum BodyError {
    #[error("reading the body failed: {0}")]
    Io(#[source] io::Error),
    #[error("empty body")]
    Empty,
    #[error("body exceeds {0} bytes")]
    TooLarge(u64),
}

fn read_body(reader: impl Read, origin: &str, limit: u64) -> Result<Vec<u8>, BodyError> {
    let mut body = Vec::new();
    reader
        .take(limit + 1)
        .read_to_end(&mut body)
        .map_err(BodyError::Io)?;
    if body.is_empty() {
        return Err(BodyError::Empty);
    }
    if body.len() as u64 > limit {
        return Err(BodyError::TooLarge(limit));
    }
    debug!(origin, len = body.len(), "received body");
    Ok(body)
}

fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Walks the error chain looking for an expired socket deadline
fn timed_out(err: &ureq::Transport) -> bool {
    let mut source = err.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if is_timeout(io) {
                return true;
            }
        }
        source = err.source();
    }
    false
}
