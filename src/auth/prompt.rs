use std::cell::OnceCell;
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};

use log::{debug, info, warn};
use url::Url;

use super::oauth::AuthorizationReply;
use super::AuthError;
use crate::config;

/// Hands the consent URL to a human and waits for them to come back.
///
/// This is the one place the pipeline suspends on external input. There is
/// no timeout: the user abandons the flow by not answering (or by answering
/// with nothing), which yields `Ok(None)`.
pub trait AuthorizationPrompt {
    /// Redirect URI the provider should send the browser back to.
    fn redirect_uri(&self) -> Result<String, AuthError>;

    /// Show `authorization_url` and block until a reply arrives.
    fn wait_for_reply(&self, authorization_url: &Url) -> Result<Option<AuthorizationReply>, AuthError>;
}

/// Receives the redirect on a local listener (port 8080, else any free port).
///
/// The listener is bound on first use, so building the prompt is free when
/// another credential source wins.
pub struct LoopbackPrompt {
    preferred_port: u16,
    listener: OnceCell<TcpListener>,
}

impl LoopbackPrompt {
    pub fn new(preferred_port: u16) -> Self {
        Self {
            preferred_port,
            listener: OnceCell::new(),
        }
    }

    fn listener(&self) -> Result<&TcpListener, AuthError> {
        if let Some(listener) = self.listener.get() {
            return Ok(listener);
        }
        let listener = match TcpListener::bind(("127.0.0.1", self.preferred_port)) {
            Ok(l) => l,
            Err(e) => {
                warn!("port {} unavailable ({}), using a random port", self.preferred_port, e);
                TcpListener::bind(("127.0.0.1", 0))?
            }
        };
        Ok(self.listener.get_or_init(|| listener))
    }

    /// The bound port (binding now if needed).
    pub fn port(&self) -> Result<u16, AuthError> {
        Ok(self.listener()?.local_addr()?.port())
    }

    /// Read one request. Connection-level I/O errors make it noise; only a
    /// redirect carrying a code or an error ends the wait.
    fn handle(stream: TcpStream) -> Redirect {
        let request_line = match read_request(&stream) {
            Ok(line) => line,
            Err(e) => {
                debug!("dropping loopback connection: {}", e);
                return Redirect::Noise;
            }
        };

        // "GET /?code=...&state=... HTTP/1.1"
        let Some(target) = request_line.split_whitespace().nth(1) else {
            debug!("ignoring empty loopback connection");
            return Redirect::Noise;
        };
        let Ok(url) = Url::parse(&format!("http://127.0.0.1{target}")) else {
            debug!("ignoring unreadable loopback request {:?}", target);
            reply_quietly(stream, "400 Bad Request", "Bad request.");
            return Redirect::Noise;
        };

        match AuthorizationReply::from_query(&url) {
            Ok(Some(reply)) => {
                reply_quietly(stream, "200 OK", "Authorization received. You can close this window.");
                Redirect::Reply(reply)
            }
            Err(AuthError::Denied(reason)) => {
                reply_quietly(stream, "200 OK", "Authorization was not completed. You can close this window.");
                Redirect::Denied(reason)
            }
            Ok(None) | Err(_) => {
                debug!("ignoring loopback request for {}", url.path());
                reply_quietly(stream, "404 Not Found", "Not found.");
                Redirect::Noise
            }
        }
    }
}

fn read_request(stream: &TcpStream) -> std::io::Result<String> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    // Drain the headers so closing the socket does not reset the connection.
    let mut header = String::new();
    while reader.read_line(&mut header)? > 0 && !header.trim_end().is_empty() {
        header.clear();
    }
    Ok(request_line)
}

fn reply_quietly(stream: TcpStream, status: &str, message: &str) {
    if let Err(e) = respond(stream, status, message) {
        debug!("could not answer loopback request: {}", e);
    }
}

/// What arrived on the loopback listener.
enum Redirect {
    Noise,
    Reply(AuthorizationReply),
    Denied(String),
}

fn respond(mut stream: TcpStream, status: &str, message: &str) -> std::io::Result<()> {
    let body = format!("<html><body><p>{message}</p></body></html>");
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )?;
    stream.flush()
}

impl Default for LoopbackPrompt {
    fn default() -> Self {
        Self::new(config::LOOPBACK_PORT)
    }
}

impl AuthorizationPrompt for LoopbackPrompt {
    fn redirect_uri(&self) -> Result<String, AuthError> {
        Ok(format!("http://127.0.0.1:{}/", self.port()?))
    }

    fn wait_for_reply(&self, authorization_url: &Url) -> Result<Option<AuthorizationReply>, AuthError> {
        eprintln!("Open this URL in your browser to authorize uploads:\n\n  {authorization_url}\n");
        let listener = self.listener()?;
        info!("waiting for the authorization redirect on {}", listener.local_addr()?);

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    debug!("loopback accept failed: {}", e);
                    continue;
                }
            };
            match Self::handle(stream) {
                Redirect::Reply(reply) => return Ok(Some(reply)),
                Redirect::Denied(reason) => {
                    warn!("authorization denied: {}", reason);
                    return Ok(None);
                }
                Redirect::Noise => continue,
            }
        }
        Ok(None)
    }
}

/// Reads the redirect URL (or bare code) pasted on stdin.
///
/// For terminals where the browser cannot reach a local listener. Nothing
/// listens on the redirect URI; the user copies the failed page's address.
pub struct PastePrompt {
    redirect_uri: String,
}

impl PastePrompt {
    pub fn new() -> Self {
        Self {
            redirect_uri: format!("http://127.0.0.1:{}/", config::LOOPBACK_PORT),
        }
    }
}

impl Default for PastePrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizationPrompt for PastePrompt {
    fn redirect_uri(&self) -> Result<String, AuthError> {
        Ok(self.redirect_uri.clone())
    }

    fn wait_for_reply(&self, authorization_url: &Url) -> Result<Option<AuthorizationReply>, AuthError> {
        eprintln!("Open this URL in your browser to authorize uploads:\n\n  {authorization_url}\n");
        eprint!("Paste the address you were redirected to (empty to cancel): ");
        std::io::stderr().flush()?;

        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        AuthorizationReply::parse(&line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    fn send(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n").unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_loopback_receives_code_and_ignores_noise() {
        let prompt = LoopbackPrompt::new(0);
        let port = prompt.port().unwrap();
        assert_eq!(prompt.redirect_uri().unwrap(), format!("http://127.0.0.1:{port}/"));

        let client = thread::spawn(move || {
            let favicon = send(port, "/favicon.ico");
            let done = send(port, "/?state=st&code=4%2Fxyz&scope=s");
            (favicon, done)
        });

        let url = Url::parse("https://accounts.example/auth").unwrap();
        let reply = prompt.wait_for_reply(&url).unwrap().unwrap();
        assert_eq!(reply.code, "4/xyz");
        assert_eq!(reply.state.as_deref(), Some("st"));

        let (favicon, done) = client.join().unwrap();
        assert!(favicon.starts_with("HTTP/1.1 404"));
        assert!(done.contains("Authorization received"));
    }

    #[test]
    fn test_loopback_survives_connection_closed_without_request() {
        let prompt = LoopbackPrompt::new(0);
        let port = prompt.port().unwrap();

        let client = thread::spawn(move || {
            drop(TcpStream::connect(("127.0.0.1", port)).unwrap());
            let mut half = TcpStream::connect(("127.0.0.1", port)).unwrap();
            write!(half, "GET /favicon.ico HTTP/1.1\r\n").unwrap();
            drop(half);
            send(port, "/?state=st&code=abc")
        });

        let url = Url::parse("https://accounts.example/auth").unwrap();
        let reply = prompt.wait_for_reply(&url).unwrap().unwrap();
        assert_eq!(reply.code, "abc");
        assert!(client.join().unwrap().contains("Authorization received"));
    }

    #[test]
    fn test_loopback_denial_is_abandonment() {
        let prompt = LoopbackPrompt::new(0);
        let port = prompt.port().unwrap();
        let client = thread::spawn(move || send(port, "/?error=access_denied"));

        let url = Url::parse("https://accounts.example/auth").unwrap();
        assert_eq!(prompt.wait_for_reply(&url).unwrap(), None);
        assert!(client.join().unwrap().contains("not completed"));
    }
}
